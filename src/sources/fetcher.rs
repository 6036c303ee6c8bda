//! Priority-ordered multi-source fetch
//!
//! Each source is driven through a small state machine
//! (`Idle -> Attempting -> Retrying -> ... -> Exhausted`). Sources are tried
//! strictly one after the other; a source is only abandoned once its retries
//! are used up.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use super::traits::SourceTransport;
use crate::errors::{AppError, AppResult, SourceError, SourceFailure};
use crate::models::{RawDocument, SourceDescriptor};
use crate::utils::url::obfuscate_credentials;

/// Successful fetch plus the failures of any higher-priority sources
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub document: RawDocument,
    /// Attempts spent on the source that succeeded
    pub attempts: u32,
    pub failures: Vec<SourceFailure>,
}

impl FetchOutcome {
    /// Attempts made across every source, including the successful one
    pub fn total_attempts(&self) -> u32 {
        self.failures.iter().map(|f| f.attempts).sum::<u32>() + self.attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptState {
    Idle,
    Attempting(u32),
    Retrying { next_attempt: u32, delay: Duration },
    Exhausted,
}

pub struct SourceFetcher {
    transport: Arc<dyn SourceTransport>,
    retry: RetryPolicy,
}

impl SourceFetcher {
    pub fn new(transport: Arc<dyn SourceTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Try every source in order until one yields a non-empty payload
    pub async fn fetch(&self, sources: &[SourceDescriptor]) -> AppResult<FetchOutcome> {
        let mut failures = Vec::new();

        for source in sources {
            match self.fetch_from(source).await {
                Ok((payload, attempts)) => {
                    info!(
                        role = %source.role,
                        attempts,
                        "Fetched {} bytes from {}",
                        payload.len(),
                        obfuscate_credentials(&source.url)
                    );
                    return Ok(FetchOutcome {
                        document: RawDocument {
                            payload,
                            source_role: source.role,
                            source_url: source.url.clone(),
                            fetched_at: Utc::now(),
                        },
                        attempts,
                        failures,
                    });
                }
                Err(failure) => {
                    warn!(role = %source.role, "Source exhausted: {}", failure);
                    failures.push(failure);
                }
            }
        }

        Err(AppError::SourceUnavailable { failures })
    }

    /// Drive one source to success or exhaustion
    async fn fetch_from(&self, source: &SourceDescriptor) -> Result<(Bytes, u32), SourceFailure> {
        let max_attempts = source.max_retries.max(1);
        let mut reasons = Vec::new();
        let mut attempts = 0;
        let mut state = AttemptState::Idle;

        loop {
            state = match state {
                AttemptState::Idle => AttemptState::Attempting(1),
                AttemptState::Attempting(attempt) => {
                    attempts = attempt;
                    debug!(role = %source.role, attempt, max_attempts, "Attempting source");
                    match self.attempt(source).await {
                        Ok(payload) => return Ok((payload, attempt)),
                        Err(e) => {
                            debug!(role = %source.role, attempt, "Attempt failed: {}", e);
                            reasons.push(e.to_string());
                            if attempt >= max_attempts {
                                AttemptState::Exhausted
                            } else {
                                AttemptState::Retrying {
                                    next_attempt: attempt + 1,
                                    delay: self.retry.delay_after(attempt),
                                }
                            }
                        }
                    }
                }
                AttemptState::Retrying {
                    next_attempt,
                    delay,
                } => {
                    if !delay.is_zero() {
                        debug!(role = %source.role, "Retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                    AttemptState::Attempting(next_attempt)
                }
                AttemptState::Exhausted => {
                    return Err(SourceFailure {
                        role: source.role,
                        url: obfuscate_credentials(&source.url),
                        attempts,
                        reasons,
                    });
                }
            };
        }
    }

    /// One bounded attempt; the in-flight request is dropped on timeout
    async fn attempt(&self, source: &SourceDescriptor) -> Result<Bytes, SourceError> {
        let payload = tokio::time::timeout(source.timeout, self.transport.fetch(&source.url))
            .await
            .map_err(|_| SourceError::Timeout {
                url: obfuscate_credentials(&source.url),
                timeout_secs: source.timeout.as_secs(),
            })??;

        if payload.is_empty() {
            return Err(SourceError::EmptyBody {
                url: obfuscate_credentials(&source.url),
            });
        }
        Ok(payload)
    }
}
