//! Error type definitions for the EPG time-shift pipeline
//!
//! Fatal errors are grouped by pipeline stage so a failed run can be reported
//! with the stage, the source role last attempted and the underlying cause.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::models::SourceRole;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Every configured source was tried and none produced a payload
    #[error("All sources unavailable: {}", format_failures(.failures))]
    SourceUnavailable { failures: Vec<SourceFailure> },

    /// The fetched payload failed structural validation
    #[error("Malformed document: {reason}")]
    MalformedDocument { reason: String },

    /// Invalid time-shift configuration
    #[error("Time-shift policy error: {message}")]
    Policy { message: String },

    /// Serialization, compression or hand-off of the output failed
    #[error("Publish failed: {message}")]
    PublishFailed { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Cache read/write errors (non-fatal, surfaced for logging)
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Filesystem errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Failure of a single fetch attempt against one source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The attempt exceeded the per-source timeout
    #[error("Connection timeout after {timeout_secs}s: {url}")]
    Timeout { url: String, timeout_secs: u64 },

    /// Non-success HTTP status
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// The source answered but the body was empty
    #[error("Empty response body: {url}")]
    EmptyBody { url: String },

    /// Network or filesystem transport failure
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// URL scheme not handled by any transport
    #[error("Unsupported URL scheme '{scheme}': {url}")]
    UnsupportedScheme { scheme: String, url: String },
}

/// Accumulated failure reasons for one source after its retries ran out
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub role: SourceRole,
    pub url: String,
    pub attempts: u32,
    pub reasons: Vec<String>,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} attempts): {}",
            self.role,
            self.attempts,
            self.reasons.last().map(String::as_str).unwrap_or("no attempt made")
        )
    }
}

fn format_failures(failures: &[SourceFailure]) -> String {
    if failures.is_empty() {
        return "no sources configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Pipeline stage a fatal error was raised from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Loading, persisting or wiring the configuration
    Configuration,
    Policy,
    Fetch,
    Validate,
    Transform,
    Publish,
}

/// A fatal pipeline failure with enough context to drive `error_occurred`
#[derive(Error, Debug)]
#[error("{stage} stage failed{}: {error}", .source_role.map(|r| format!(" (source {r})")).unwrap_or_default())]
pub struct RunFailure {
    pub stage: Stage,
    pub source_role: Option<SourceRole>,
    #[source]
    pub error: AppError,
}

impl RunFailure {
    pub fn new(stage: Stage, error: AppError) -> Self {
        Self {
            stage,
            source_role: None,
            error,
        }
    }

    pub fn with_role(mut self, role: SourceRole) -> Self {
        self.source_role = Some(role);
        self
    }
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a malformed document error
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedDocument {
            reason: reason.into(),
        }
    }

    /// Create a time-shift policy error
    pub fn policy<S: Into<String>>(message: S) -> Self {
        Self::Policy {
            message: message.into(),
        }
    }

    /// Create a publish failure
    pub fn publish<S: Into<String>>(message: S) -> Self {
        Self::PublishFailed {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used in notifications
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::MalformedDocument { .. } => "malformed_document",
            Self::Policy { .. } => "policy_error",
            Self::PublishFailed { .. } => "publish_failed",
            Self::Configuration { .. } => "configuration",
            Self::Cache { .. } => "cache",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Internal { .. } => "internal",
        }
    }
}

impl SourceError {
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}
