//! Invocation modes
//!
//! Every mode except `status` is a configuration mutation followed by a
//! standard pipeline run. Modes are validated before anything is touched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::{Config, TimeshiftConfig};
use crate::errors::{AppError, AppResult, RunFailure, Stage};
use crate::metrics::MetricsCollector;
use crate::notify::{ConfigChange, EventSink, LoggingEventSink, PipelineEvent, StatusFileSink, broadcast};
use crate::pipeline::{Pipeline, ProcessingResult};
use crate::sources::fetcher_from_config;
use crate::timeshift::parse_expiry;

/// Default lifetime of a forced offset
pub const DEFAULT_FORCE_DURATION_HOURS: u64 = 24;

/// Upper bound on a forced offset's lifetime
pub const MAX_FORCE_DURATION_HOURS: u64 = 24 * 366;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Use the configuration as-is
    Auto,
    /// Apply a temporary offset to every channel, persisted with its expiry
    ForceTimeshift { offset_seconds: i64, duration_hours: u64 },
    /// Upsert a per-channel override
    ChannelConfig { channel_id: String, offset_seconds: i64 },
    /// Report the current configuration without running
    Status,
}

impl RunMode {
    pub fn validate(&self) -> AppResult<()> {
        match self {
            RunMode::Auto | RunMode::Status => Ok(()),
            RunMode::ForceTimeshift {
                offset_seconds,
                duration_hours,
            } => {
                check_offset(*offset_seconds)?;
                if *duration_hours == 0 || *duration_hours > MAX_FORCE_DURATION_HOURS {
                    return Err(AppError::policy(format!(
                        "force duration must be between 1 and {MAX_FORCE_DURATION_HOURS} hours, got {duration_hours}"
                    )));
                }
                Ok(())
            }
            RunMode::ChannelConfig {
                channel_id,
                offset_seconds,
            } => {
                if channel_id.trim().is_empty() {
                    return Err(AppError::policy("channel id must not be empty"));
                }
                check_offset(*offset_seconds)
            }
        }
    }

    pub fn runs_pipeline(&self) -> bool {
        !matches!(self, RunMode::Status)
    }

    /// Mutate `config` for this mode, describing the change made (if any)
    pub fn apply(&self, config: &mut Config, now: DateTime<Utc>) -> AppResult<Option<ConfigChange>> {
        self.validate()?;
        match self {
            RunMode::Auto | RunMode::Status => Ok(None),
            RunMode::ForceTimeshift {
                offset_seconds,
                duration_hours,
            } => {
                let hours = TimeDelta::try_hours(*duration_hours as i64)
                    .ok_or_else(|| AppError::policy("force duration out of range"))?;
                let expires_at = now + hours;
                config.timeshift.force_offset = Some(*offset_seconds);
                config.timeshift.force_offset_expiry =
                    Some(expires_at.to_rfc3339_opts(SecondsFormat::Secs, true));
                info!("Forcing {}s offset until {}", offset_seconds, expires_at);
                Ok(Some(ConfigChange::ForceTimeshift {
                    offset_seconds: *offset_seconds,
                    expires_at,
                }))
            }
            RunMode::ChannelConfig {
                channel_id,
                offset_seconds,
            } => {
                let channel_id = channel_id.trim().to_string();
                let previous = config
                    .timeshift
                    .per_channel
                    .insert(channel_id.clone(), *offset_seconds);
                info!("Channel '{}' offset set to {}s", channel_id, offset_seconds);
                Ok(Some(ConfigChange::ChannelOffset {
                    channel_id,
                    offset_seconds: *offset_seconds,
                    previous,
                }))
            }
        }
    }
}

fn check_offset(offset_seconds: i64) -> AppResult<()> {
    TimeDelta::try_seconds(offset_seconds)
        .map(|_| ())
        .ok_or_else(|| AppError::policy(format!("offset of {offset_seconds}s is out of range")))
}

/// Drop a forced override whose expiry has passed
///
/// Overrides without a parseable expiry are left alone; the policy resolver
/// reports those.
pub fn clear_expired_force(timeshift: &mut TimeshiftConfig, now: DateTime<Utc>) -> Option<ConfigChange> {
    let expiry = timeshift.force_offset_expiry.as_deref().and_then(parse_expiry)?;
    if timeshift.force_offset.is_none() || now < expiry {
        return None;
    }
    let offset_seconds = timeshift.force_offset.take();
    timeshift.force_offset_expiry = None;
    info!("Cleared forced offset that expired at {}", expiry);
    Some(ConfigChange::ForceCleared { offset_seconds })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForceStatus {
    pub offset_seconds: i64,
    pub expiry: Option<String>,
    pub active: bool,
}

/// What `status` prints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub last_update: Option<DateTime<Utc>>,
    pub default_offset_seconds: i64,
    pub configured_channels: usize,
    pub per_channel: BTreeMap<String, i64>,
    pub force_offset: Option<ForceStatus>,
    pub output_path: PathBuf,
    pub cache_enabled: bool,
}

pub fn status_report(config: &Config, now: DateTime<Utc>) -> StatusReport {
    let force_offset = config.timeshift.force_offset.map(|offset_seconds| {
        let expiry = config.timeshift.force_offset_expiry.clone();
        let active = expiry
            .as_deref()
            .and_then(parse_expiry)
            .is_some_and(|at| now < at);
        ForceStatus {
            offset_seconds,
            expiry,
            active,
        }
    });

    StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        last_update: config.last_update,
        default_offset_seconds: config.timeshift.default_offset_seconds,
        configured_channels: config.timeshift.per_channel.len(),
        per_channel: config.timeshift.per_channel.clone(),
        force_offset,
        output_path: config.output.artifact_path(config.processing.compress_output),
        cache_enabled: config.processing.enable_cache,
    }
}

/// Result of one invocation
#[derive(Debug)]
pub enum Outcome {
    Status(StatusReport),
    Completed(Box<ProcessingResult>),
    Failed(RunFailure),
}

/// Standard sinks: the log plus the status file next to the artifact
pub fn default_sinks(config: &Config) -> Vec<Box<dyn EventSink>> {
    vec![
        Box::new(LoggingEventSink),
        Box::new(StatusFileSink::new(
            config.output.status_path(),
            config.timeshift.clone(),
        )),
    ]
}

/// Report a failure raised before the pipeline could start
async fn setup_failed(sinks: &[Box<dyn EventSink>], error: AppError, now: DateTime<Utc>) -> Outcome {
    let failure = RunFailure::new(Stage::Configuration, error);
    let mut metrics = MetricsCollector::start(now);
    metrics.record_error(failure.to_string());
    broadcast(sinks, &PipelineEvent::error_occurred(&failure, metrics.finalize(Utc::now()))).await;
    Outcome::Failed(failure)
}

/// Load the configuration, apply `mode`, persist any change, then run
pub async fn execute(mode: &RunMode, config_path: &Path) -> AppResult<Outcome> {
    mode.validate()?;
    let mut config = Config::load_from_file(config_path)?;
    let now = Utc::now();

    if !mode.runs_pipeline() {
        return Ok(Outcome::Status(status_report(&config, now)));
    }

    let mut changes = Vec::new();
    if let Some(change) = mode.apply(&mut config, now)? {
        changes.push(change);
    }
    if let Some(change) = clear_expired_force(&mut config.timeshift, now) {
        changes.push(change);
    }

    let sinks = default_sinks(&config);
    if !changes.is_empty()
        && let Err(e) = config.save_to_file(config_path, now)
    {
        return Ok(setup_failed(&sinks, e, now).await);
    }
    for change in changes {
        broadcast(&sinks, &PipelineEvent::ConfigChanged { change }).await;
    }

    let fetcher = match fetcher_from_config(&config.source) {
        Ok(fetcher) => fetcher,
        Err(e) => return Ok(setup_failed(&sinks, e, now).await),
    };
    let pipeline = Pipeline::with_fetcher(config, fetcher, sinks);
    Ok(match pipeline.run(now).await {
        Ok(result) => Outcome::Completed(Box::new(result)),
        Err(failure) => Outcome::Failed(failure),
    })
}
