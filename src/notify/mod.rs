//! Run events for downstream collaborators
//!
//! The pipeline emits one [`PipelineEvent`] per outcome (and one per
//! configuration change). Sinks decide what to do with it; a failing sink is
//! logged and never fails the run.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::TimeshiftConfig;
use crate::errors::{AppError, AppResult, RunFailure, Stage};
use crate::metrics::MetricsSummary;
use crate::models::SourceRole;
use crate::publish::PublishedArtifact;
use crate::utils::fs::write_atomic;

/// Artifact details attached to `process_complete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub sha256: String,
    pub size: usize,
    pub compressed: bool,
    pub unchanged: bool,
}

impl From<&PublishedArtifact> for ArtifactInfo {
    fn from(artifact: &PublishedArtifact) -> Self {
        Self {
            path: artifact.path.clone(),
            sha256: artifact.sha256.clone(),
            size: artifact.size(),
            compressed: artifact.compressed,
            unchanged: artifact.unchanged,
        }
    }
}

/// A configuration mutation made by an invocation mode or by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigChange {
    ForceTimeshift {
        offset_seconds: i64,
        expires_at: DateTime<Utc>,
    },
    ChannelOffset {
        channel_id: String,
        offset_seconds: i64,
        previous: Option<i64>,
    },
    ForceCleared {
        offset_seconds: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    ProcessComplete {
        metrics: MetricsSummary,
        artifact: ArtifactInfo,
    },
    ErrorOccurred {
        stage: Stage,
        source_role: Option<SourceRole>,
        kind: String,
        message: String,
        metrics: MetricsSummary,
    },
    ConfigChanged {
        change: ConfigChange,
    },
}

impl PipelineEvent {
    pub fn error_occurred(failure: &RunFailure, metrics: MetricsSummary) -> Self {
        Self::ErrorOccurred {
            stage: failure.stage,
            source_role: failure.source_role,
            kind: failure.error.kind().to_string(),
            message: failure.error.to_string(),
            metrics,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessComplete { .. } => "process_complete",
            Self::ErrorOccurred { .. } => "error_occurred",
            Self::ConfigChanged { .. } => "config_changed",
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::ProcessComplete { .. } => "success",
            Self::ErrorOccurred { .. } => "error",
            Self::ConfigChanged { .. } => "updated",
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &PipelineEvent) -> AppResult<()>;
}

/// Deliver an event to every sink, logging (not raising) sink failures
pub async fn broadcast(sinks: &[Box<dyn EventSink>], event: &PipelineEvent) {
    for sink in sinks {
        if let Err(e) = sink.emit(event).await {
            warn!("Failed to deliver {} event: {}", event.name(), e);
        }
    }
}

/// Writes events to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventSink;

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &PipelineEvent) -> AppResult<()> {
        match event {
            PipelineEvent::ProcessComplete { metrics, artifact } => info!(
                event = event.name(),
                path = %artifact.path.display(),
                size = artifact.size,
                cache_hit = metrics.cache_hit,
                "EPG processing complete"
            ),
            PipelineEvent::ErrorOccurred {
                stage,
                source_role,
                kind,
                message,
                ..
            } => error!(
                event = event.name(),
                stage = %stage,
                source = ?source_role.map(|r| r.to_string()),
                kind = %kind,
                "EPG processing failed: {}",
                message
            ),
            PipelineEvent::ConfigChanged { change } => {
                info!(event = event.name(), "Configuration changed: {:?}", change)
            }
        }
        Ok(())
    }
}

/// JSON document describing the latest event
#[derive(Debug, Serialize)]
struct StatusRecord<'a> {
    status: &'static str,
    timestamp: DateTime<Utc>,
    version: &'static str,
    #[serde(flatten)]
    event: &'a PipelineEvent,
    timeshift: &'a TimeshiftConfig,
}

/// Keeps a status file with the last event, for the companion app to poll
#[derive(Debug, Clone)]
pub struct StatusFileSink {
    path: PathBuf,
    timeshift: TimeshiftConfig,
}

impl StatusFileSink {
    pub fn new<P: Into<PathBuf>>(path: P, timeshift: TimeshiftConfig) -> Self {
        Self {
            path: path.into(),
            timeshift,
        }
    }
}

#[async_trait]
impl EventSink for StatusFileSink {
    async fn emit(&self, event: &PipelineEvent) -> AppResult<()> {
        let record = StatusRecord {
            status: event.status(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
            event,
            timeshift: &self.timeshift,
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| AppError::internal(format!("failed to serialize status: {e}")))?;
        write_atomic(&self.path, &json).await?;
        Ok(())
    }
}
