//! Run metrics
//!
//! The [`MetricsCollector`] is fed by each stage and consumed by
//! [`MetricsCollector::finalize`], so a [`MetricsSummary`] cannot change once
//! produced. Recording never fails; writing the report file only logs on error.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::Stage;
use crate::models::SourceRole;
use crate::sources::FetchOutcome;
use crate::timeshift::ShiftStats;
use crate::utils::fs::write_atomic;
use crate::utils::url::obfuscate_credentials;
use crate::utils::{format_duration, format_memory};
use crate::validation::ValidatedDocument;

/// Write-once summary of a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_duration_ms: u64,
    pub source_role: Option<SourceRole>,
    /// Masked URL of the source that served the guide
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    /// Earliest programme start and latest programme stop in the guide
    #[serde(default)]
    pub guide_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub guide_end: Option<DateTime<Utc>>,
    pub fetch_attempts: u32,
    pub failed_sources: usize,
    pub channels_seen: usize,
    pub programmes_seen: usize,
    pub programmes_shifted: usize,
    pub channels_with_override: usize,
    pub forced_offset_active: bool,
    pub bytes_in: usize,
    pub bytes_decompressed: usize,
    pub bytes_out: usize,
    pub cache_hit: bool,
    pub cache_hits: u32,
    pub cache_misses: u32,
    /// Elapsed milliseconds keyed by stage name
    pub stage_timings_ms: BTreeMap<String, u64>,
    pub errors: Vec<String>,
}

impl MetricsSummary {
    pub fn log_summary(&self) {
        info!(
            source = ?self.source_role.map(|r| r.to_string()),
            url = self.source_url.as_deref().unwrap_or("-"),
            channels = self.channels_seen,
            programmes = self.programmes_seen,
            shifted = self.programmes_shifted,
            cache_hit = self.cache_hit,
            "Run finished in {} ({} in, {} out)",
            format_duration(self.total_duration_ms),
            format_memory(self.bytes_in as f64),
            format_memory(self.bytes_out as f64)
        );
        for (stage, ms) in &self.stage_timings_ms {
            debug!("Stage {} took {}", stage, format_duration(*ms));
        }
    }

    /// Write the summary as pretty JSON; failures are logged, never raised
    pub async fn write_report(&self, path: &Path) -> bool {
        let json = match serde_json::to_vec_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize metrics report: {}", e);
                return false;
            }
        };
        match write_atomic(path, &json).await {
            Ok(()) => {
                debug!("Metrics report written to {}", path.display());
                true
            }
            Err(e) => {
                warn!("Failed to write metrics report {}: {}", path.display(), e);
                false
            }
        }
    }
}

/// Accumulates counters and stage timings during a run
#[derive(Debug)]
pub struct MetricsCollector {
    started: Instant,
    summary: MetricsSummary,
    current_stage: Option<(Stage, Instant)>,
}

impl MetricsCollector {
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            started: Instant::now(),
            summary: MetricsSummary {
                started_at: Some(now),
                ..MetricsSummary::default()
            },
            current_stage: None,
        }
    }

    /// Begin timing a stage, closing any stage still open
    pub fn begin_stage(&mut self, stage: Stage) {
        self.end_stage();
        self.current_stage = Some((stage, Instant::now()));
    }

    pub fn end_stage(&mut self) {
        if let Some((stage, began)) = self.current_stage.take() {
            let elapsed = began.elapsed().as_millis() as u64;
            *self.summary.stage_timings_ms.entry(stage.to_string()).or_default() += elapsed;
        }
    }

    pub fn record_fetch(&mut self, outcome: &FetchOutcome) {
        self.summary.source_role = Some(outcome.document.source_role);
        self.summary.source_url = Some(obfuscate_credentials(&outcome.document.source_url));
        self.summary.fetched_at = Some(outcome.document.fetched_at);
        self.summary.fetch_attempts = outcome.total_attempts();
        self.summary.failed_sources = outcome.failures.len();
        self.summary.bytes_in = outcome.document.content_length();
        for failure in &outcome.failures {
            self.summary.errors.push(failure.to_string());
        }
    }

    pub fn record_validation(&mut self, validated: &ValidatedDocument) {
        self.summary.channels_seen = validated.document.channels.len();
        self.summary.programmes_seen = validated.document.programmes.len();
        self.summary.bytes_decompressed = validated.decompressed_bytes;
        if let Some((start, end)) = validated.document.time_span() {
            self.summary.guide_start = Some(start);
            self.summary.guide_end = Some(end);
        }
    }

    pub fn record_shift(&mut self, stats: &ShiftStats) {
        self.summary.channels_seen = stats.channels_seen;
        self.summary.programmes_seen = stats.programmes_seen;
        self.summary.programmes_shifted = stats.programmes_shifted;
        self.summary.channels_with_override = stats.channels_with_override;
        self.summary.forced_offset_active = stats.forced;
    }

    /// Carry the transform counters of a cached run into this one
    pub fn record_cache_hit(&mut self, cached: &MetricsSummary) {
        self.summary.cache_hit = true;
        self.summary.cache_hits += 1;
        self.summary.programmes_shifted = cached.programmes_shifted;
        self.summary.channels_with_override = cached.channels_with_override;
        self.summary.forced_offset_active = cached.forced_offset_active;
    }

    pub fn record_cache_miss(&mut self) {
        self.summary.cache_misses += 1;
    }

    pub fn record_output(&mut self, bytes_out: usize) {
        self.summary.bytes_out = bytes_out;
    }

    pub fn record_error<S: Into<String>>(&mut self, error: S) {
        self.summary.errors.push(error.into());
    }

    /// Current counters without ending the run
    pub fn snapshot(&self) -> &MetricsSummary {
        &self.summary
    }

    pub fn finalize(mut self, now: DateTime<Utc>) -> MetricsSummary {
        self.end_stage();
        self.summary.finished_at = Some(now);
        self.summary.total_duration_ms = self.started.elapsed().as_millis() as u64;
        self.summary
    }
}
