//! Single-shot processing pipeline
//!
//! policy -> fetch -> validate -> (cache lookup | transform -> render) ->
//! publish -> cache store -> metrics -> event. Fetch and validation failures
//! abort before the output directory is touched, so the previous artifact
//! stays in place.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, OutputFlags, fingerprint};
use crate::config::Config;
use crate::errors::{AppError, AppResult, RunFailure, SourceFailure, Stage};
use crate::metrics::{MetricsCollector, MetricsSummary};
use crate::models::{EpgDocument, SourceRole};
use crate::notify::{ArtifactInfo, EventSink, PipelineEvent, broadcast};
use crate::publish::{OutputPublisher, PublishedArtifact};
use crate::sources::{SourceFetcher, fetcher_from_config};
use crate::timeshift::{TimeshiftEngine, TimeshiftPolicy};
use crate::validation::DocumentValidator;

/// Everything a successful run produced
#[derive(Debug)]
pub struct ProcessingResult {
    /// The shifted document; `None` when the artifact came from the cache
    pub document: Option<EpgDocument>,
    pub artifact: PublishedArtifact,
    pub metrics: MetricsSummary,
    pub policy: TimeshiftPolicy,
    pub source_role: SourceRole,
    /// Higher-priority sources that failed before the one that succeeded
    pub fetch_failures: Vec<SourceFailure>,
    pub cache_hit: bool,
    pub generated_at: DateTime<Utc>,
}

/// What the stages hand back before metrics are finalized
struct StageOutput {
    document: Option<EpgDocument>,
    artifact: PublishedArtifact,
    policy: TimeshiftPolicy,
    source_role: SourceRole,
    fetch_failures: Vec<SourceFailure>,
    cache_hit: bool,
}

pub struct Pipeline {
    config: Config,
    fetcher: SourceFetcher,
    cache: CacheStore,
    publisher: OutputPublisher,
    sinks: Vec<Box<dyn EventSink>>,
}

impl Pipeline {
    /// Build a pipeline with the transports and retry policy from `config`
    pub fn new(config: Config, sinks: Vec<Box<dyn EventSink>>) -> AppResult<Self> {
        let fetcher = fetcher_from_config(&config.source)?;
        Ok(Self::with_fetcher(config, fetcher, sinks))
    }

    pub fn with_fetcher(config: Config, fetcher: SourceFetcher, sinks: Vec<Box<dyn EventSink>>) -> Self {
        let cache = CacheStore::from_config(&config.processing);
        let publisher = OutputPublisher::from_config(&config);
        Self {
            config,
            fetcher,
            cache,
            publisher,
            sinks,
        }
    }

    /// Run every stage once, emitting exactly one outcome event
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ProcessingResult, RunFailure> {
        info!("Starting EPG processing run");
        let mut metrics = MetricsCollector::start(now);
        let outcome = self.run_stages(&mut metrics, now).await;

        match outcome {
            Ok(output) => {
                metrics.record_output(output.artifact.size());
                let summary = metrics.finalize(Utc::now());
                self.write_metrics(&summary).await;
                summary.log_summary();

                let event = PipelineEvent::ProcessComplete {
                    metrics: summary.clone(),
                    artifact: ArtifactInfo::from(&output.artifact),
                };
                broadcast(&self.sinks, &event).await;

                Ok(ProcessingResult {
                    document: output.document,
                    artifact: output.artifact,
                    metrics: summary,
                    policy: output.policy,
                    source_role: output.source_role,
                    fetch_failures: output.fetch_failures,
                    cache_hit: output.cache_hit,
                    generated_at: now,
                })
            }
            Err(failure) => {
                metrics.record_error(failure.to_string());
                let summary = metrics.finalize(Utc::now());
                self.write_metrics(&summary).await;

                broadcast(&self.sinks, &PipelineEvent::error_occurred(&failure, summary)).await;
                Err(failure)
            }
        }
    }

    async fn run_stages(
        &self,
        metrics: &mut MetricsCollector,
        now: DateTime<Utc>,
    ) -> Result<StageOutput, RunFailure> {
        metrics.begin_stage(Stage::Policy);
        let policy = TimeshiftPolicy::resolve(&self.config.timeshift, now)
            .map_err(|e| RunFailure::new(Stage::Policy, e))?;
        let descriptors = self
            .config
            .source
            .descriptors()
            .map_err(|e| RunFailure::new(Stage::Configuration, e))?;

        metrics.begin_stage(Stage::Fetch);
        let fetched = self.fetcher.fetch(&descriptors).await.map_err(|e| {
            let role = match &e {
                AppError::SourceUnavailable { failures } => failures.last().map(|f| f.role),
                _ => None,
            };
            let failure = RunFailure::new(Stage::Fetch, e);
            match role {
                Some(role) => failure.with_role(role),
                None => failure,
            }
        })?;
        metrics.record_fetch(&fetched);
        let raw = fetched.document;
        let source_role = raw.source_role;

        metrics.begin_stage(Stage::Validate);
        let validated = DocumentValidator::validate(&raw)
            .map_err(|e| RunFailure::new(Stage::Validate, e).with_role(source_role))?;
        metrics.record_validation(&validated);

        let flags = OutputFlags {
            compress: self.publisher.compresses(),
            include_metadata: self.config.output.include_metadata,
        };
        let key = fingerprint(&raw.payload, &policy, flags);

        let (document, artifact, cache_hit) = match self.cache.lookup(&key, now).await {
            Some(cached) => {
                metrics.record_cache_hit(&cached.entry.metrics);
                (None, cached.artifact.to_vec(), true)
            }
            None => {
                if self.cache.is_enabled() {
                    metrics.record_cache_miss();
                }
                metrics.begin_stage(Stage::Transform);
                let (shifted, stats) = TimeshiftEngine::apply(&validated.document, &policy)
                    .map_err(|e| RunFailure::new(Stage::Transform, e).with_role(source_role))?;
                metrics.record_shift(&stats);

                metrics.begin_stage(Stage::Publish);
                let artifact = self
                    .publisher
                    .render(&shifted, now)
                    .map_err(|e| RunFailure::new(Stage::Publish, e).with_role(source_role))?;
                (Some(shifted), artifact, false)
            }
        };

        metrics.begin_stage(Stage::Publish);
        let published = self
            .publisher
            .publish(artifact, now)
            .await
            .map_err(|e| RunFailure::new(Stage::Publish, e).with_role(source_role))?;
        metrics.end_stage();

        if !cache_hit {
            metrics.record_output(published.size());
            if let Err(e) = self
                .cache
                .store(&key, &published.bytes, published.compressed, metrics.snapshot(), now)
                .await
            {
                warn!("Failed to cache processed result: {}", e);
                metrics.record_error(e.to_string());
            }
        } else {
            debug!("Served artifact from cache");
        }

        Ok(StageOutput {
            document,
            artifact: published,
            policy,
            source_role,
            fetch_failures: fetched.failures,
            cache_hit,
        })
    }

    async fn write_metrics(&self, summary: &MetricsSummary) {
        if self.config.processing.generate_metrics {
            summary.write_report(&self.config.output.metrics_path()).await;
        }
    }
}
