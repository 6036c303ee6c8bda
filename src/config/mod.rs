use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod defaults;
pub mod duration_serde;

use crate::errors::{AppError, AppResult};
use crate::models::{SourceDescriptor, SourceRole};
use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Stamped every time the configuration is saved
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    pub source: SourceConfig,
    #[serde(default)]
    pub timeshift: TimeshiftConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub url: String, // This is the ONLY mandatory field
    #[serde(default)]
    pub backup_urls: Vec<String>,
    #[serde(default = "default_source_timeout", with = "duration_serde::duration")]
    pub timeout: Duration,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay between attempts on the same source
    #[serde(default = "default_retry_backoff", with = "duration_serde::duration")]
    pub retry_backoff: Duration,
    /// Role names in the order they should be tried
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_priority: Option<Vec<SourceRole>>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeshiftConfig {
    #[serde(default = "default_offset_seconds")]
    pub default_offset_seconds: i64,
    #[serde(default)]
    pub per_channel: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_offset: Option<i64>,
    /// RFC 3339 timestamp, or a naive ISO timestamp taken as UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_offset_expiry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingConfig {
    #[serde(default = "default_enable_cache")]
    pub enable_cache: bool,
    #[serde(default = "default_cache_duration_hours")]
    pub cache_duration_hours: u64,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Re-parse the serialized output before handing it off
    #[serde(default = "default_validate_xml")]
    pub validate_xml: bool,
    #[serde(default = "default_compress_output")]
    pub compress_output: bool,
    #[serde(default = "default_generate_metrics")]
    pub generate_metrics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_output_filename")]
    pub filename: String,
    #[serde(default = "default_keep_backups")]
    pub keep_backups: usize,
    #[serde(default = "default_include_metadata")]
    pub include_metadata: bool,
    #[serde(default = "default_metrics_filename")]
    pub metrics_filename: String,
    #[serde(default = "default_status_filename")]
    pub status_filename: String,
}

// Source defaults
fn default_source_timeout() -> Duration {
    Duration::from_secs(DEFAULT_SOURCE_TIMEOUT_SECS)
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(DEFAULT_RETRY_BACKOFF_SECS)
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

// Timeshift defaults
fn default_offset_seconds() -> i64 {
    DEFAULT_OFFSET_SECONDS
}

// Processing defaults
fn default_enable_cache() -> bool {
    DEFAULT_ENABLE_CACHE
}

fn default_cache_duration_hours() -> u64 {
    DEFAULT_CACHE_DURATION_HOURS
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_validate_xml() -> bool {
    DEFAULT_VALIDATE_XML
}

fn default_compress_output() -> bool {
    DEFAULT_COMPRESS_OUTPUT
}

fn default_generate_metrics() -> bool {
    DEFAULT_GENERATE_METRICS
}

// Output defaults
fn default_output_directory() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIRECTORY)
}

fn default_output_filename() -> String {
    DEFAULT_OUTPUT_FILENAME.to_string()
}

fn default_keep_backups() -> usize {
    DEFAULT_KEEP_BACKUPS
}

fn default_include_metadata() -> bool {
    DEFAULT_INCLUDE_METADATA
}

fn default_metrics_filename() -> String {
    DEFAULT_METRICS_FILENAME.to_string()
}

fn default_status_filename() -> String {
    DEFAULT_STATUS_FILENAME.to_string()
}

impl Default for TimeshiftConfig {
    fn default() -> Self {
        Self {
            default_offset_seconds: default_offset_seconds(),
            per_channel: BTreeMap::new(),
            force_offset: None,
            force_offset_expiry: None,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            enable_cache: default_enable_cache(),
            cache_duration_hours: default_cache_duration_hours(),
            cache_dir: default_cache_dir(),
            validate_xml: default_validate_xml(),
            compress_output: default_compress_output(),
            generate_metrics: default_generate_metrics(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            filename: default_output_filename(),
            keep_backups: default_keep_backups(),
            include_metadata: default_include_metadata(),
            metrics_filename: default_metrics_filename(),
            status_filename: default_status_filename(),
        }
    }
}

impl SourceConfig {
    /// Build a source config with every optional field defaulted
    pub fn with_url<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            backup_urls: Vec::new(),
            timeout: default_source_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_backoff: default_retry_backoff(),
            source_priority: None,
            user_agent: default_user_agent(),
        }
    }

    fn url_for_role(&self, role: SourceRole) -> Option<&str> {
        match role {
            SourceRole::Primary => Some(self.url.as_str()),
            SourceRole::Backup(n) => self
                .backup_urls
                .get(n.checked_sub(1)? as usize)
                .map(String::as_str),
        }
    }

    /// Resolve the ordered list of sources to try
    ///
    /// Role names map positionally: `primary` is `url`, `backupN` is the Nth
    /// entry of `backup_urls`. Without `source_priority` the primary is tried
    /// first, then every backup in declared order.
    pub fn descriptors(&self) -> AppResult<Vec<SourceDescriptor>> {
        let order: Vec<SourceRole> = match &self.source_priority {
            Some(roles) => roles.clone(),
            None => std::iter::once(SourceRole::Primary)
                .chain((1..=self.backup_urls.len() as u32).map(SourceRole::Backup))
                .collect(),
        };

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(order.len());
        for role in order {
            if !seen.insert(role) {
                debug!("Ignoring duplicate source role '{}' in source_priority", role);
                continue;
            }
            match self.url_for_role(role).map(str::trim) {
                Some(url) if !url.is_empty() => descriptors.push(SourceDescriptor {
                    role,
                    url: url.to_string(),
                    timeout: self.timeout,
                    max_retries: self.retry_attempts.max(1),
                }),
                _ => warn!(
                    "Source role '{}' listed in source_priority has no configured URL, skipping",
                    role
                ),
            }
        }

        if descriptors.is_empty() {
            return Err(AppError::configuration(
                "no usable source: source.url is empty and no backup matched source_priority",
            ));
        }
        Ok(descriptors)
    }
}

impl OutputConfig {
    /// Path of the canonical artifact
    pub fn artifact_path(&self, compressed: bool) -> PathBuf {
        if compressed {
            self.directory.join(format!("{}.gz", self.filename))
        } else {
            self.directory.join(&self.filename)
        }
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.directory.join(&self.metrics_filename)
    }

    pub fn status_path(&self) -> PathBuf {
        self.directory.join(&self.status_filename)
    }
}

impl Config {
    /// Minimal configuration for a single primary source
    pub fn with_source_url<S: Into<String>>(url: S) -> Self {
        Self {
            last_update: None,
            source: SourceConfig::with_url(url),
            timeshift: TimeshiftConfig::default(),
            processing: ProcessingConfig::default(),
            output: OutputConfig::default(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(config_file: P) -> AppResult<Self> {
        let path = config_file.as_ref();
        if !path.exists() {
            return Err(AppError::configuration(format!(
                "config file {} not found (source.url is required, so no default can be written)",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> AppResult<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| AppError::configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.source.url.trim().is_empty() {
            return Err(AppError::configuration("source.url is required"));
        }
        for url in std::iter::once(&self.source.url).chain(self.source.backup_urls.iter()) {
            url::Url::parse(url.trim())
                .map_err(|e| AppError::configuration(format!("invalid source URL '{url}': {e}")))?;
        }
        if self.output.filename.trim().is_empty() {
            return Err(AppError::configuration("output.filename must not be empty"));
        }
        Ok(())
    }

    /// Persist the configuration, replacing the file atomically
    pub fn save_to_file<P: AsRef<Path>>(&mut self, config_file: P, now: DateTime<Utc>) -> AppResult<()> {
        let path = config_file.as_ref();
        self.last_update = Some(now);
        let contents = toml::to_string_pretty(self)
            .map_err(|e| AppError::configuration(format!("failed to serialize config: {e}")))?;

        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, path)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}
