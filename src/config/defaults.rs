/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Source defaults
// Note: source.url is the ONLY mandatory field with no default
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 2;
pub const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 60;
pub const DEFAULT_USER_AGENT: &str = concat!("epg-timeshift/", env!("CARGO_PKG_VERSION"));

// Timeshift defaults
pub const DEFAULT_OFFSET_SECONDS: i64 = 30;

// Processing defaults
pub const DEFAULT_ENABLE_CACHE: bool = true;
pub const DEFAULT_CACHE_DURATION_HOURS: u64 = 24;
pub const DEFAULT_CACHE_DIR: &str = "./cache";
pub const DEFAULT_VALIDATE_XML: bool = true;
pub const DEFAULT_COMPRESS_OUTPUT: bool = true;
pub const DEFAULT_GENERATE_METRICS: bool = true;

// Output defaults
pub const DEFAULT_OUTPUT_DIRECTORY: &str = ".";
pub const DEFAULT_OUTPUT_FILENAME: &str = "epg_processed.xml";
pub const DEFAULT_KEEP_BACKUPS: usize = 3;
pub const DEFAULT_INCLUDE_METADATA: bool = false;
pub const DEFAULT_METRICS_FILENAME: &str = "metrics_report.json";
pub const DEFAULT_STATUS_FILENAME: &str = "epg_status.json";
