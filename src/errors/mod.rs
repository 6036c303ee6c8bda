//! Centralized error handling for the EPG time-shift pipeline
//!
//! # Error Categories
//!
//! - **Source Errors**: per-attempt fetch failures, aggregated into
//!   `SourceUnavailable` once every source is exhausted
//! - **Document Errors**: payloads that fail decompression, parsing or
//!   structural checks
//! - **Policy Errors**: invalid time-shift configuration
//! - **Publish Errors**: serialization, compression or hand-off failures
//!
//! # Usage
//!
//! ```rust
//! use epg_timeshift::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Err(AppError::policy("force_offset_expiry is not a timestamp"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for single fetch attempt results
pub type SourceResult<T> = Result<T, SourceError>;
