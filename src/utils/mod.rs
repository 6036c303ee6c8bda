//! Small helpers shared by the pipeline stages

pub mod decompression;
pub mod fs;
pub mod human_format;
pub mod jitter;
pub mod url;

pub use decompression::{CompressionFormat, DecompressionService};
pub use human_format::{format_duration, format_memory};
