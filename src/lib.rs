pub mod cache;
pub mod config;
pub mod errors;
pub mod invocation;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod publish;
pub mod sources;
pub mod timeshift;
pub mod utils;
pub mod validation;
pub mod xmltv;
