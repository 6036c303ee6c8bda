//! Source transport abstraction
//!
//! A transport knows how to turn a URL into bytes for one family of schemes.
//! Retry, timeout and fallback policy live in the fetcher, not here.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::SourceResult;

/// Single-shot retrieval of a source payload
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceTransport: Send + Sync {
    /// Fetch the payload at `url` exactly as served
    async fn fetch(&self, url: &str) -> SourceResult<Bytes>;

    /// Whether this transport handles the given URL scheme
    fn supports_scheme(&self, scheme: &str) -> bool;
}
