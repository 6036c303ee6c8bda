//! EPG source retrieval
//!
//! Transports fetch bytes for one URL; the [`SourceFetcher`] adds timeouts,
//! retries and priority-ordered fallback on top.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::SourceConfig;
use crate::errors::{AppResult, SourceError, SourceResult};
use crate::utils::url::scheme_of;

pub mod fetcher;
pub mod file;
pub mod http;
pub mod retry;
pub mod traits;

pub use fetcher::{FetchOutcome, SourceFetcher};
pub use file::FileTransport;
pub use http::HttpTransport;
pub use retry::RetryPolicy;
pub use traits::SourceTransport;

/// Dispatches each URL to the first transport that handles its scheme
pub struct SchemeRouter {
    transports: Vec<Arc<dyn SourceTransport>>,
}

impl SchemeRouter {
    pub fn new(transports: Vec<Arc<dyn SourceTransport>>) -> Self {
        Self { transports }
    }

    /// HTTP(S) and `file://` transports configured from the source section
    pub fn from_config(config: &SourceConfig) -> AppResult<Self> {
        Ok(Self::new(vec![
            Arc::new(HttpTransport::new(&config.user_agent)?),
            Arc::new(FileTransport),
        ]))
    }
}

#[async_trait]
impl SourceTransport for SchemeRouter {
    async fn fetch(&self, url: &str) -> SourceResult<Bytes> {
        let scheme = scheme_of(url).unwrap_or_default();
        match self.transports.iter().find(|t| t.supports_scheme(&scheme)) {
            Some(transport) => transport.fetch(url).await,
            None => Err(SourceError::UnsupportedScheme {
                scheme,
                url: crate::utils::url::obfuscate_credentials(url),
            }),
        }
    }

    fn supports_scheme(&self, scheme: &str) -> bool {
        self.transports.iter().any(|t| t.supports_scheme(scheme))
    }
}

/// Fetcher wired with the default transports and configured backoff
pub fn fetcher_from_config(config: &SourceConfig) -> AppResult<SourceFetcher> {
    let router = SchemeRouter::from_config(config)?;
    Ok(SourceFetcher::new(
        Arc::new(router),
        RetryPolicy::with_initial_delay(config.retry_backoff),
    ))
}
