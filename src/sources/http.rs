use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::debug;

use super::traits::SourceTransport;
use crate::errors::{AppResult, SourceError, SourceResult};
use crate::utils::url::obfuscate_credentials;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP(S) transport backed by reqwest
///
/// Response bodies are returned untouched; gzip payloads stay compressed
/// until validation.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

/// reqwest embeds the raw request URL in its messages; strip it and name
/// the source by its masked form instead
fn transport_error(url: &str, error: reqwest::Error) -> SourceError {
    SourceError::transport(format!(
        "{}: {}",
        obfuscate_credentials(url),
        error.without_url()
    ))
}

#[async_trait]
impl SourceTransport for HttpTransport {
    async fn fetch(&self, url: &str) -> SourceResult<Bytes> {
        debug!("Fetching EPG over HTTP from: {}", obfuscate_credentials(url));

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, e))?;
        debug!("Received {} bytes (HTTP {})", body.len(), status.as_u16());
        Ok(body)
    }

    fn supports_scheme(&self, scheme: &str) -> bool {
        matches!(scheme, "http" | "https")
    }
}
