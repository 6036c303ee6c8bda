use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use super::traits::SourceTransport;
use crate::errors::{SourceError, SourceResult};

/// Reads `file://` sources from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTransport;

#[async_trait]
impl SourceTransport for FileTransport {
    async fn fetch(&self, url: &str) -> SourceResult<Bytes> {
        let path = Url::parse(url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| SourceError::transport(format!("invalid file URL: {url}")))?;

        let contents = tokio::fs::read(&path)
            .await
            .map_err(|e| SourceError::transport(format!("{}: {e}", path.display())))?;
        debug!("Read {} bytes from {}", contents.len(), path.display());
        Ok(Bytes::from(contents))
    }

    fn supports_scheme(&self, scheme: &str) -> bool {
        scheme == "file"
    }
}
