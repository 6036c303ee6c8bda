//! Output artifact publishing
//!
//! Rendering (serialize, compress, optional re-validation) happens entirely in
//! memory. Only a fully rendered artifact is written, and it replaces the
//! canonical file atomically, so consumers never see a partial document.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::sha256_hex;
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::models::EpgDocument;
use crate::utils::DecompressionService;
use crate::utils::fs::write_atomic;
use crate::utils::format_memory;
use crate::validation::DocumentValidator;
use crate::xmltv::{ProcessingMetadata, write_document};

const BACKUP_MARKER: &str = ".backup_";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_BACKUPS_PER_SECOND: u32 = 1000;

/// The artifact handed to downstream collaborators
#[derive(Debug, Clone)]
pub struct PublishedArtifact {
    pub path: PathBuf,
    pub bytes: Bytes,
    pub sha256: String,
    pub compressed: bool,
    /// Backup of the previous artifact, if one was taken
    pub backup: Option<PathBuf>,
    /// The canonical file already held these exact bytes
    pub unchanged: bool,
}

impl PublishedArtifact {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone)]
pub struct OutputPublisher {
    directory: PathBuf,
    artifact_path: PathBuf,
    compress: bool,
    validate: bool,
    include_metadata: bool,
    keep_backups: usize,
}

impl OutputPublisher {
    pub fn from_config(config: &Config) -> Self {
        let compress = config.processing.compress_output;
        Self {
            directory: config.output.directory.clone(),
            artifact_path: config.output.artifact_path(compress),
            compress,
            validate: config.processing.validate_xml,
            include_metadata: config.output.include_metadata,
            keep_backups: config.output.keep_backups,
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn compresses(&self) -> bool {
        self.compress
    }

    /// Serialize, compress and (optionally) re-validate a document
    pub fn render(&self, document: &EpgDocument, generated_at: DateTime<Utc>) -> AppResult<Vec<u8>> {
        let metadata = self
            .include_metadata
            .then(|| ProcessingMetadata::current(generated_at));
        let xml = write_document(document, metadata.as_ref())?;
        debug!("Serialized document: {}", format_memory(xml.len() as f64));

        let artifact = if self.compress {
            DecompressionService::compress_gzip(&xml)
                .map_err(|e| AppError::publish(format!("gzip compression failed: {e}")))?
        } else {
            xml
        };

        if self.validate {
            DocumentValidator::validate_bytes(&artifact)
                .map_err(|e| AppError::publish(format!("output failed re-validation: {e}")))?;
        }
        Ok(artifact)
    }

    /// Replace the canonical artifact, keeping a rotated backup of the old one
    pub async fn publish(&self, artifact: Vec<u8>, now: DateTime<Utc>) -> AppResult<PublishedArtifact> {
        let sha256 = sha256_hex(&artifact);
        let bytes = Bytes::from(artifact);

        let existing = tokio::fs::read(&self.artifact_path).await.ok();
        if existing.as_deref() == Some(&bytes[..]) {
            info!(
                "Artifact {} unchanged ({}), skipping write",
                self.artifact_path.display(),
                format_memory(bytes.len() as f64)
            );
            return Ok(PublishedArtifact {
                path: self.artifact_path.clone(),
                bytes,
                sha256,
                compressed: self.compress,
                backup: None,
                unchanged: true,
            });
        }

        let backup = match existing {
            Some(_) if self.keep_backups > 0 => self.backup_current(now).await,
            _ => None,
        };

        write_atomic(&self.artifact_path, &bytes).await.map_err(|e| {
            AppError::publish(format!("failed to write {}: {e}", self.artifact_path.display()))
        })?;
        info!(
            "Published {} ({})",
            self.artifact_path.display(),
            format_memory(bytes.len() as f64)
        );

        if backup.is_some() {
            self.rotate_backups().await;
        }

        Ok(PublishedArtifact {
            path: self.artifact_path.clone(),
            bytes,
            sha256,
            compressed: self.compress,
            backup,
            unchanged: false,
        })
    }

    fn file_name(&self) -> String {
        self.artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Copy the current artifact aside; failures only cost the backup
    async fn backup_current(&self, now: DateTime<Utc>) -> Option<PathBuf> {
        let backup_path = self.free_backup_path(now).await;
        match tokio::fs::copy(&self.artifact_path, &backup_path).await {
            Ok(_) => {
                debug!("Backed up previous artifact to {}", backup_path.display());
                Some(backup_path)
            }
            Err(e) => {
                warn!("Failed to back up {}: {}", self.artifact_path.display(), e);
                None
            }
        }
    }

    /// Backups of the canonical artifact, newest first
    /// Timestamped backup name, suffixed when that second is already taken
    async fn free_backup_path(&self, now: DateTime<Utc>) -> PathBuf {
        let stem = format!(
            "{}{}{}",
            self.file_name(),
            BACKUP_MARKER,
            now.format(BACKUP_TIMESTAMP_FORMAT)
        );
        let mut candidate = self.artifact_path.with_file_name(&stem);
        for n in 1..MAX_BACKUPS_PER_SECOND {
            if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                break;
            }
            // fixed width keeps name order chronological
            candidate = self.artifact_path.with_file_name(format!("{stem}_{n:03}"));
        }
        candidate
    }

    pub async fn list_backups(&self) -> Vec<PathBuf> {
        let prefix = format!("{}{}", self.file_name(), BACKUP_MARKER);
        let dir = match self.artifact_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => self.directory.clone(),
        };
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return Vec::new();
        };

        let mut backups = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                backups.push(entry.path());
            }
        }
        // timestamp suffix sorts chronologically
        backups.sort();
        backups.reverse();
        backups
    }

    async fn rotate_backups(&self) {
        for stale in self.list_backups().await.into_iter().skip(self.keep_backups) {
            match tokio::fs::remove_file(&stale).await {
                Ok(()) => debug!("Removed old backup {}", stale.display()),
                Err(e) => warn!("Failed to remove old backup {}: {}", stale.display(), e),
            }
        }
    }
}
