//! Processed-result cache
//!
//! One entry per fingerprint, stored as two files in the cache directory:
//! `<fingerprint>.json` (the [`CacheEntry`]) and the artifact bytes it points
//! to. Both are written via temp file + rename, artifact first, so a reader
//! never finds an entry whose artifact is missing or half-written. Entries
//! are replaced whole; the last writer wins.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::ProcessingConfig;
use crate::errors::{AppError, AppResult};
use crate::metrics::MetricsSummary;
use crate::timeshift::TimeshiftPolicy;
use crate::utils::fs::write_atomic;

/// Output options that change the artifact bytes for the same input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFlags {
    pub compress: bool,
    pub include_metadata: bool,
}

/// Cache key for a raw payload processed under a given policy
///
/// Combines the payload's size and SHA-256 with the policy signature and the
/// output flags, so changing any of them yields an independent entry.
pub fn fingerprint(raw: &[u8], policy: &TimeshiftPolicy, flags: OutputFlags) -> String {
    let content_hash = Sha256::digest(raw);
    let mut hasher = Sha256::new();
    hasher.update((raw.len() as u64).to_be_bytes());
    hasher.update(content_hash);
    hasher.update(policy.signature().as_bytes());
    hasher.update([flags.compress as u8, flags.include_metadata as u8]);
    hex::encode(hasher.finalize())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source_fingerprint: String,
    /// Artifact file name, relative to the cache directory
    pub result_reference: String,
    pub cached_at: DateTime<Utc>,
    pub ttl_hours: u64,
    pub artifact_sha256: String,
    pub artifact_size: u64,
    pub metrics: MetricsSummary,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.cached_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::try_hours(self.ttl_hours.min(i64::MAX as u64) as i64).unwrap_or(TimeDelta::MAX);
        self.age(now) > ttl
    }
}

/// A live entry together with its artifact
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub entry: CacheEntry,
    pub artifact: Bytes,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    enabled: bool,
    ttl_hours: u64,
}

impl CacheStore {
    pub fn new<P: Into<PathBuf>>(dir: P, enabled: bool, ttl_hours: u64) -> Self {
        Self {
            dir: dir.into(),
            enabled,
            ttl_hours,
        }
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(&config.cache_dir, config.enable_cache, config.cache_duration_hours)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    /// Live entry for `fingerprint`, or `None` when absent, expired or unreadable
    pub async fn lookup(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<CachedResult> {
        if !self.enabled {
            return None;
        }

        let entry_path = self.entry_path(fingerprint);
        let raw = match tokio::fs::read(&entry_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cache miss: no entry for {}", short(fingerprint));
                return None;
            }
            Err(e) => {
                warn!("Failed to read cache entry {}: {}", entry_path.display(), e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", entry_path.display(), e);
                return None;
            }
        };

        if entry.source_fingerprint != fingerprint {
            warn!("Cache entry {} belongs to another fingerprint, ignoring", entry_path.display());
            return None;
        }
        if entry.is_expired(now) {
            debug!(
                "Cache entry {} expired ({}h old, ttl {}h)",
                short(fingerprint),
                entry.age(now).num_hours(),
                entry.ttl_hours
            );
            return None;
        }

        let artifact_path = self.dir.join(&entry.result_reference);
        let artifact = match tokio::fs::read(&artifact_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cached artifact {} unavailable: {}", artifact_path.display(), e);
                return None;
            }
        };
        if sha256_hex(&artifact) != entry.artifact_sha256 {
            warn!("Cached artifact {} does not match its entry, ignoring", artifact_path.display());
            return None;
        }

        info!("Cache hit for {} (cached at {})", short(fingerprint), entry.cached_at);
        Some(CachedResult {
            entry,
            artifact: Bytes::from(artifact),
        })
    }

    /// Replace the entry for `fingerprint`; a no-op when caching is disabled
    pub async fn store(
        &self,
        fingerprint: &str,
        artifact: &[u8],
        compressed: bool,
        metrics: &MetricsSummary,
        now: DateTime<Utc>,
    ) -> AppResult<Option<CacheEntry>> {
        if !self.enabled {
            return Ok(None);
        }

        let result_reference = if compressed {
            format!("{fingerprint}.xml.gz")
        } else {
            format!("{fingerprint}.xml")
        };
        let entry = CacheEntry {
            source_fingerprint: fingerprint.to_string(),
            result_reference,
            cached_at: now,
            ttl_hours: self.ttl_hours,
            artifact_sha256: sha256_hex(artifact),
            artifact_size: artifact.len() as u64,
            metrics: metrics.clone(),
        };

        write_atomic(&self.dir.join(&entry.result_reference), artifact)
            .await
            .map_err(|e| AppError::cache(format!("failed to write cached artifact: {e}")))?;
        let json = serde_json::to_vec_pretty(&entry)
            .map_err(|e| AppError::cache(format!("failed to serialize cache entry: {e}")))?;
        write_atomic(&self.entry_path(fingerprint), &json)
            .await
            .map_err(|e| AppError::cache(format!("failed to write cache entry: {e}")))?;

        debug!("Cached result {} ({} bytes)", short(fingerprint), artifact.len());
        self.prune_expired(now).await;
        Ok(Some(entry))
    }

    /// Remove expired or unreadable entries and their artifacts
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) => {
                debug!("Cache directory {} not readable: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json")
                || !path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(is_fingerprint)
            {
                continue;
            }
            let entry = match tokio::fs::read(&path).await {
                Ok(raw) => serde_json::from_slice::<CacheEntry>(&raw).ok(),
                Err(_) => continue,
            };
            let stale = entry.as_ref().is_none_or(|e| e.is_expired(now));
            if !stale {
                continue;
            }
            if let Some(entry) = &entry {
                remove_quietly(&self.dir.join(&entry.result_reference)).await;
            }
            remove_quietly(&path).await;
            removed += 1;
        }

        if removed > 0 {
            info!("Pruned {} expired cache entries", removed);
        }
        removed
    }
}

/// Entries are named after a hex SHA-256; anything else in the directory is left alone
fn is_fingerprint(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T05:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    const FLAGS: OutputFlags = OutputFlags {
        compress: true,
        include_metadata: false,
    };

    #[tokio::test]
    async fn test_store_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), true, 24);
        let fp = fingerprint(b"raw", &TimeshiftPolicy::uniform(30), FLAGS);

        assert!(store.lookup(&fp, now()).await.is_none());
        store
            .store(&fp, b"artifact", true, &MetricsSummary::default(), now())
            .await
            .unwrap();

        let hit = store.lookup(&fp, now() + TimeDelta::hours(23)).await.unwrap();
        assert_eq!(&hit.artifact[..], b"artifact");
        assert_eq!(hit.entry.ttl_hours, 24);
        assert_eq!(hit.entry.result_reference, format!("{fp}.xml.gz"));
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), true, 24);
        let fp = fingerprint(b"raw", &TimeshiftPolicy::uniform(30), FLAGS);
        store
            .store(&fp, b"artifact", true, &MetricsSummary::default(), now())
            .await
            .unwrap();

        assert!(store.lookup(&fp, now() + TimeDelta::hours(24)).await.is_some());
        assert!(
            store
                .lookup(&fp, now() + TimeDelta::hours(24) + TimeDelta::seconds(1))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_disabled_store_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache"), false, 24);
        let fp = fingerprint(b"raw", &TimeshiftPolicy::uniform(30), FLAGS);

        let stored = store
            .store(&fp, b"artifact", true, &MetricsSummary::default(), now())
            .await
            .unwrap();
        assert!(stored.is_none());
        assert!(store.lookup(&fp, now()).await.is_none());
        assert!(!dir.path().join("cache").exists());
    }

    #[tokio::test]
    async fn test_tampered_artifact_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), true, 24);
        let fp = fingerprint(b"raw", &TimeshiftPolicy::uniform(30), FLAGS);
        let entry = store
            .store(&fp, b"artifact", true, &MetricsSummary::default(), now())
            .await
            .unwrap()
            .unwrap();

        std::fs::write(dir.path().join(&entry.result_reference), b"half-writ").unwrap();
        assert!(store.lookup(&fp, now()).await.is_none());
    }

    #[tokio::test]
    async fn test_store_prunes_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), true, 1);
        let old = fingerprint(b"old", &TimeshiftPolicy::uniform(30), FLAGS);
        let new = fingerprint(b"new", &TimeshiftPolicy::uniform(30), FLAGS);

        store.store(&old, b"a", true, &MetricsSummary::default(), now()).await.unwrap();
        store
            .store(&new, b"b", true, &MetricsSummary::default(), now() + TimeDelta::hours(2))
            .await
            .unwrap();

        assert!(!dir.path().join(format!("{old}.json")).exists());
        assert!(!dir.path().join(format!("{old}.xml.gz")).exists());
        assert!(dir.path().join(format!("{new}.json")).exists());
    }

    #[tokio::test]
    async fn test_prune_leaves_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), true, 1);
        std::fs::write(dir.path().join("metrics_report.json"), b"not an entry").unwrap();

        assert_eq!(store.prune_expired(now()).await, 0);
        assert!(dir.path().join("metrics_report.json").exists());
    }

    #[test]
    fn test_fingerprint_depends_on_content_policy_and_flags() {
        let base = fingerprint(b"raw", &TimeshiftPolicy::uniform(30), FLAGS);

        assert_eq!(base, fingerprint(b"raw", &TimeshiftPolicy::uniform(30), FLAGS));
        assert_ne!(base, fingerprint(b"raw2", &TimeshiftPolicy::uniform(30), FLAGS));
        assert_ne!(base, fingerprint(b"raw", &TimeshiftPolicy::uniform(60), FLAGS));
        assert_ne!(
            base,
            fingerprint(
                b"raw",
                &TimeshiftPolicy::uniform(30),
                OutputFlags {
                    compress: false,
                    include_metadata: false
                }
            )
        );
    }
}
