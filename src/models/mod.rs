//! Domain types shared across pipeline stages

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod epg;

pub use epg::{Channel, EpgDocument, Programme, XmltvTime};

/// Configured role of a source, in priority terms
///
/// Serialized as `primary`, `backup1`, `backup2`, ... which map positionally
/// onto `source.url` and `source.backup_urls`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceRole {
    Primary,
    /// 1-based index into `backup_urls`
    Backup(u32),
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRole::Primary => f.write_str("primary"),
            SourceRole::Backup(n) => write!(f, "backup{n}"),
        }
    }
}

impl FromStr for SourceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized == "primary" {
            return Ok(SourceRole::Primary);
        }
        let index = normalized
            .strip_prefix("backup")
            .ok_or_else(|| format!("unknown source role '{s}'"))?;
        // A bare "backup" names the first backup
        if index.is_empty() {
            return Ok(SourceRole::Backup(1));
        }
        match index.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(SourceRole::Backup(n)),
            _ => Err(format!("unknown source role '{s}'")),
        }
    }
}

impl Serialize for SourceRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SourceRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One candidate source, resolved from configuration in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub role: SourceRole,
    pub url: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Payload as fetched, plus where and when it came from
///
/// `payload` holds the bytes exactly as served (normally gzip); the validator
/// is responsible for decompressing them.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub payload: Bytes,
    pub source_role: SourceRole,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
}

impl RawDocument {
    pub fn content_length(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("primary", SourceRole::Primary)]
    #[case("PRIMARY", SourceRole::Primary)]
    #[case("backup", SourceRole::Backup(1))]
    #[case("backup1", SourceRole::Backup(1))]
    #[case("backup12", SourceRole::Backup(12))]
    fn test_source_role_parsing(#[case] input: &str, #[case] expected: SourceRole) {
        assert_eq!(input.parse::<SourceRole>().unwrap(), expected);
    }

    #[rstest]
    #[case("secondary")]
    #[case("backup0")]
    #[case("backupx")]
    fn test_source_role_rejects_unknown(#[case] input: &str) {
        assert!(input.parse::<SourceRole>().is_err());
    }

    #[test]
    fn test_source_role_display_matches_config_names() {
        assert_eq!(SourceRole::Primary.to_string(), "primary");
        assert_eq!(SourceRole::Backup(2).to_string(), "backup2");
    }
}
