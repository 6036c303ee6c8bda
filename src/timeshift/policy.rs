//! Per-run time-shift policy
//!
//! The configuration is resolved once, at the start of a run, into an
//! immutable [`TimeshiftPolicy`]. Expiry of a forced override is decided at
//! that moment and never re-evaluated mid-run.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::TimeshiftConfig;
use crate::errors::{AppError, AppResult};

/// A temporary offset applied to every channel until it expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForcedOffset {
    pub offset_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

/// Which rule produced a channel's offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OffsetSource {
    Forced,
    PerChannel,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeshiftPolicy {
    pub default_offset_seconds: i64,
    pub per_channel: BTreeMap<String, i64>,
    /// Active forced override, if any
    pub force: Option<ForcedOffset>,
    /// A forced override was configured but had already lapsed
    pub force_expired: bool,
}

/// Parse a forced-offset expiry
///
/// Accepts RFC 3339, or a naive ISO 8601 timestamp which is taken as UTC.
pub fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn check_offset(what: &str, seconds: i64) -> AppResult<i64> {
    TimeDelta::try_seconds(seconds)
        .map(|_| seconds)
        .ok_or_else(|| AppError::policy(format!("{what} of {seconds}s is out of range")))
}

impl TimeshiftPolicy {
    /// Same offset for every channel, no overrides
    pub fn uniform(offset_seconds: i64) -> Self {
        Self {
            default_offset_seconds: offset_seconds,
            per_channel: BTreeMap::new(),
            force: None,
            force_expired: false,
        }
    }

    /// Resolve the configured policy as of `now`
    pub fn resolve(config: &TimeshiftConfig, now: DateTime<Utc>) -> AppResult<Self> {
        let default_offset_seconds = check_offset("default_offset_seconds", config.default_offset_seconds)?;

        let mut per_channel = BTreeMap::new();
        for (channel_id, offset) in &config.per_channel {
            let offset = check_offset(&format!("per_channel offset for '{channel_id}'"), *offset)?;
            per_channel.insert(channel_id.clone(), offset);
        }

        let expiry = match config.force_offset_expiry.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_expiry(raw).ok_or_else(|| {
                AppError::policy(format!("force_offset_expiry '{raw}' is not a valid timestamp"))
            })?),
        };

        let mut force = None;
        let mut force_expired = false;
        match (config.force_offset, expiry) {
            (Some(offset), Some(expires_at)) => {
                let offset_seconds = check_offset("force_offset", offset)?;
                if now < expires_at {
                    info!("Forced offset of {}s active until {}", offset_seconds, expires_at);
                    force = Some(ForcedOffset {
                        offset_seconds,
                        expires_at,
                    });
                } else {
                    info!("Forced offset of {}s expired at {}, ignoring", offset_seconds, expires_at);
                    force_expired = true;
                }
            }
            (Some(offset), None) => {
                warn!("force_offset {}s has no force_offset_expiry, ignoring", offset);
            }
            (None, Some(_)) | (None, None) => {}
        }

        Ok(Self {
            default_offset_seconds,
            per_channel,
            force,
            force_expired,
        })
    }

    /// Effective offset for a channel: forced, then per-channel, then default
    pub fn offset_for(&self, channel_id: &str) -> (i64, OffsetSource) {
        if let Some(force) = &self.force {
            return (force.offset_seconds, OffsetSource::Forced);
        }
        match self.per_channel.get(channel_id) {
            Some(offset) => (*offset, OffsetSource::PerChannel),
            None => (self.default_offset_seconds, OffsetSource::Default),
        }
    }

    /// Stable digest of everything that influences the transform output
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("default={};", self.default_offset_seconds));
        match &self.force {
            Some(force) => hasher.update(format!("force={};", force.offset_seconds)),
            None => hasher.update(b"force=none;"),
        }
        for (channel_id, offset) in &self.per_channel {
            hasher.update(format!("{}:{}={};", channel_id.len(), channel_id, offset));
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).unwrap()
    }

    fn config(default: i64, per_channel: &[(&str, i64)]) -> TimeshiftConfig {
        TimeshiftConfig {
            default_offset_seconds: default,
            per_channel: per_channel.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            force_offset: None,
            force_offset_expiry: None,
        }
    }

    #[test]
    fn test_precedence_without_force() {
        let policy = TimeshiftPolicy::resolve(&config(30, &[("C1", 120)]), now()).unwrap();
        assert_eq!(policy.offset_for("C1"), (120, OffsetSource::PerChannel));
        assert_eq!(policy.offset_for("C2"), (30, OffsetSource::Default));
    }

    #[test]
    fn test_channel_ids_match_exactly() {
        let policy = TimeshiftPolicy::resolve(&config(30, &[("RTP1.pt", 120)]), now()).unwrap();
        assert_eq!(policy.offset_for("rtp1.pt").0, 30);
    }

    #[test]
    fn test_active_force_overrides_everything() {
        let mut cfg = config(30, &[("C1", 120)]);
        cfg.force_offset = Some(3600);
        cfg.force_offset_expiry = Some("2025-01-01T06:00:00Z".into());

        let policy = TimeshiftPolicy::resolve(&cfg, now()).unwrap();
        assert_eq!(policy.offset_for("C1"), (3600, OffsetSource::Forced));
        assert_eq!(policy.offset_for("C2"), (3600, OffsetSource::Forced));
        assert!(!policy.force_expired);
    }

    #[rstest]
    #[case("2025-01-01T05:00:00Z")]
    #[case("2025-01-01T04:59:59+00:00")]
    #[case("2024-12-31T23:00:00")]
    fn test_expired_force_is_absent(#[case] expiry: &str) {
        let mut cfg = config(30, &[("C1", 120)]);
        cfg.force_offset = Some(3600);
        cfg.force_offset_expiry = Some(expiry.into());

        let policy = TimeshiftPolicy::resolve(&cfg, now()).unwrap();
        let unforced = TimeshiftPolicy::resolve(&config(30, &[("C1", 120)]), now()).unwrap();
        assert!(policy.force.is_none());
        assert!(policy.force_expired);
        assert_eq!(policy.offset_for("C1"), unforced.offset_for("C1"));
        assert_eq!(policy.signature(), unforced.signature());
    }

    #[test]
    fn test_force_without_expiry_is_ignored() {
        let mut cfg = config(30, &[]);
        cfg.force_offset = Some(3600);
        let policy = TimeshiftPolicy::resolve(&cfg, now()).unwrap();
        assert_eq!(policy.offset_for("C1").0, 30);
        assert!(!policy.force_expired);
    }

    #[test]
    fn test_malformed_expiry_is_policy_error() {
        let mut cfg = config(30, &[]);
        cfg.force_offset = Some(3600);
        cfg.force_offset_expiry = Some("next tuesday".into());
        let err = TimeshiftPolicy::resolve(&cfg, now()).unwrap_err();
        assert_eq!(err.kind(), "policy_error");
    }

    #[test]
    fn test_out_of_range_offset_is_policy_error() {
        let err = TimeshiftPolicy::resolve(&config(i64::MAX, &[]), now()).unwrap_err();
        assert!(matches!(err, AppError::Policy { .. }));
    }

    #[rstest]
    #[case("2025-01-01T06:00:00Z", 6)]
    #[case("2025-01-01T06:00:00.250+01:00", 5)]
    #[case("2025-01-01T06:00:00.123456", 6)]
    #[case("2025-01-01 06:00:00", 6)]
    fn test_parse_expiry_formats(#[case] input: &str, #[case] utc_hour: u32) {
        use chrono::Timelike;
        assert_eq!(parse_expiry(input).unwrap().hour(), utc_hour);
    }

    #[test]
    fn test_signature_tracks_output_relevant_fields() {
        let base = TimeshiftPolicy::resolve(&config(30, &[("C1", 120)]), now()).unwrap();
        let same = TimeshiftPolicy::resolve(&config(30, &[("C1", 120)]), now()).unwrap();
        let other_default = TimeshiftPolicy::resolve(&config(31, &[("C1", 120)]), now()).unwrap();
        let other_channel = TimeshiftPolicy::resolve(&config(30, &[("C1", 121)]), now()).unwrap();

        assert_eq!(base.signature(), same.signature());
        assert_ne!(base.signature(), other_default.signature());
        assert_ne!(base.signature(), other_channel.signature());
    }

    proptest! {
        #[test]
        fn prop_unlisted_channels_get_default(
            default in -86_400i64..86_400,
            overrides in proptest::collection::btree_map("[a-z]{1,6}\\.pt", -3_600i64..3_600, 0..8),
            channel in "[A-Z]{1,6}\\.pt",
        ) {
            let cfg = TimeshiftConfig {
                default_offset_seconds: default,
                per_channel: overrides,
                force_offset: None,
                force_offset_expiry: None,
            };
            let policy = TimeshiftPolicy::resolve(&cfg, now()).unwrap();
            prop_assert_eq!(policy.offset_for(&channel), (default, OffsetSource::Default));
        }

        #[test]
        fn prop_force_decided_by_expiry(
            force in -86_400i64..86_400,
            per_channel_offset in -3_600i64..3_600,
            expiry_delta in -7_200i64..7_200,
        ) {
            let mut cfg = config(30, &[("C1", per_channel_offset)]);
            cfg.force_offset = Some(force);
            cfg.force_offset_expiry = Some((now() + TimeDelta::seconds(expiry_delta)).to_rfc3339());
            let policy = TimeshiftPolicy::resolve(&cfg, now()).unwrap();

            if expiry_delta > 0 {
                prop_assert_eq!(policy.offset_for("C1").0, force);
                prop_assert_eq!(policy.offset_for("C2").0, force);
            } else {
                prop_assert_eq!(policy.offset_for("C1").0, per_channel_offset);
                prop_assert_eq!(policy.offset_for("C2").0, 30);
            }
        }
    }
}
