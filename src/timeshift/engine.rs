use std::collections::BTreeSet;

use chrono::TimeDelta;
use serde::Serialize;
use tracing::debug;

use super::policy::{OffsetSource, TimeshiftPolicy};
use crate::errors::{AppError, AppResult};
use crate::models::EpgDocument;

/// What the engine did to a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShiftStats {
    pub channels_seen: usize,
    pub programmes_seen: usize,
    /// Programmes moved by a non-zero offset
    pub programmes_shifted: usize,
    pub forced: bool,
    /// Channels in the document that used a per-channel override
    pub channels_with_override: usize,
    /// Per-channel overrides naming channels absent from the document
    pub unmatched_overrides: Vec<String>,
}

/// Pure programme time rewriting
pub struct TimeshiftEngine;

impl TimeshiftEngine {
    /// Shift every programme by its channel's effective offset
    ///
    /// Channels and programmes keep their input order; only `start` and
    /// `stop` change, and each keeps its original UTC offset.
    pub fn apply(document: &EpgDocument, policy: &TimeshiftPolicy) -> AppResult<(EpgDocument, ShiftStats)> {
        let mut shifted = document.clone();
        let mut stats = ShiftStats {
            channels_seen: document.channels.len(),
            programmes_seen: document.programmes.len(),
            forced: policy.force.is_some(),
            ..ShiftStats::default()
        };

        for programme in &mut shifted.programmes {
            let (offset, _) = policy.offset_for(&programme.channel_id);
            if offset == 0 {
                continue;
            }
            let delta = TimeDelta::try_seconds(offset)
                .ok_or_else(|| AppError::policy(format!("offset of {offset}s is out of range")))?;

            let overflow = || {
                AppError::policy(format!(
                    "shifting programme on channel '{}' by {offset}s overflows the calendar",
                    programme.channel_id
                ))
            };
            let start = programme.start.checked_add_signed(delta).ok_or_else(overflow)?;
            let stop = match programme.stop {
                Some(stop) => Some(stop.checked_add_signed(delta).ok_or_else(overflow)?),
                None => None,
            };
            programme.start = start;
            programme.stop = stop;
            stats.programmes_shifted += 1;
        }

        let document_channels: BTreeSet<&str> = document.channels.iter().map(|c| c.id.as_str()).collect();
        if !stats.forced {
            stats.channels_with_override = document
                .channels
                .iter()
                .filter(|c| policy.offset_for(&c.id).1 == OffsetSource::PerChannel)
                .count();
        }
        stats.unmatched_overrides = policy
            .per_channel
            .keys()
            .filter(|id| !document_channels.contains(id.as_str()))
            .cloned()
            .collect();
        if !stats.unmatched_overrides.is_empty() {
            debug!(
                "Ignoring per-channel overrides for channels not in this feed: {}",
                stats.unmatched_overrides.join(", ")
            );
        }

        Ok((shifted, stats))
    }
}
