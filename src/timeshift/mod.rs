//! Time-shift policy resolution and programme rewriting

pub mod engine;
pub mod policy;

pub use engine::{ShiftStats, TimeshiftEngine};
pub use policy::{ForcedOffset, OffsetSource, TimeshiftPolicy, parse_expiry};
