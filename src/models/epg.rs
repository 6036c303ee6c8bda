//! In-memory XMLTV guide
//!
//! Only the fields the pipeline reasons about are typed. Everything else a
//! channel or programme carries (descriptions, icons, ratings, ...) is kept as
//! owned XML events so the guide can be written back without losing content.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use quick_xml::events::Event;

/// Programme timestamp with the offset it was published in
pub type XmltvTime = DateTime<FixedOffset>;

const XMLTV_TIME_FORMAT: &str = "%Y%m%d%H%M%S %z";

/// Digits a truncated timestamp is padded with, from the month onwards
const TRUNCATED_PADDING: &str = "0101000000";

/// How a timestamp was written in the source document
///
/// XMLTV allows dropping trailing fields (`YYYYMMDDhhmm`, `YYYYMMDD`, ...)
/// and omitting the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLayout {
    /// Number of date/time digits, one of 4, 6, 8, 10, 12 or 14
    pub digits: usize,
    pub has_offset: bool,
}

impl Default for TimeLayout {
    fn default() -> Self {
        Self {
            digits: 14,
            has_offset: true,
        }
    }
}

/// Parse an XMLTV timestamp (`20250101060000 +0000`)
///
/// Timestamps without an offset are taken as UTC.
pub fn parse_xmltv_time(value: &str) -> Option<XmltvTime> {
    parse_xmltv_time_layout(value).map(|(time, _)| time)
}

/// Parse an XMLTV timestamp, also reporting how it was written
pub fn parse_xmltv_time_layout(value: &str) -> Option<(XmltvTime, TimeLayout)> {
    let value = value.trim();
    let digits = value.bytes().take_while(u8::is_ascii_digit).count();
    if !matches!(digits, 4 | 6 | 8 | 10 | 12 | 14) {
        return None;
    }
    let padded = format!("{}{}", &value[..digits], &TRUNCATED_PADDING[digits - 4..]);
    let offset = value[digits..].trim();

    let time = if offset.is_empty() {
        NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S")
            .ok()?
            .and_utc()
            .fixed_offset()
    } else {
        DateTime::parse_from_str(&format!("{padded} {offset}"), XMLTV_TIME_FORMAT).ok()?
    };
    Some((
        time,
        TimeLayout {
            digits,
            has_offset: !offset.is_empty(),
        },
    ))
}

/// Format a timestamp back into XMLTV form, keeping its original offset
pub fn format_xmltv_time(value: &XmltvTime) -> String {
    format_xmltv_time_as(value, TimeLayout::default())
}

/// Format a timestamp the way it was written, widening the precision when
/// the value no longer fits it (e.g. a minute-precision time shifted by 30s)
pub fn format_xmltv_time_as(value: &XmltvTime, layout: TimeLayout) -> String {
    let full = value.format("%Y%m%d%H%M%S").to_string();
    let digits = (layout.digits.clamp(4, 14)..=14)
        .step_by(2)
        .find(|&d| full[d..] == TRUNCATED_PADDING[d - 4..])
        .unwrap_or(14);
    if layout.has_offset {
        format!("{} {}", &full[..digits], value.format("%z"))
    } else {
        full[..digits].to_string()
    }
}

/// A `<channel>` element
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: String,
    pub display_names: Vec<String>,
    /// Attributes other than `id`, in document order
    pub attributes: Vec<(String, String)>,
    /// Child events between `<channel>` and `</channel>`
    pub body: Vec<Event<'static>>,
}

/// A `<programme>` element
#[derive(Debug, Clone, PartialEq)]
pub struct Programme {
    pub channel_id: String,
    pub start: XmltvTime,
    pub stop: Option<XmltvTime>,
    pub start_layout: TimeLayout,
    pub stop_layout: TimeLayout,
    pub title: Option<String>,
    /// Attributes other than `start`, `stop` and `channel`, in document order
    pub attributes: Vec<(String, String)>,
    /// Child events between `<programme>` and `</programme>`
    pub body: Vec<Event<'static>>,
}

impl Programme {
    /// Duration in seconds, when a stop time is present
    pub fn duration_seconds(&self) -> Option<i64> {
        self.stop.map(|stop| (stop - self.start).num_seconds())
    }
}

/// Parsed `<tv>` document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpgDocument {
    /// Declaration, doctype and comments preceding the root element
    pub prolog: Vec<Event<'static>>,
    /// Attributes of the `<tv>` root, in document order
    pub root_attributes: Vec<(String, String)>,
    pub channels: Vec<Channel>,
    pub programmes: Vec<Programme>,
    /// Root children that are neither channels nor programmes
    pub extras: Vec<Event<'static>>,
}

impl EpgDocument {
    /// Earliest start and latest stop across all programmes
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.programmes.iter().map(|p| p.start).min()?;
        let last = self
            .programmes
            .iter()
            .map(|p| p.stop.unwrap_or(p.start))
            .max()?;
        Some((first.with_timezone(&Utc), last.with_timezone(&Utc)))
    }
}
