//! Column layout and value encodings of the aggregated severity table.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

pub const COL_TIMESTAMP: &str = "TIMESTAMP";
pub const COL_SERVICE_NAME: &str = "SERVICE_NAME";
pub const COL_CRITICAL: &str = "Critical";
pub const COL_HIGH: &str = "High";
pub const COL_LOW: &str = "Low";
pub const COL_MEDIUM: &str = "Medium";
pub const COL_TOTAL_FINDINGS: &str = "total_findings";

/// Header written by [`super::save_table`]. Severity columns are in sorted
/// order, matching what a pivot over the severity values produces.
pub const HEADER: [&str; 7] = [
    COL_TIMESTAMP,
    COL_SERVICE_NAME,
    COL_CRITICAL,
    COL_HIGH,
    COL_LOW,
    COL_MEDIUM,
    COL_TOTAL_FINDINGS,
];

/// Columns a reader cannot do without. Severity counts default to zero.
pub const REQUIRED: [&str; 2] = [COL_TIMESTAMP, COL_SERVICE_NAME];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
];

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Parse a scanner or table timestamp. Offset-bearing values are normalised
/// to UTC. Returns `None` for anything unparseable.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_utc());
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// `YYYY-MM-DD HH:MM:SS`, with a fractional part only when one is present.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// Float cells always carry a decimal point (`8.0`, `2.5`).
pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}
