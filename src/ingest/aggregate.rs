//! Group raw findings into per-(timestamp, service) severity counts.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use super::raw::RawFinding;
use crate::storage::schema::parse_timestamp;
use crate::storage::{SeverityRecord, SeverityTable};

/// Fill value for missing categorical cells.
pub const UNKNOWN: &str = "unknown";

/// Canonical severity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Case-insensitive match; anything else (`informational`, `unknown`)
    /// has no canonical column.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    critical: u64,
    high: u64,
    medium: u64,
    low: u64,
}

/// A raw finding after timestamp parsing, unknown-fill and text
/// normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub timestamp: NaiveDateTime,
    pub service_name: String,
    pub status: String,
    pub severity: String,
}

/// Bookkeeping for a single aggregation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregateStats {
    pub input_rows: usize,
    pub dropped_bad_timestamp: usize,
    pub filled_unknown: usize,
    pub unrecognized_severity: usize,
    pub failed_checks: usize,
}

/// Parse timestamps (dropping rows that fail), fill missing categoricals
/// with [`UNKNOWN`] and lower-case/trim service and status.
pub fn normalize_findings(findings: &[RawFinding], stats: &mut AggregateStats) -> Vec<Finding> {
    let mut out = Vec::with_capacity(findings.len());
    for f in findings {
        let Some(timestamp) = f.timestamp.as_deref().and_then(parse_timestamp) else {
            stats.dropped_bad_timestamp += 1;
            continue;
        };

        if f.service_name.is_none() || f.status.is_none() || f.severity.is_none() {
            stats.filled_unknown += 1;
        }

        let status = normalize(f.status.as_deref().unwrap_or(UNKNOWN));
        if status == "fail" {
            stats.failed_checks += 1;
        }

        out.push(Finding {
            timestamp,
            service_name: normalize(f.service_name.as_deref().unwrap_or(UNKNOWN)),
            status,
            severity: f.severity.clone().unwrap_or_else(|| UNKNOWN.to_string()),
        });
    }
    out
}

/// Normalise and group findings. Rows come out sorted by
/// (timestamp, service_name).
pub fn aggregate(findings: &[RawFinding]) -> (SeverityTable, AggregateStats) {
    let mut stats = AggregateStats {
        input_rows: findings.len(),
        ..Default::default()
    };
    let normalized = normalize_findings(findings, &mut stats);

    let mut groups: BTreeMap<(NaiveDateTime, String), Counts> = BTreeMap::new();
    for f in normalized {
        let counts = groups.entry((f.timestamp, f.service_name)).or_default();
        match Severity::parse(&f.severity) {
            Some(Severity::Critical) => counts.critical += 1,
            Some(Severity::High) => counts.high += 1,
            Some(Severity::Medium) => counts.medium += 1,
            Some(Severity::Low) => counts.low += 1,
            None => stats.unrecognized_severity += 1,
        }
    }

    let records = groups
        .into_iter()
        .map(|((timestamp, service), c)| {
            SeverityRecord::new(timestamp, service, c.critical, c.high, c.medium, c.low)
        })
        .collect();

    (SeverityTable::new(records), stats)
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}
