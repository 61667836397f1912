//! Per-row model features shared by the anomaly detector and the risk
//! classifier.

use crate::storage::SeverityRecord;

pub const FEATURE_NAMES: [&str; 5] = ["total_failures", "Critical", "High", "Medium", "Low"];
pub const N_FEATURES: usize = FEATURE_NAMES.len();

/// Unweighted count of findings in the row, computed from the raw counts and
/// never from `total_findings`.
pub fn total_failures(r: &SeverityRecord) -> u64 {
    r.critical + r.high + r.medium + r.low
}

/// `[total_failures, critical, high, medium, low]`
pub fn feature_vector(r: &SeverityRecord) -> [f64; N_FEATURES] {
    [
        total_failures(r) as f64,
        r.critical as f64,
        r.high as f64,
        r.medium as f64,
        r.low as f64,
    ]
}
