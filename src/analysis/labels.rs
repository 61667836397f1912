use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::analysis::AnalysisError;
use crate::features::{feature_vector, total_failures};
use crate::storage::{SeverityRecord, SeverityTable};

/// Headline severity shown for a row in the risk report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeverityLabel {
    Critical,
    High,
    #[serde(rename = "Medium/Low")]
    MediumLow,
}

impl SeverityLabel {
    pub fn of(record: &SeverityRecord) -> Self {
        if record.critical > 0 {
            SeverityLabel::Critical
        } else if record.high > 0 {
            SeverityLabel::High
        } else {
            SeverityLabel::MediumLow
        }
    }
}

impl fmt::Display for SeverityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SeverityLabel::Critical => "Critical",
            SeverityLabel::High => "High",
            SeverityLabel::MediumLow => "Medium/Low",
        })
    }
}

/// Median with the mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Feature rows paired with their `next_high_failure` label.
#[derive(Debug, Clone)]
pub struct LabelledSet {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    /// Median of `total_failures` over every row of the table.
    pub threshold: f64,
}

impl LabelledSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Label row `i` with 1 when row `i + 1` has more failures than the median.
///
/// The shift follows table order, which is sorted by (timestamp, service), so
/// with several services the "next" row usually belongs to a different one.
/// The final row has no successor and is dropped.
pub fn build_labels(table: &SeverityTable) -> Result<LabelledSet, AnalysisError> {
    let failures: Vec<f64> = table.iter().map(|r| total_failures(r) as f64).collect();
    let threshold = median(&failures).ok_or(AnalysisError::InsufficientData { needed: 2, have: 0 })?;

    if table.service_count() > 1 {
        debug!(
            services = table.service_count(),
            "label shift follows row order across interleaved services"
        );
    }

    let labelled = table.len().saturating_sub(1);
    if labelled < 2 {
        return Err(AnalysisError::InsufficientData {
            needed: 2,
            have: labelled,
        });
    }

    let features = table.iter().take(labelled).map(|r| feature_vector(r).to_vec()).collect();
    let labels = failures[1..].iter().map(|&next| usize::from(next > threshold)).collect();

    Ok(LabelledSet {
        features,
        labels,
        threshold,
    })
}
