use serde::Serialize;
use tracing::{debug, info};

use crate::config::AnomalyConfig;
use crate::detect::anomaly::IsolationForest;
use crate::detect::DetectError;
use crate::features::{feature_vector, total_failures};
use crate::storage::{SeverityRecord, SeverityTable};

/// An aggregated record scored by the outlier model.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRow {
    pub record: SeverityRecord,
    pub total_failures: u64,
    pub anomaly_flag: bool,
    /// Margin against the contamination threshold; negative is anomalous.
    pub score: f64,
}

/// Every row of the table with its anomaly label, in table order.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyOutcome {
    pub rows: Vec<AnomalyRow>,
    pub threshold: f64,
}

impl AnomalyOutcome {
    pub fn anomalies(&self) -> impl Iterator<Item = &AnomalyRow> {
        self.rows.iter().filter(|r| r.anomaly_flag)
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies().count()
    }

    pub fn has_anomalies(&self) -> bool {
        self.rows.iter().any(|r| r.anomaly_flag)
    }
}

pub struct AnomalyEngine {
    config: AnomalyConfig,
}

impl AnomalyEngine {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Fit the forest on the table and label every row.
    pub fn detect(&self, table: &SeverityTable) -> Result<AnomalyOutcome, DetectError> {
        info!(rows = table.len(), contamination = self.config.contamination, "running anomaly detection");

        let features: Vec<Vec<f64>> = table.iter().map(|r| feature_vector(r).to_vec()).collect();
        let forest = IsolationForest::fit(&features, &self.config)?;

        let rows: Vec<AnomalyRow> = table
            .iter()
            .zip(&features)
            .map(|(record, x)| {
                let score = forest.decision_function(x);
                AnomalyRow {
                    record: record.clone(),
                    total_failures: total_failures(record),
                    anomaly_flag: score < 0.0,
                    score,
                }
            })
            .collect();

        let outcome = AnomalyOutcome {
            rows,
            threshold: forest.offset(),
        };
        for a in outcome.anomalies() {
            debug!(
                timestamp = %a.record.timestamp,
                service = %a.record.service_name,
                total_failures = a.total_failures,
                score = a.score,
                "anomalous row"
            );
        }
        info!(anomalies = outcome.anomaly_count(), "anomaly detection complete");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::parse_timestamp;

    fn table_with_spike() -> SeverityTable {
        let mut records = Vec::new();
        for day in 1..=28 {
            let ts = parse_timestamp(&format!("2024-10-{:02} 08:00:00", day)).unwrap();
            records.push(SeverityRecord::new(ts, "iam", 1, 2, 3, (day % 3) as u64));
        }
        let spike = parse_timestamp("2024-10-29 08:00:00").unwrap();
        records.push(SeverityRecord::new(spike, "iam", 25, 30, 4, 1));
        SeverityTable::new(records)
    }

    #[test]
    fn test_spike_row_flagged() {
        let engine = AnomalyEngine::new(AnomalyConfig::default());
        let outcome = engine.detect(&table_with_spike()).unwrap();

        assert_eq!(outcome.rows.len(), 29);
        let last = outcome.rows.last().unwrap();
        assert!(last.anomaly_flag);
        assert_eq!(last.total_failures, 60);
        assert!(outcome.has_anomalies());
    }

    #[test]
    fn test_flags_are_deterministic() {
        let engine = AnomalyEngine::new(AnomalyConfig::default());
        let a = engine.detect(&table_with_spike()).unwrap();
        let b = engine.detect(&table_with_spike()).unwrap();
        let fa: Vec<bool> = a.rows.iter().map(|r| r.anomaly_flag).collect();
        let fb: Vec<bool> = b.rows.iter().map(|r| r.anomaly_flag).collect();
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_total_failures_is_unweighted() {
        let engine = AnomalyEngine::new(AnomalyConfig::default());
        let outcome = engine.detect(&table_with_spike()).unwrap();
        for row in &outcome.rows {
            let r = &row.record;
            assert_eq!(row.total_failures, r.critical + r.high + r.medium + r.low);
        }
    }

    #[test]
    fn test_empty_table_is_an_error() {
        let engine = AnomalyEngine::new(AnomalyConfig::default());
        assert!(engine.detect(&SeverityTable::default()).is_err());
    }
}
