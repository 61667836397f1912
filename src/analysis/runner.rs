use serde::Serialize;
use tracing::{error, info, warn};

use crate::analysis::labels::{build_labels, SeverityLabel};
use crate::analysis::model::RandomForest;
use crate::analysis::stats::{accuracy, classification_report, train_test_split};
use crate::analysis::AnalysisError;
use crate::config::{RiskConfig, Settings};
use crate::features::{feature_vector, total_failures};
use crate::report::{self, Notifier, Report, RiskReport};
use crate::storage::SeverityTable;

/// A scored row of the full table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskRow {
    pub service_name: String,
    pub severity: SeverityLabel,
    pub total_failures: u64,
    pub predicted_risk: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAnalysis {
    /// Median `total_failures` used to label the training rows.
    pub threshold: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub accuracy: f64,
    pub classification_report: String,
    /// One entry per table row, in table order.
    pub rows: Vec<RiskRow>,
}

impl RiskAnalysis {
    pub fn high_risk_count(&self) -> usize {
        self.rows.iter().filter(|r| r.predicted_risk).count()
    }
}

/// Label, split, train, evaluate, then score every row of `table`.
pub fn perform_risk_analysis(table: &SeverityTable, config: &RiskConfig) -> Result<RiskAnalysis, AnalysisError> {
    info!(rows = table.len(), "starting risk analysis");

    let labelled = build_labels(table)?;
    let split = train_test_split(labelled.len(), config.test_size, config.seed)?;

    let pick = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<usize>) {
        idx.iter()
            .map(|&i| (labelled.features[i].clone(), labelled.labels[i]))
            .unzip()
    };
    let (x_train, y_train) = pick(&split.train);
    let (x_test, y_test) = pick(&split.test);

    let forest = RandomForest::fit(&x_train, &y_train, config)?;

    let y_pred: Vec<usize> = x_test.iter().map(|x| forest.predict(x)).collect();
    let acc = accuracy(&y_test, &y_pred);
    let report_text = classification_report(&y_test, &y_pred);

    let rows: Vec<RiskRow> = table
        .iter()
        .map(|record| RiskRow {
            service_name: record.service_name.clone(),
            severity: SeverityLabel::of(record),
            total_failures: total_failures(record),
            predicted_risk: forest.predict(&feature_vector(record)) == 1,
        })
        .collect();

    let analysis = RiskAnalysis {
        threshold: labelled.threshold,
        train_rows: x_train.len(),
        test_rows: x_test.len(),
        accuracy: acc,
        classification_report: report_text,
        rows,
    };
    info!(
        threshold = analysis.threshold,
        train = analysis.train_rows,
        test = analysis.test_rows,
        accuracy = analysis.accuracy,
        high_risk = analysis.high_risk_count(),
        "risk analysis complete"
    );
    Ok(analysis)
}

/// Run the analysis and deliver the report. Delivery failures are logged and
/// do not fail the stage.
pub async fn run(
    table: &SeverityTable,
    settings: &Settings,
    notifier: &dyn Notifier,
) -> Result<RiskAnalysis, AnalysisError> {
    let analysis = perform_risk_analysis(table, &settings.risk)?;

    let risk_report = Report::Risk(RiskReport::from_analysis(&analysis));
    if let Err(e) = report::deliver(&risk_report, notifier).await {
        error!(error = %e, "risk report delivery failed");
        if e.is_auth_failure() {
            warn!("check {} (or slack.webhook_url in the config)", crate::config::WEBHOOK_URL_ENV);
        }
    }
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::testing::RecordingNotifier;
    use crate::storage::schema::parse_timestamp;
    use crate::storage::SeverityRecord;

    fn table(n: usize) -> SeverityTable {
        let records = (0..n)
            .map(|i| {
                let ts = parse_timestamp(&format!("2024-10-{:02} 08:00:00", i + 1)).unwrap();
                let (c, h) = if i % 3 == 0 { (4, 2) } else { (0, 1) };
                SeverityRecord::new(ts, "iam", c, h, (i % 4) as u64, 1)
            })
            .collect();
        SeverityTable::new(records)
    }

    #[test]
    fn test_scores_every_row() {
        let analysis = perform_risk_analysis(&table(20), &RiskConfig::default()).unwrap();
        assert_eq!(analysis.rows.len(), 20);
        // 19 labelled rows, ceil(0.2 * 19) = 4 held out
        assert_eq!(analysis.test_rows, 4);
        assert_eq!(analysis.train_rows, 15);
        assert!((0.0..=1.0).contains(&analysis.accuracy));
        assert!(analysis.classification_report.contains("weighted avg"));
        assert_eq!(analysis.rows[0].severity, SeverityLabel::Critical);
        assert_eq!(analysis.rows[1].severity, SeverityLabel::High);
    }

    #[test]
    fn test_deterministic() {
        let a = perform_risk_analysis(&table(20), &RiskConfig::default()).unwrap();
        let b = perform_risk_analysis(&table(20), &RiskConfig::default()).unwrap();
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.accuracy, b.accuracy);
    }

    #[test]
    fn test_two_rows_is_insufficient() {
        assert!(matches!(
            perform_risk_analysis(&table(2), &RiskConfig::default()),
            Err(AnalysisError::InsufficientData { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_sends_one_message() {
        let notifier = RecordingNotifier::default();
        let settings = Settings::default();
        run(&table(12), &settings, &notifier).await.unwrap();
        let texts = notifier.texts.lock().unwrap();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("*Automated Security Alert for All Services*"));
        assert_eq!(texts[0].matches("\niam | ").count(), 12);
        assert!(notifier.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_not_fatal() {
        let notifier = RecordingNotifier {
            fail_text: true,
            ..Default::default()
        };
        assert!(run(&table(12), &Settings::default(), &notifier).await.is_ok());
    }
}
