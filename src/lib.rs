//! ScanPulse -- compliance-scan aggregation, anomaly detection and risk alerts.
//!
//! The pipeline runs scanner export → aggregated severity table → (anomaly
//! report, risk report). The two report stages consume the same table
//! independently.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod features;
pub mod ingest;
pub mod report;
pub mod scanner;
pub mod storage;

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::Settings;
use crate::report::Notifier;

/// What a full pipeline run produced. A stage that failed leaves its field
/// `None`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub rows: usize,
    pub anomalies: Option<usize>,
    pub high_risk: Option<usize>,
}

/// Run ingestion and both report stages, optionally invoking the scanner
/// first. Scanner failures are logged and the run carries on with whatever
/// raw results already exist. Ingestion failure aborts the run; a failure in
/// one report stage does not stop the other, but the run still returns an
/// error afterwards.
pub async fn run_pipeline(settings: &Settings, notifier: &dyn Notifier, scan: bool) -> Result<PipelineSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("pipeline", %run_id);

    async move {
        if scan {
            let scanner = scanner::Scanner::from_settings(settings);
            if let Err(e) = scanner.run_scan().await {
                scanner::report_failure(&e);
            }
        }

        let table = ingest::ingest_file(&settings.paths.raw_results, &settings.paths.aggregated_table)?;

        let anomalies = match detect::run(&table, settings, notifier).await {
            Ok(outcome) => Some(outcome.anomaly_count()),
            Err(e) => {
                error!(error = %e, "anomaly detection failed");
                None
            }
        };

        let high_risk = match analysis::run(&table, settings, notifier).await {
            Ok(analysis) => Some(analysis.high_risk_count()),
            Err(e) => {
                error!(error = %e, "risk analysis failed");
                None
            }
        };

        let summary = PipelineSummary {
            run_id,
            rows: table.len(),
            anomalies,
            high_risk,
        };
        if summary.anomalies.is_none() || summary.high_risk.is_none() {
            anyhow::bail!("pipeline run {} finished with failed stages", run_id);
        }
        info!(rows = summary.rows, anomalies = ?summary.anomalies, high_risk = ?summary.high_risk, "pipeline complete");
        Ok(summary)
    }
    .instrument(span)
    .await
}
