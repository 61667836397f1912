//! Unsupervised anomaly detection over the aggregated severity table.

pub mod anomaly;
pub mod engine;
pub mod plot;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::report::{self, AnomalyReport, DeliveryError, Notifier, Report};
use crate::storage::SeverityTable;

pub use engine::{AnomalyEngine, AnomalyOutcome, AnomalyRow};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("insufficient data: need {needed} rows, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("contamination must be within [0, 0.5], got {0}")]
    InvalidContamination(f64),

    #[error("failed to render plot: {0}")]
    Plot(String),

    #[error("anomaly report cannot be delivered: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Score the table, render the plot and deliver the report when anything was
/// flagged. Missing upload credentials fail the stage before any work;
/// delivery failures after that are logged and leave the plot on disk.
pub async fn run(
    table: &SeverityTable,
    settings: &Settings,
    notifier: &dyn Notifier,
) -> Result<AnomalyOutcome, DetectError> {
    notifier.ensure_upload_credentials()?;

    let outcome = AnomalyEngine::new(settings.anomaly.clone()).detect(table)?;

    let plot_path = settings.paths.plot.as_path();
    plot::render(&outcome, plot_path)?;

    let Some(anomaly_report) = AnomalyReport::from_outcome(&outcome, plot_path) else {
        info!("no anomalies detected; nothing to deliver");
        return Ok(outcome);
    };

    match report::deliver(&Report::Anomaly(anomaly_report), notifier).await {
        Ok(()) => {
            if let Err(e) = std::fs::remove_file(plot_path) {
                warn!(path = %plot_path.display(), error = %e, "failed to remove delivered plot");
            }
        }
        Err(e) => {
            error!(error = %e, plot = %plot_path.display(), "anomaly report delivery failed; plot retained");
            if e.is_auth_failure() {
                warn!(
                    "check {} and {} (or the [slack] config section)",
                    crate::config::WEBHOOK_URL_ENV,
                    crate::config::API_TOKEN_ENV
                );
            }
        }
    }
    Ok(outcome)
}
