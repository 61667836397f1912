//! Alert payloads and their delivery.
//!
//! Both downstream stages hand a [`Report`] to [`deliver`]; each variant knows
//! how to render its own text and whether it carries an attachment.

pub mod slack;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::analysis::{RiskAnalysis, RiskRow};
use crate::detect::engine::{AnomalyOutcome, AnomalyRow};
use crate::storage::schema::format_timestamp;

pub use slack::{ConsoleNotifier, DeliveryError, FileUpload, Notifier, SlackNotifier};

pub const ANOMALY_UPLOAD_TITLE: &str = "Anomaly Detection in Prowler Scan Results";
pub const ANOMALY_UPLOAD_COMMENT: &str = "Here is the anomaly detection graph for Prowler Scan Results.";

/// Anomalous rows plus the plot that goes with them.
#[derive(Debug, Clone)]
pub struct AnomalyReport {
    pub rows: Vec<AnomalyRow>,
    pub plot: PathBuf,
}

impl AnomalyReport {
    /// `None` when nothing was flagged; an empty anomaly set is never sent.
    pub fn from_outcome(outcome: &AnomalyOutcome, plot: &Path) -> Option<Self> {
        let rows: Vec<AnomalyRow> = outcome.anomalies().cloned().collect();
        if rows.is_empty() {
            return None;
        }
        Some(Self {
            rows,
            plot: plot.to_path_buf(),
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::from("*Anomaly Detection Report in Prowler Scan Results* :rotating_light:\n\n");
        out.push_str("*Timestamp* | *Service Name* | *Total Failures* | *Critical* | *High* | *Medium* | *Low*\n");
        out.push_str("----------- | ------------- | ----------------- | --------- | ------ | -------- | ------\n");
        for row in &self.rows {
            let r = &row.record;
            let _ = writeln!(
                out,
                "{} | {} | {} | {} | {} | {} | {}",
                format_timestamp(&r.timestamp),
                r.service_name,
                row.total_failures,
                r.critical,
                r.high,
                r.medium,
                r.low
            );
        }
        out
    }

    pub fn attachment(&self) -> FileUpload {
        let filename = self
            .plot
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "anomaly_detection_plot.png".to_string());
        FileUpload {
            path: self.plot.clone(),
            filename,
            title: ANOMALY_UPLOAD_TITLE.to_string(),
            initial_comment: ANOMALY_UPLOAD_COMMENT.to_string(),
        }
    }
}

/// Risk predictions for every row plus held-out evaluation.
#[derive(Debug, Clone)]
pub struct RiskReport {
    pub rows: Vec<RiskRow>,
    pub accuracy: f64,
    pub classification_report: String,
}

impl RiskReport {
    pub fn from_analysis(analysis: &RiskAnalysis) -> Self {
        Self {
            rows: analysis.rows.clone(),
            accuracy: analysis.accuracy,
            classification_report: analysis.classification_report.clone(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("*Automated Security Alert for All Services* :rotating_light:\n\n");
        out.push_str("*Service Name* | *Severity* | *Total Failures* | *Risk Level*\n");
        out.push_str("--- | --- | --- | ---\n");
        for row in &self.rows {
            let _ = writeln!(
                out,
                "{} | {} | {} | {}",
                row.service_name,
                row.severity,
                row.total_failures,
                if row.predicted_risk { "High" } else { "Low" }
            );
        }
        let _ = write!(
            out,
            "\n*Model Evaluation:*\nAccuracy: {:.2}\nClassification Report:\n```\n{}\n```\n",
            self.accuracy, self.classification_report
        );
        out
    }
}

#[derive(Debug, Clone)]
pub enum Report {
    Anomaly(AnomalyReport),
    Risk(RiskReport),
}

impl Report {
    pub fn kind(&self) -> &'static str {
        match self {
            Report::Anomaly(_) => "anomaly",
            Report::Risk(_) => "risk",
        }
    }

    pub fn render(&self) -> String {
        match self {
            Report::Anomaly(r) => r.render(),
            Report::Risk(r) => r.render(),
        }
    }

    pub fn attachment(&self) -> Option<FileUpload> {
        match self {
            Report::Anomaly(r) => Some(r.attachment()),
            Report::Risk(_) => None,
        }
    }
}

/// Post the text payload, then upload the attachment if there is one. Stops at
/// the first failure; nothing is retried.
pub async fn deliver(report: &Report, notifier: &dyn Notifier) -> Result<(), DeliveryError> {
    let text = report.render();
    notifier.post_text(&text).await?;
    info!(kind = report.kind(), bytes = text.len(), "report message delivered");

    if let Some(upload) = report.attachment() {
        notifier.upload_file(&upload).await?;
        info!(kind = report.kind(), file = %upload.path.display(), "report attachment delivered");
    }
    Ok(())
}
