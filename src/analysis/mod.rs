//! Supervised short-horizon risk classification.

pub mod labels;
pub mod model;
pub mod runner;
pub mod stats;

use thiserror::Error;

pub use labels::SeverityLabel;
pub use runner::{perform_risk_analysis, run, RiskAnalysis, RiskRow};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("insufficient data: need at least {needed} labelled rows, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("test_size must be within (0, 1), got {0}")]
    InvalidTestSize(f64),
}
