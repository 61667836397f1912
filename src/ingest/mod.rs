//! Scan result ingestion: raw scanner export → aggregated severity table.

pub mod aggregate;
pub mod raw;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::storage::{self, SeverityTable, StorageError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("raw scan results not found at {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("required columns not found: {}. Please verify the CSV structure", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Read, validate and aggregate raw scan bytes without touching disk.
pub fn ingest_bytes(bytes: &[u8]) -> Result<SeverityTable, IngestError> {
    let read = raw::read_findings(bytes)?;
    if read.skipped_lines > 0 {
        warn!(skipped = read.skipped_lines, "skipped malformed lines in raw scan export");
    }

    let (table, stats) = aggregate::aggregate(&read.findings);
    info!(
        input_rows = stats.input_rows,
        dropped_bad_timestamp = stats.dropped_bad_timestamp,
        filled_unknown = stats.filled_unknown,
        unrecognized_severity = stats.unrecognized_severity,
        failed_checks = stats.failed_checks,
        groups = table.len(),
        "aggregated scan findings"
    );
    Ok(table)
}

/// Run the ingestion stage: aggregate `input` and overwrite the table at
/// `output`. Nothing is written when validation fails.
pub fn ingest_file(input: &Path, output: &Path) -> Result<SeverityTable, IngestError> {
    if !input.exists() {
        return Err(IngestError::InputNotFound {
            path: input.to_path_buf(),
        });
    }
    let bytes = std::fs::read(input).map_err(|source| IngestError::Read {
        path: input.to_path_buf(),
        source,
    })?;

    let table = ingest_bytes(&bytes)?;
    storage::save_table(output, &table)?;
    info!(input = %input.display(), output = %output.display(), "aggregated data saved");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "TIMESTAMP;SERVICE_NAME;STATUS;SEVERITY;CHECK_ID\n\
        2024-10-01 08:00:00;iam;FAIL;critical;iam_root_mfa\n\
        2024-10-01 08:00:00;iam;FAIL;critical;iam_no_keys\n\
        2024-10-01 08:00:00;iam;FAIL;high;iam_password_policy\n\
        2024-10-02 08:00:00;iam;FAIL;medium;iam_rotate\n\
        2024-10-02 08:00:00;iam;FAIL;low;iam_a\n\
        2024-10-02 08:00:00;iam;FAIL;low;iam_b\n\
        2024-10-02 08:00:00;iam;PASS;low;iam_c\n\
        garbage;iam;FAIL;low;iam_d\n";

    #[test]
    fn test_ingest_iam_scenario() {
        let table = ingest_bytes(RAW.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].total_findings, 8.0);
        assert_eq!(table.records[1].total_findings, 2.5);
    }

    #[test]
    fn test_ingest_file_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("prowler_results.csv");
        let output = dir.path().join("output_pre").join("aggregated.csv");
        std::fs::write(&input, RAW).unwrap();

        ingest_file(&input, &output).unwrap();
        let first = std::fs::read_to_string(&output).unwrap();
        ingest_file(&input, &output).unwrap();
        let second = std::fs::read_to_string(&output).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.lines().count(), 3);
    }

    #[test]
    fn test_missing_columns_write_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("raw.csv");
        let output = dir.path().join("out").join("aggregated.csv");
        std::fs::write(&input, "SERVICE_NAME;STATUS\niam;FAIL\n").unwrap();

        let err = ingest_file(&input, &output).unwrap_err();
        assert!(matches!(err, IngestError::MissingColumns { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_missing_input_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = ingest_file(&dir.path().join("absent.csv"), &dir.path().join("out.csv")).unwrap_err();
        assert!(matches!(err, IngestError::InputNotFound { .. }));
    }
}
