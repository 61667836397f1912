//! Flat-file storage for the aggregated severity table.
//!
//! The table is the single interchange artifact between ingestion and the two
//! analysis stages. In-process runs pass [`SeverityTable`] directly; standalone
//! stage invocations go through [`load_table`] / [`save_table`].

pub mod schema;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("table file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("table is missing required column {column}")]
    MissingColumn { column: String },

    #[error("row {row}: invalid value {value:?} in column {column}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
}

/// Weights of the severity-weighted risk score.
pub const CRITICAL_WEIGHT: f64 = 3.0;
pub const HIGH_WEIGHT: f64 = 2.0;
pub const MEDIUM_WEIGHT: f64 = 1.0;
pub const LOW_WEIGHT: f64 = 0.5;

/// One row per (timestamp, service) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeverityRecord {
    pub timestamp: NaiveDateTime,
    pub service_name: String,
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    /// Severity-weighted score, not a count.
    pub total_findings: f64,
}

impl SeverityRecord {
    pub fn new(
        timestamp: NaiveDateTime,
        service_name: impl Into<String>,
        critical: u64,
        high: u64,
        medium: u64,
        low: u64,
    ) -> Self {
        Self {
            timestamp,
            service_name: service_name.into(),
            critical,
            high,
            medium,
            low,
            total_findings: weighted_score(critical, high, medium, low),
        }
    }
}

/// 3·critical + 2·high + 1·medium + 0.5·low
pub fn weighted_score(critical: u64, high: u64, medium: u64, low: u64) -> f64 {
    critical as f64 * CRITICAL_WEIGHT
        + high as f64 * HIGH_WEIGHT
        + medium as f64 * MEDIUM_WEIGHT
        + low as f64 * LOW_WEIGHT
}

/// Ordered collection of aggregated records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeverityTable {
    pub records: Vec<SeverityRecord>,
}

impl SeverityTable {
    pub fn new(records: Vec<SeverityRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SeverityRecord> {
        self.records.iter()
    }

    /// Number of distinct services in the table.
    pub fn service_count(&self) -> usize {
        let mut names: Vec<&str> = self.records.iter().map(|r| r.service_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }
}

/// Write the table to `path`, replacing any existing file.
///
/// The rows go to a sibling temp file first and are renamed into place, so a
/// failed write never leaves a truncated table behind.
pub fn save_table(path: &Path, table: &SeverityTable) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StorageError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let bytes = encode_table(table)?;
    let tmp_path = path.with_extension("csv.tmp");
    fs::write(&tmp_path, bytes).map_err(|source| StorageError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StorageError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    info!(path = %path.display(), rows = table.len(), "aggregated table written");
    Ok(())
}

/// Serialize the table to CSV bytes.
pub fn encode_table(table: &SeverityTable) -> Result<Vec<u8>, StorageError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(schema::HEADER)?;

    for r in &table.records {
        wtr.write_record([
            schema::format_timestamp(&r.timestamp),
            r.service_name.clone(),
            r.critical.to_string(),
            r.high.to_string(),
            r.low.to_string(),
            r.medium.to_string(),
            schema::format_float(r.total_findings),
        ])?;
    }

    wtr.into_inner()
        .map_err(|e| StorageError::Io {
            path: PathBuf::from("<buffer>"),
            source: e.into_error(),
        })
}

/// Load the table from `path`.
pub fn load_table(path: &Path) -> Result<SeverityTable, StorageError> {
    if !path.exists() {
        return Err(StorageError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table = decode_table(&content)?;
    debug!(path = %path.display(), rows = table.len(), "aggregated table loaded");
    Ok(table)
}

/// Parse CSV bytes into a table. Columns are matched by name; an absent or
/// empty count column reads as zero.
pub fn decode_table(bytes: &[u8]) -> Result<SeverityTable, StorageError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();
    let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h.trim(), i)).collect();

    for column in schema::REQUIRED {
        if !index.contains_key(column) {
            return Err(StorageError::MissingColumn {
                column: column.to_string(),
            });
        }
    }

    let mut records = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let row = result?;
        let count = |column: &str| -> Result<u64, StorageError> {
            let raw = cell(&row, &index, column);
            if raw.is_empty() {
                return Ok(0);
            }
            parse_count(raw).ok_or_else(|| StorageError::InvalidValue {
                row: row_idx + 1,
                column: column.to_string(),
                value: raw.to_string(),
            })
        };

        let ts_raw = cell(&row, &index, schema::COL_TIMESTAMP);
        let timestamp = schema::parse_timestamp(ts_raw).ok_or_else(|| StorageError::InvalidValue {
            row: row_idx + 1,
            column: schema::COL_TIMESTAMP.to_string(),
            value: ts_raw.to_string(),
        })?;

        records.push(SeverityRecord::new(
            timestamp,
            cell(&row, &index, schema::COL_SERVICE_NAME),
            count(schema::COL_CRITICAL)?,
            count(schema::COL_HIGH)?,
            count(schema::COL_MEDIUM)?,
            count(schema::COL_LOW)?,
        ));
    }

    Ok(SeverityTable::new(records))
}

fn cell<'a>(row: &'a csv::StringRecord, index: &HashMap<&str, usize>, column: &str) -> &'a str {
    index
        .get(column)
        .and_then(|&i| row.get(i))
        .map(str::trim)
        .unwrap_or("")
}

/// Counts may have been written as floats by other tools ("3.0").
fn parse_count(raw: &str) -> Option<u64> {
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 => Some(f as u64),
        _ => None,
    }
}
