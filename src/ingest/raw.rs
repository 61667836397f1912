//! Reader for raw semicolon-delimited scanner exports.

use std::collections::HashMap;

use super::IngestError;

pub const REQUIRED_COLUMNS: [&str; 4] = ["SERVICE_NAME", "STATUS", "SEVERITY", "TIMESTAMP"];

/// One scanner check result, projected to the columns the pipeline uses.
/// `None` marks a missing cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFinding {
    pub service_name: Option<String>,
    pub status: Option<String>,
    pub severity: Option<String>,
    pub timestamp: Option<String>,
}

/// Result of reading a raw export.
#[derive(Debug, Default)]
pub struct RawRead {
    pub findings: Vec<RawFinding>,
    /// Lines skipped because the reader rejected them or they carried more
    /// fields than the header.
    pub skipped_lines: usize,
}

/// Parse a raw export. Header names are matched case-insensitively.
pub fn read_findings(bytes: &[u8]) -> Result<RawRead, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let index: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_ascii_uppercase(), i))
        .collect();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !index.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns { missing });
    }

    let column = |name: &str| index[name];
    let (svc_i, status_i, sev_i, ts_i) = (
        column("SERVICE_NAME"),
        column("STATUS"),
        column("SEVERITY"),
        column("TIMESTAMP"),
    );

    let mut out = RawRead::default();
    for result in reader.records() {
        let row = match result {
            Ok(row) => row,
            Err(_) => {
                out.skipped_lines += 1;
                continue;
            }
        };
        if row.len() > headers.len() {
            out.skipped_lines += 1;
            continue;
        }

        out.findings.push(RawFinding {
            service_name: non_empty(row.get(svc_i)),
            status: non_empty(row.get(status_i)),
            severity: non_empty(row.get(sev_i)),
            timestamp: non_empty(row.get(ts_i)),
        });
    }

    Ok(out)
}

fn non_empty(cell: Option<&str>) -> Option<String> {
    cell.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
