//! External compliance scanner wrapper: spawn, collect the CSV export, merge
//! it into the running results file.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Output;

use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::Settings;

pub const INSTALL_HINT: &str = "install it with `pip install prowler` and make sure it is on PATH";
pub const CREDENTIALS_HINT: &str = "log in to AWS with admin-privilege credentials (e.g. `aws configure` or AWS_PROFILE)";

const EXPORT_PREFIX: &str = "prowler-output-";

/// Exit status the scanner uses when it ran to completion but some checks
/// failed.
pub const FAILED_CHECKS_EXIT_CODE: i32 = 3;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("scanner binary {binary:?} not found; {}", INSTALL_HINT)]
    NotFound { binary: String },

    #[error("scanner could not find cloud credentials; {}", CREDENTIALS_HINT)]
    MissingCredentials { stderr: String },

    #[error("scanner exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("no prowler-output-*.csv export found in {}", dir.display())]
    NoOutput { dir: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How a fresh export was folded into the results file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No results file existed; the export became it.
    Created,
    /// Export rows (minus header) were appended.
    Appended { bytes: usize },
}

/// True when scanner stderr indicates absent cloud credentials.
pub fn looks_like_missing_credentials(stderr: &str) -> bool {
    stderr.contains("NoCredentialsError") || stderr.contains("Unable to locate credentials")
}

pub struct Scanner {
    binary: String,
    check: String,
    output_dir: PathBuf,
    results: PathBuf,
}

impl Scanner {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            binary: settings.scanner.binary.clone(),
            check: settings.scanner.check.clone(),
            output_dir: settings.paths.scan_output_dir.clone(),
            results: settings.paths.raw_results.clone(),
        }
    }

    /// `<binary> -v` exits successfully.
    pub async fn is_available(&self) -> bool {
        match Command::new(&self.binary).arg("-v").output().await {
            Ok(out) => out.status.success(),
            Err(_) => false,
        }
    }

    /// Run the scanner with `args`. Exit codes other than 0 and those in
    /// `accepted` are errors.
    async fn exec(&self, args: &[&str], accepted: &[i32]) -> Result<Output, ScannerError> {
        info!(binary = %self.binary, ?args, "running scanner");
        let output = Command::new(&self.binary).args(args).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScannerError::NotFound {
                    binary: self.binary.clone(),
                }
            } else {
                ScannerError::Io {
                    path: PathBuf::from(&self.binary),
                    source: e,
                }
            }
        })?;

        let code = output.status.code();
        if output.status.success() || code.is_some_and(|c| accepted.contains(&c)) {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if looks_like_missing_credentials(&stderr) {
            return Err(ScannerError::MissingCredentials { stderr });
        }
        Err(ScannerError::Failed {
            code: code.unwrap_or(-1),
            stderr,
        })
    }

    /// Health-check, export to CSV, then merge the export into the results
    /// file. The export step tolerates the failed-checks exit code; whether
    /// it produced a file is what decides success.
    pub async fn run_scan(&self) -> Result<MergeOutcome, ScannerError> {
        fs::create_dir_all(&self.output_dir).map_err(|source| ScannerError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        self.exec(&["-c", &self.check], &[]).await?;
        info!(check = %self.check, "scanner health check passed");

        let dir = self.output_dir.to_string_lossy().into_owned();
        let export = self
            .exec(&["-M", "csv", "-o", &dir], &[FAILED_CHECKS_EXIT_CODE])
            .await?;
        if export.status.code() == Some(FAILED_CHECKS_EXIT_CODE) {
            warn!("scanner reported failing checks");
        }

        let outcome = merge_output(&self.output_dir, &self.results)?;
        info!(results = %self.results.display(), ?outcome, "scanner output merged");
        Ok(outcome)
    }
}

/// Log a scanner failure with the matching operator hint.
pub fn report_failure(err: &ScannerError) {
    match err {
        ScannerError::MissingCredentials { stderr } => {
            error!(%stderr, "scanner failed: missing credentials");
            warn!("{}", CREDENTIALS_HINT);
        }
        ScannerError::NotFound { binary } => {
            error!(%binary, "scanner binary not found");
            warn!("{}", INSTALL_HINT);
        }
        other => error!(error = %other, "scanner run failed"),
    }
}

/// Newest `prowler-output-*.csv` in `dir`, by modification time.
pub fn latest_export(dir: &Path) -> Result<Option<PathBuf>, ScannerError> {
    let entries = fs::read_dir(dir).map_err(|source| ScannerError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !(name.starts_with(EXPORT_PREFIX) && name.ends_with(".csv")) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, p)| p))
}

/// Whether the file ends in `\n`. An empty file counts as terminated.
fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Fold the newest export in `dir` into `results`, then remove the export and
/// the scanner's `compliance/` directory.
pub fn merge_output(dir: &Path, results: &Path) -> Result<MergeOutcome, ScannerError> {
    let export = latest_export(dir)?.ok_or_else(|| ScannerError::NoOutput { dir: dir.to_path_buf() })?;
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ScannerError::Io { path, source }
    };

    let outcome = if !results.exists() {
        if let Some(parent) = results.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        fs::copy(&export, results).map_err(io_err(results))?;
        MergeOutcome::Created
    } else {
        let content = fs::read(&export).map_err(io_err(&export))?;
        let body = match content.iter().position(|&b| b == b'\n') {
            Some(i) => &content[i + 1..],
            None => &[][..],
        };

        let mut file = fs::OpenOptions::new()
            .read(true)
            .append(true)
            .open(results)
            .map_err(io_err(results))?;
        let needs_newline = !ends_with_newline(&mut file).map_err(io_err(results))?;
        if needs_newline && !body.is_empty() {
            file.write_all(b"\n").map_err(io_err(results))?;
        }
        file.write_all(body).map_err(io_err(results))?;
        MergeOutcome::Appended { bytes: body.len() }
    };

    if export.exists() {
        fs::remove_file(&export).map_err(io_err(&export))?;
    }
    let compliance = dir.join("compliance");
    if compliance.is_dir() {
        fs::remove_dir_all(&compliance).map_err(io_err(&compliance))?;
        info!(path = %compliance.display(), "removed compliance directory");
    }
    Ok(outcome)
}
