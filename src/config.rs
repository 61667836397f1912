//! TOML configuration for scanpulse.
//!
//! A layered model: compiled-in defaults, an optional TOML file, then a small
//! set of environment overrides for the Slack credentials. Stages receive the
//! resulting [`Settings`] explicitly and never read the environment
//! themselves.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "SCANPULSE_CONFIG";
pub const WEBHOOK_URL_ENV: &str = "SLACK_WEBHOOK_URL";
pub const API_TOKEN_ENV: &str = "SLACK_API_TOKEN";
pub const CHANNEL_ENV: &str = "SLACK_CHANNEL";
pub const API_BASE_ENV: &str = "SLACK_API_BASE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting {name} is not configured (set {env} or [slack] in the config file)")]
    MissingSetting { name: &'static str, env: &'static str },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded scanpulse configuration");
        Ok(settings)
    }

    /// Resolve the config file, in order:
    /// 1. `explicit` (the `--config` flag), which must load.
    /// 2. The path in `SCANPULSE_CONFIG`.
    /// 3. `./scanpulse.toml`.
    /// 4. Compiled-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SCANPULSE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new("scanpulse.toml");
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(error = %e, "scanpulse.toml exists but could not be loaded, using defaults");
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Apply Slack overrides from the process environment (after `.env`).
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply Slack overrides from an arbitrary lookup. Empty values are
    /// ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(WEBHOOK_URL_ENV) {
            self.slack.webhook_url = Some(v);
        }
        if let Some(v) = get(API_TOKEN_ENV) {
            self.slack.api_token = Some(v);
        }
        if let Some(v) = get(CHANNEL_ENV) {
            self.slack.channel = v;
        }
        if let Some(v) = get(API_BASE_ENV) {
            self.slack.api_base = v;
        }
    }

    /// Copy safe to print: the API token is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.slack.api_token.is_some() {
            copy.slack.api_token = Some("********".to_string());
        }
        copy
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// File locations shared by the stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory the scanner writes its CSV exports into.
    pub scan_output_dir: PathBuf,
    /// Merged raw scanner results (semicolon-delimited).
    pub raw_results: PathBuf,
    /// Aggregated severity table.
    pub aggregated_table: PathBuf,
    /// Anomaly plot image.
    pub plot: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scan_output_dir: PathBuf::from("output/aws"),
            raw_results: PathBuf::from("output/aws/prowler_results.csv"),
            aggregated_table: PathBuf::from("output_pre/prowler_aggregated_severity_counts.csv"),
            plot: PathBuf::from("anomaly_detection_plot.png"),
        }
    }
}

// ---------------------------------------------------------------------------
// Slack
// ---------------------------------------------------------------------------

/// Messaging endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Incoming-webhook URL for text alerts.
    pub webhook_url: Option<String>,
    /// Bearer token for the file upload API.
    pub api_token: Option<String>,
    /// Channel name or ID the plot is uploaded to.
    pub channel: String,
    /// Base URL of the Web API (`files.upload` is appended).
    pub api_base: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            api_token: None,
            channel: "#scanresult".to_string(),
            api_base: "https://slack.com/api".to_string(),
            timeout_secs: 30,
        }
    }
}

impl SlackConfig {
    pub fn require_webhook_url(&self) -> Result<&str, ConfigError> {
        self.webhook_url.as_deref().ok_or(ConfigError::MissingSetting {
            name: "slack.webhook_url",
            env: WEBHOOK_URL_ENV,
        })
    }

    pub fn require_api_token(&self) -> Result<&str, ConfigError> {
        self.api_token.as_deref().ok_or(ConfigError::MissingSetting {
            name: "slack.api_token",
            env: API_TOKEN_ENV,
        })
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Isolation Forest hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Expected fraction of outliers; sets the decision threshold.
    pub contamination: f64,
    pub n_estimators: usize,
    /// Subsample size per tree (capped at the number of rows).
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
        }
    }
}

/// Random Forest hyperparameters and train/test protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of labelled rows held out for evaluation.
    pub test_size: f64,
    pub n_estimators: usize,
    pub seed: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            n_estimators: 100,
            seed: 42,
        }
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// External scanner invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Binary name or path.
    pub binary: String,
    /// Check used as a credential/health probe before the full export.
    pub check: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            binary: "prowler".to_string(),
            check: "check0".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Settings::default();

        assert_eq!(cfg.paths.raw_results, PathBuf::from("output/aws/prowler_results.csv"));
        assert_eq!(
            cfg.paths.aggregated_table,
            PathBuf::from("output_pre/prowler_aggregated_severity_counts.csv")
        );
        assert_eq!(cfg.paths.plot, PathBuf::from("anomaly_detection_plot.png"));

        assert!(cfg.slack.webhook_url.is_none());
        assert!(cfg.slack.api_token.is_none());
        assert_eq!(cfg.slack.channel, "#scanresult");
        assert_eq!(cfg.slack.api_base, "https://slack.com/api");

        assert_eq!(cfg.anomaly.contamination, 0.05);
        assert_eq!(cfg.anomaly.n_estimators, 100);
        assert_eq!(cfg.anomaly.seed, 42);
        assert_eq!(cfg.risk.test_size, 0.2);
        assert_eq!(cfg.risk.seed, 42);

        assert_eq!(cfg.scanner.binary, "prowler");
        assert_eq!(cfg.scanner.check, "check0");
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r##"
[paths]
raw_results = "/data/prowler.csv"
aggregated_table = "/data/agg.csv"
plot = "/tmp/plot.png"

[slack]
webhook_url = "https://hooks.slack.com/services/T/B/X"
channel = "#secops"

[anomaly]
contamination = 0.1
seed = 7

[risk]
test_size = 0.25

[logging]
level = "debug"
json = true
"##;

        let cfg: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.paths.raw_results, PathBuf::from("/data/prowler.csv"));
        assert_eq!(cfg.paths.scan_output_dir, PathBuf::from("output/aws"));
        assert_eq!(
            cfg.slack.webhook_url.as_deref(),
            Some("https://hooks.slack.com/services/T/B/X")
        );
        assert_eq!(cfg.slack.channel, "#secops");
        assert_eq!(cfg.anomaly.contamination, 0.1);
        assert_eq!(cfg.anomaly.seed, 7);
        assert_eq!(cfg.anomaly.n_estimators, 100);
        assert_eq!(cfg.risk.test_size, 0.25);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: Settings = toml::from_str("").unwrap();
        let defaults = Settings::default();
        assert_eq!(cfg.paths.aggregated_table, defaults.paths.aggregated_table);
        assert_eq!(cfg.slack.api_base, defaults.slack.api_base);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (WEBHOOK_URL_ENV, "http://127.0.0.1:9/hook"),
            (API_TOKEN_ENV, "xoxb-test"),
            (CHANNEL_ENV, ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = Settings::default();
        cfg.apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.slack.webhook_url.as_deref(), Some("http://127.0.0.1:9/hook"));
        assert_eq!(cfg.slack.api_token.as_deref(), Some("xoxb-test"));
        // Empty values do not clobber defaults.
        assert_eq!(cfg.slack.channel, "#scanresult");
    }

    #[test]
    fn test_require_credentials() {
        let mut slack = SlackConfig::default();
        assert!(matches!(
            slack.require_webhook_url(),
            Err(ConfigError::MissingSetting { env: WEBHOOK_URL_ENV, .. })
        ));
        slack.api_token = Some("xoxb".into());
        assert_eq!(slack.require_api_token().unwrap(), "xoxb");
    }

    #[test]
    fn test_redacted_masks_token() {
        let mut cfg = Settings::default();
        cfg.slack.api_token = Some("xoxb-secret".into());
        let shown = toml::to_string_pretty(&cfg.redacted()).unwrap();
        assert!(!shown.contains("xoxb-secret"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scanpulse.toml");
        std::fs::write(&path, "[scanner]\nbinary = \"/opt/prowler/bin/prowler\"\n").unwrap();

        let cfg = Settings::load(&path).unwrap();
        assert_eq!(cfg.scanner.binary, "/opt/prowler/bin/prowler");
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(Settings::load(Path::new("/nonexistent/scanpulse.toml")).is_err());
        assert!(Settings::load_or_default(Some(Path::new("/nonexistent/scanpulse.toml"))).is_err());
    }
}
