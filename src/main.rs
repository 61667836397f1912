use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scanpulse::config::Settings;
use scanpulse::report::{ConsoleNotifier, Notifier, SlackNotifier};
use scanpulse::scanner::{self, Scanner};
use scanpulse::{analysis, detect, ingest, storage};

#[derive(Parser)]
#[command(
    name = "scanpulse",
    about = "Compliance-scan anomaly detection and risk alerting",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the external scanner and merge its CSV export into the raw results
    Scan,

    /// Check whether the scanner binary is installed
    ScannerStatus,

    /// Aggregate raw scanner findings into the severity table
    Ingest {
        /// Raw semicolon-delimited scanner CSV
        #[arg(long)]
        input: Option<PathBuf>,

        /// Aggregated table output path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Flag anomalous rows of the aggregated table and send the report
    Detect {
        /// Aggregated table to read
        #[arg(long)]
        table: Option<PathBuf>,

        /// Print the report instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Train the risk classifier, score every row and send the report
    Classify {
        /// Aggregated table to read
        #[arg(long)]
        table: Option<PathBuf>,

        /// Print the report instead of sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Ingest, detect and classify in one run
    Run {
        /// Invoke the scanner first
        #[arg(long)]
        scan: bool,

        /// Print reports instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration (token redacted)
    ShowConfig,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn notifier(settings: &Settings, dry_run: bool) -> Result<Box<dyn Notifier>> {
    if dry_run {
        return Ok(Box::new(ConsoleNotifier));
    }
    let slack = SlackNotifier::from_settings(&settings.slack).context("Slack delivery is not configured")?;
    Ok(Box::new(slack))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    // Config fallbacks are reported before the configured subscriber exists.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_writer(std::io::stderr)
        .finish();
    let mut settings =
        tracing::subscriber::with_default(bootstrap, || Settings::load_or_default(cli.config.as_deref()))?;
    settings.apply_env();

    init_tracing(&settings.logging.level, cli.log_json || settings.logging.json);

    match cli.command {
        Commands::Scan => {
            let scanner = Scanner::from_settings(&settings);
            match scanner.run_scan().await {
                Ok(outcome) => println!(
                    "Scanner output merged into {} ({:?})",
                    settings.paths.raw_results.display(),
                    outcome
                ),
                Err(e) => {
                    scanner::report_failure(&e);
                    return Err(e.into());
                }
            }
        }
        Commands::ScannerStatus => {
            let scanner = Scanner::from_settings(&settings);
            if scanner.is_available().await {
                println!("{}: available", settings.scanner.binary);
            } else {
                println!("{}: not available ({})", settings.scanner.binary, scanner::INSTALL_HINT);
                std::process::exit(1);
            }
        }
        Commands::Ingest { input, output } => {
            let input = input.unwrap_or_else(|| settings.paths.raw_results.clone());
            let output = output.unwrap_or_else(|| settings.paths.aggregated_table.clone());
            let table = ingest::ingest_file(&input, &output)?;
            println!("Aggregated {} rows into {}", table.len(), output.display());
        }
        Commands::Detect { table, dry_run } => {
            let path = table.unwrap_or_else(|| settings.paths.aggregated_table.clone());
            let table = storage::load_table(&path)?;
            let notifier = notifier(&settings, dry_run)?;
            let outcome = detect::run(&table, &settings, notifier.as_ref()).await?;
            println!("{} of {} rows flagged as anomalous", outcome.anomaly_count(), outcome.rows.len());
        }
        Commands::Classify { table, dry_run } => {
            let path = table.unwrap_or_else(|| settings.paths.aggregated_table.clone());
            let table = storage::load_table(&path)?;
            let notifier = notifier(&settings, dry_run)?;
            let analysis = analysis::run(&table, &settings, notifier.as_ref()).await?;
            println!(
                "Accuracy {:.2}; {} of {} rows predicted high risk",
                analysis.accuracy,
                analysis.high_risk_count(),
                analysis.rows.len()
            );
        }
        Commands::Run { scan, dry_run } => {
            let notifier = notifier(&settings, dry_run)?;
            let summary = scanpulse::run_pipeline(&settings, notifier.as_ref(), scan).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&settings.redacted())?);
        }
    }

    Ok(())
}
