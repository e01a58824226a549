//! Load test CLI: virtual users against one HTTP endpoint.

use std::collections::HashMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vu_load::config::keys;
use vu_load::{LoadDriver, ResultsReport, RunSpec};

#[derive(Parser, Debug)]
#[command(name = "vu-load")]
#[command(about = "Virtual-user load generator for HTTP services", long_about = None)]
struct Args {
    /// Number of virtual users (overrides VUS)
    #[arg(short, long)]
    vus: Option<String>,

    /// Run duration, e.g. 30s or 2m (overrides DURATION)
    #[arg(short, long)]
    duration: Option<String>,

    /// Target URL (overrides TARGET_URL)
    #[arg(short, long)]
    target_url: Option<String>,

    /// Query parameters as key=value&key2=value2 (overrides REQUEST_PARAMS)
    #[arg(long)]
    params: Option<String>,

    /// Think time between requests of one virtual user (overrides SLEEP_INTERVAL)
    #[arg(long)]
    sleep: Option<String>,

    /// Per-request timeout (overrides REQUEST_TIMEOUT)
    #[arg(long)]
    timeout: Option<String>,

    /// Maximum acceptable failure rate in [0, 1] (overrides FAILURE_THRESHOLD)
    #[arg(short, long)]
    failure_threshold: Option<String>,

    /// Output format: table (default), json, csv
    #[arg(short, long, default_value = "table")]
    output: String,

    /// Show a progress bar on stderr
    #[arg(long)]
    progress: bool,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    /// Command line values, keyed like the environment they override.
    fn overrides(&self) -> HashMap<&'static str, String> {
        [
            (keys::VUS.0, &self.vus),
            (keys::DURATION.0, &self.duration),
            (keys::TARGET_URL.0, &self.target_url),
            (keys::REQUEST_PARAMS.0, &self.params),
            (keys::SLEEP_INTERVAL.0, &self.sleep),
            (keys::REQUEST_TIMEOUT.0, &self.timeout),
            (keys::FAILURE_THRESHOLD.0, &self.failure_threshold),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|v| (key, v)))
        .collect()
    }
}

fn init_tracing(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if args.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Resolve the run specification: command line first, then `fallback`.
fn load_spec<F>(args: &Args, fallback: F) -> Result<RunSpec>
where
    F: Fn(&str) -> Option<String>,
{
    RunSpec::from_layers(&args.overrides(), fallback).context("invalid load test configuration")
}

/// Run one load test, print the report and return the process exit code.
async fn execute<F>(args: &Args, fallback: F) -> Result<u8>
where
    F: Fn(&str) -> Option<String>,
{
    let spec = load_spec(args, fallback)?;

    info!(
        virtual_users = spec.virtual_users(),
        duration = ?spec.duration(),
        target_url = %spec.target_url(),
        threshold = ?spec.failure_threshold(),
        "Configuration loaded"
    );

    let mut driver = LoadDriver::new(spec)?.with_progress(args.progress);
    let report = driver.run().await?;

    match args.output.as_str() {
        "json" => {
            println!("{}", ResultsReport::format_json(&report)?);
        }
        "csv" => {
            println!("{}", ResultsReport::csv_header());
            println!("{}", ResultsReport::format_csv(&report));
        }
        _ => {
            println!("{}", ResultsReport::format_table(&report));
        }
    }

    Ok(report.status.exit_code())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args)?;

    let code = execute(&args, |key| std::env::var(key).ok()).await?;
    Ok(ExitCode::from(code))
}
