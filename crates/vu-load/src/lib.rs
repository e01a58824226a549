//! Virtual-user load generator for HTTP services.
//!
//! This crate provides tools to:
//! - Load a validated run specification from environment-style settings
//! - Drive a fixed number of concurrent virtual users until a deadline
//! - Aggregate per-request outcomes into latency and failure statistics
//! - Evaluate a failure-rate threshold and output results (console, JSON, CSV)

pub mod client;
pub mod config;
pub mod driver;
pub mod metrics;
pub mod report;

pub use client::{RequestOutcome, TargetClient};
pub use config::{ConfigError, RunSpec};
pub use driver::{
    DriverError, DriverState, LoadDriver, RunReport, RunStatus, EXIT_THRESHOLD_FAILED,
};
pub use metrics::{LatencySummary, MetricsCollector, RunResult};
pub use report::ResultsReport;
