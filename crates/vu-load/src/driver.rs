//! Virtual-user orchestration and threshold evaluation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::client::TargetClient;
use crate::config::RunSpec;
use crate::metrics::{MetricsCollector, RunResult};

/// Errors that stop the driver itself. Failed requests never end up here.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("load driver already used (state: {0})")]
    AlreadyStarted(DriverState),

    #[error("run duration {0:?} is out of range")]
    DurationOverflow(Duration),

    #[error("virtual user task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("failed to merge latency histograms: {0}")]
    Metrics(String),
}

/// Lifecycle of a driver. A driver runs exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    NotStarted,
    Running,
    Passed,
    /// The run completed and breached its failure threshold.
    Failed,
    /// The run stopped without a result, e.g. a virtual user task panicked.
    Aborted,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverState::NotStarted => "NOT_STARTED",
            DriverState::Running => "RUNNING",
            DriverState::Passed => "PASSED",
            DriverState::Failed => "FAILED",
            DriverState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Exit code for a completed run that breached its failure threshold.
pub const EXIT_THRESHOLD_FAILED: u8 = 99;

/// Outcome of the threshold check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunStatus {
    Passed,
    Failed { failure_rate: f64, threshold: f64 },
}

impl RunStatus {
    /// A run fails only when a threshold is set and the failure rate exceeds it.
    pub fn evaluate(result: &RunResult, threshold: Option<f64>) -> Self {
        let failure_rate = result.failure_rate();
        match threshold {
            Some(threshold) if failure_rate > threshold => RunStatus::Failed {
                failure_rate,
                threshold,
            },
            _ => RunStatus::Passed,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, RunStatus::Passed)
    }

    /// Process exit code: 0 when passed, 99 when the threshold was breached.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Passed => 0,
            RunStatus::Failed { .. } => EXIT_THRESHOLD_FAILED,
        }
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if self.is_passed() { "PASSED" } else { "FAILED" })
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Passed => f.write_str("PASSED"),
            RunStatus::Failed {
                failure_rate,
                threshold,
            } => write!(
                f,
                "FAILED (failure rate {:.2}% > threshold {:.2}%)",
                failure_rate * 100.0,
                threshold * 100.0
            ),
        }
    }
}

/// Aggregated results plus the pass/fail verdict.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: RunResult,
    pub threshold: Option<f64>,
    pub status: RunStatus,
}

impl Serialize for RunReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Document<'a> {
            #[serde(flatten)]
            result: &'a RunResult,
            failure_rate: f64,
            threshold: Option<f64>,
            status: RunStatus,
        }

        Document {
            result: &self.result,
            failure_rate: self.result.failure_rate(),
            threshold: self.threshold,
            status: self.status,
        }
        .serialize(serializer)
    }
}

/// Runs a fixed number of virtual users against the target until the deadline.
pub struct LoadDriver {
    spec: Arc<RunSpec>,
    client: Arc<TargetClient>,
    state: DriverState,
    show_progress: bool,
}

impl LoadDriver {
    /// Create a new load driver. No request is sent until `run`.
    pub fn new(spec: RunSpec) -> Result<Self, DriverError> {
        let client = TargetClient::new(&spec)?;
        Ok(Self {
            spec: Arc::new(spec),
            client: Arc::new(client),
            state: DriverState::NotStarted,
            show_progress: false,
        })
    }

    /// Draw a progress bar on stderr while running.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn spec(&self) -> &RunSpec {
        &self.spec
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Run the load test.
    ///
    /// Every virtual user checks the deadline before each iteration; a
    /// request already in flight when the deadline passes runs to completion.
    pub async fn run(&mut self) -> Result<RunReport, DriverError> {
        if self.state != DriverState::NotStarted {
            return Err(DriverError::AlreadyStarted(self.state));
        }

        let duration = self.spec.duration();
        let start = Instant::now();
        let deadline = start
            .checked_add(duration)
            .ok_or(DriverError::DurationOverflow(duration))?;

        self.state = DriverState::Running;
        info!(
            target_url = %self.client.url(),
            virtual_users = self.spec.virtual_users(),
            duration = ?duration,
            sleep = ?self.spec.sleep_interval(),
            "Starting load test"
        );

        let progress = self.show_progress.then(|| spawn_progress(duration));

        let mut workers = JoinSet::new();
        for id in 0..self.spec.virtual_users() {
            workers.spawn(virtual_user(
                id,
                self.client.clone(),
                self.spec.sleep_interval(),
                deadline,
            ));
        }

        let merged = collect(&mut workers).await;

        if let Some((pb, ticker)) = progress {
            ticker.abort();
            pb.finish_and_clear();
        }

        let merged = match merged {
            Ok(merged) => merged,
            Err(e) => return Err(self.abort(e)),
        };

        let result = merged.results(
            self.client.url(),
            self.spec.virtual_users(),
            start.elapsed(),
        );
        let threshold = self.spec.failure_threshold();
        let status = RunStatus::evaluate(&result, threshold);

        self.state = if status.is_passed() {
            DriverState::Passed
        } else {
            DriverState::Failed
        };

        info!(
            total = result.total_requests,
            failed = result.failed_requests,
            failure_rate = result.failure_rate(),
            elapsed_secs = result.duration_secs,
            status = %self.state,
            "Load test complete"
        );
        if let RunStatus::Failed { .. } = status {
            warn!("{}", status);
        }

        Ok(RunReport {
            result,
            threshold,
            status,
        })
    }

    fn abort(&mut self, error: DriverError) -> DriverError {
        warn!(error = %error, "Load test aborted");
        self.state = DriverState::Aborted;
        error
    }
}

/// Join every virtual user and merge its metrics.
async fn collect(
    workers: &mut JoinSet<MetricsCollector>,
) -> Result<MetricsCollector, DriverError> {
    let mut merged = MetricsCollector::new();
    while let Some(joined) = workers.join_next().await {
        merged
            .merge(&joined?)
            .map_err(|e| DriverError::Metrics(format!("{e:?}")))?;
    }
    Ok(merged)
}

/// One virtual user: request, think, repeat until the deadline.
async fn virtual_user(
    id: u32,
    client: Arc<TargetClient>,
    sleep_interval: Duration,
    deadline: Instant,
) -> MetricsCollector {
    let mut metrics = MetricsCollector::new();
    debug!(vu = id, "virtual user started");

    while Instant::now() < deadline {
        let outcome = client.send().await;
        metrics.record(&outcome);

        // No request may start past the deadline, so there is no point sleeping beyond it.
        let wake = Instant::now()
            .checked_add(sleep_interval)
            .map_or(deadline, |t| t.min(deadline));
        sleep_until(wake).await;
    }

    debug!(
        vu = id,
        requests = metrics.total_requests(),
        failed = metrics.failed_requests(),
        "virtual user finished"
    );
    metrics
}

fn spawn_progress(duration: Duration) -> (ProgressBar, JoinHandle<()>) {
    let total = duration.as_secs().max(1);
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }

    let ticker_pb = pb.clone();
    let ticker = tokio::spawn(async move {
        let start = Instant::now();
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        loop {
            interval.tick().await;
            let elapsed = start.elapsed().as_secs();
            ticker_pb.set_position(elapsed.min(total));
            if elapsed >= total {
                ticker_pb.set_message("Waiting for in-flight requests...");
            }
        }
    });

    (pb, ticker)
}
