//! HTTP client wrapper that turns one GET into a `RequestOutcome`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::RunSpec;

/// Result of a single HTTP request.
///
/// Failures are data, not errors: a refused connection, a timeout or a
/// 5xx response all produce an outcome with `success == false`.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency: Duration,
    pub started_at: Instant,
    pub bytes: usize,
    pub error: Option<String>,
}

impl RequestOutcome {
    /// Latency in whole microseconds, the unit the histograms record.
    pub fn latency_us(&self) -> u64 {
        self.latency.as_micros().min(u64::MAX as u128) as u64
    }
}

/// Issues the configured GET request against the target.
#[derive(Debug, Clone)]
pub struct TargetClient {
    client: reqwest::Client,
    url: String,
    params: Option<BTreeMap<String, String>>,
}

impl TargetClient {
    /// Create a client for the target described by `spec`.
    pub fn new(spec: &RunSpec) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(spec.request_timeout())
            .pool_max_idle_per_host(spec.virtual_users() as usize)
            .build()?;

        Ok(Self {
            client,
            url: spec.target_url().to_string(),
            params: spec.request_params().cloned(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Execute one request and classify it. Never fails.
    pub async fn send(&self) -> RequestOutcome {
        let start = Instant::now();

        let mut request = self.client.get(&self.url);
        if let Some(params) = &self.params {
            request = request.query(params);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let ok_status = status.is_success() || status.is_redirection();

                // Read the body so latency covers the full response.
                let (bytes, body_error) = match response.bytes().await {
                    Ok(b) => (b.len(), None),
                    Err(e) => (0, Some(e.to_string())),
                };

                let error =
                    body_error.or_else(|| (!ok_status).then(|| format!("HTTP {}", status.as_u16())));

                if let Some(ref err) = error {
                    debug!(url = %self.url, status = status.as_u16(), error = %err, "request failed");
                }

                RequestOutcome {
                    success: error.is_none(),
                    status_code: Some(status.as_u16()),
                    latency: start.elapsed(),
                    started_at: start,
                    bytes,
                    error,
                }
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "request failed");
                RequestOutcome {
                    success: false,
                    status_code: e.status().map(|s| s.as_u16()),
                    latency: start.elapsed(),
                    started_at: start,
                    bytes: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
