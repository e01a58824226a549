//! In-process HTTP target for load driver tests.
//!
//! Every path answers with the same status code, so a test can point a
//! driver at `target.url("/compute")` and then inspect how many requests
//! arrived and which query string they carried.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct TargetState {
    status: StatusCode,
    delay: Duration,
    hits: AtomicU64,
    last_query: Mutex<Option<String>>,
}

/// A mock target server bound to an ephemeral localhost port.
///
/// The server task is aborted when the value is dropped.
pub struct MockTarget {
    addr: SocketAddr,
    state: Arc<TargetState>,
    server: JoinHandle<()>,
}

impl MockTarget {
    /// Start a target that answers every request immediately with `status`.
    pub async fn spawn(status: u16) -> Self {
        Self::spawn_with_delay(status, Duration::ZERO).await
    }

    /// Start a target that waits `delay` before answering with `status`.
    pub async fn spawn_with_delay(status: u16, delay: Duration) -> Self {
        let status = StatusCode::from_u16(status).expect("valid HTTP status code");
        let state = Arc::new(TargetState {
            status,
            delay,
            hits: AtomicU64::new(0),
            last_query: Mutex::new(None),
        });

        let app = Router::new().fallback(respond).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock target");
        let addr = listener.local_addr().expect("mock target address");

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            state,
            server,
        }
    }

    /// Absolute URL for `path` on this target.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of requests received so far.
    pub fn hits(&self) -> u64 {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Raw query string of the most recent request.
    pub fn last_query(&self) -> Option<String> {
        self.state
            .last_query
            .lock()
            .expect("mock target lock poisoned")
            .clone()
    }
}

impl Drop for MockTarget {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn respond(
    State(state): State<Arc<TargetState>>,
    RawQuery(query): RawQuery,
) -> (StatusCode, &'static str) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state
        .last_query
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = query;

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    (state.status, "{\"result\":\"done\"}")
}
