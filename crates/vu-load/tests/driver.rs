//! End-to-end driver tests against an in-process target.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use test_utils::MockTarget;
use vu_load::{DriverError, DriverState, LoadDriver, RunSpec, RunStatus};

fn spec(pairs: &[(&str, &str)]) -> RunSpec {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    RunSpec::from_lookup(|key| map.get(key).cloned()).expect("valid test configuration")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sleep_longer_than_duration_gives_one_request_per_vu() {
    let target = MockTarget::spawn(200).await;
    let url = target.url("/compute");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "50"),
        ("DURATION", "1s"),
        ("SLEEP_INTERVAL", "1s"),
        ("TARGET_URL", &url),
    ]))
    .unwrap();

    let report = driver.run().await.unwrap();

    assert_eq!(report.result.total_requests, 50);
    assert_eq!(report.result.failed_requests, 0);
    assert_eq!(target.hits(), 50);
    assert_eq!(report.status, RunStatus::Passed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_errors_breach_threshold() {
    let target = MockTarget::spawn(500).await;
    let url = target.url("/compute");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "5"),
        ("DURATION", "500ms"),
        ("SLEEP_INTERVAL", "100ms"),
        ("TARGET_URL", &url),
        ("FAILURE_THRESHOLD", "0.05"),
    ]))
    .unwrap();

    let report = driver.run().await.unwrap();
    let result = &report.result;

    assert!(result.total_requests >= 5);
    assert_eq!(result.failed_requests, result.total_requests);
    assert_eq!(result.status_counts.get(&500), Some(&result.total_requests));
    assert_eq!(report.result.failure_rate(), 1.0);
    assert!(matches!(report.status, RunStatus::Failed { .. }));
    assert_eq!(driver.state(), DriverState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_healthy_target_passes_any_threshold() {
    let target = MockTarget::spawn(200).await;
    let url = target.url("/compute");

    for threshold in ["0", "0.05", "1"] {
        let mut driver = LoadDriver::new(spec(&[
            ("VUS", "4"),
            ("DURATION", "300ms"),
            ("SLEEP_INTERVAL", "50ms"),
            ("TARGET_URL", &url),
            ("FAILURE_THRESHOLD", threshold),
        ]))
        .unwrap();

        let report = driver.run().await.unwrap();
        assert!(report.result.total_requests > 0);
        assert_eq!(report.result.failed_requests, 0);
        assert!(report.status.is_passed(), "threshold {threshold}");
        assert_eq!(driver.state(), DriverState::Passed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_without_threshold_still_pass() {
    let target = MockTarget::spawn(503).await;
    let url = target.url("/");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "2"),
        ("DURATION", "200ms"),
        ("SLEEP_INTERVAL", "50ms"),
        ("TARGET_URL", &url),
    ]))
    .unwrap();

    let report = driver.run().await.unwrap();
    assert!(report.result.failed_requests > 0);
    assert!(report.status.is_passed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_duration_is_honored() {
    let target = MockTarget::spawn(200).await;
    let url = target.url("/compute");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "3"),
        ("DURATION", "1s"),
        ("SLEEP_INTERVAL", "300ms"),
        ("TARGET_URL", &url),
    ]))
    .unwrap();

    let start = Instant::now();
    let report = driver.run().await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    // One request+sleep cycle, plus scheduling slack.
    assert!(elapsed < Duration::from_millis(1300 + 500), "{elapsed:?}");
    assert!(report.result.duration_secs >= 1.0);
    // Each VU fits roughly four cycles into one second.
    assert!(report.result.total_requests >= 3 * 3);
    assert!(report.result.total_requests <= 3 * 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_request_completes_after_deadline() {
    let target = MockTarget::spawn_with_delay(200, Duration::from_millis(600)).await;
    let url = target.url("/slow");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "2"),
        ("DURATION", "200ms"),
        ("SLEEP_INTERVAL", "0s"),
        ("TARGET_URL", &url),
    ]))
    .unwrap();

    let report = driver.run().await.unwrap();

    assert_eq!(report.result.total_requests, 2);
    assert_eq!(report.result.failed_requests, 0);
    assert!(report.result.duration_secs >= 0.6);
}

#[tokio::test]
async fn test_query_params_reach_target() {
    let target = MockTarget::spawn(200).await;
    let url = target.url("/compute");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "1"),
        ("DURATION", "100ms"),
        ("SLEEP_INTERVAL", "1s"),
        ("TARGET_URL", &url),
        ("REQUEST_PARAMS", "work=2000000"),
    ]))
    .unwrap();

    driver.run().await.unwrap();

    assert_eq!(target.hits(), 1);
    assert_eq!(target.last_query().as_deref(), Some("work=2000000"));
}

#[tokio::test]
async fn test_request_timeout_is_recorded_as_failure() {
    let target = MockTarget::spawn_with_delay(200, Duration::from_secs(2)).await;
    let url = target.url("/compute");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "1"),
        ("DURATION", "100ms"),
        ("SLEEP_INTERVAL", "0s"),
        ("REQUEST_TIMEOUT", "200ms"),
        ("TARGET_URL", &url),
    ]))
    .unwrap();

    let report = driver.run().await.unwrap();

    assert_eq!(report.result.total_requests, 1);
    assert_eq!(report.result.failed_requests, 1);
    assert_eq!(report.result.transport_errors, 1);
}

#[tokio::test]
async fn test_unreachable_target_is_not_an_error() {
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "2"),
        ("DURATION", "200ms"),
        ("SLEEP_INTERVAL", "50ms"),
        ("REQUEST_TIMEOUT", "1s"),
        ("TARGET_URL", "http://127.0.0.1:1/compute"),
        ("FAILURE_THRESHOLD", "0.5"),
    ]))
    .unwrap();

    let report = driver.run().await.unwrap();
    let result = &report.result;

    assert!(result.total_requests > 0);
    assert_eq!(result.failed_requests, result.total_requests);
    assert_eq!(result.transport_errors, result.total_requests);
    assert!(result.status_counts.is_empty());
    assert!(!report.status.is_passed());
}

#[tokio::test]
async fn test_malformed_url_surfaces_as_failed_requests() {
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "1"),
        ("DURATION", "100ms"),
        ("SLEEP_INTERVAL", "20ms"),
        ("TARGET_URL", "not a url"),
    ]))
    .unwrap();

    let report = driver.run().await.unwrap();

    assert!(report.result.total_requests > 0);
    assert_eq!(report.result.failed_requests, report.result.total_requests);
}

#[tokio::test]
async fn test_driver_runs_only_once() {
    let target = MockTarget::spawn(200).await;
    let url = target.url("/");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "1"),
        ("DURATION", "50ms"),
        ("SLEEP_INTERVAL", "10ms"),
        ("TARGET_URL", &url),
    ]))
    .unwrap();

    assert_eq!(driver.state(), DriverState::NotStarted);
    driver.run().await.unwrap();

    let hits = target.hits();
    let err = driver.run().await.unwrap_err();
    assert!(matches!(err, DriverError::AlreadyStarted(DriverState::Passed)));
    assert_eq!(target.hits(), hits);
}

#[tokio::test]
async fn test_latency_reflects_target_delay() {
    let target = MockTarget::spawn_with_delay(200, Duration::from_millis(250)).await;
    let url = target.url("/compute");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "2"),
        ("DURATION", "100ms"),
        ("SLEEP_INTERVAL", "0s"),
        ("TARGET_URL", &url),
    ]))
    .unwrap();

    let report = driver.run().await.unwrap();
    let latency = &report.result.latency;

    assert_eq!(report.result.total_requests, 2);
    assert!(latency.min >= 250.0, "{latency:?}");
    assert!(latency.max >= latency.min);
    assert!(latency.max < 1000.0, "{latency:?}");
}

#[tokio::test]
async fn test_encoded_params_arrive_unchanged() {
    let target = MockTarget::spawn(200).await;
    let url = target.url("/search");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "1"),
        ("DURATION", "100ms"),
        ("SLEEP_INTERVAL", "1s"),
        ("TARGET_URL", &url),
        ("REQUEST_PARAMS", "q=a%20b&r=x+y&s=%26"),
    ]))
    .unwrap();

    driver.run().await.unwrap();

    let query = target.last_query().expect("query string");
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("q".to_string(), "a b".to_string()),
            ("r".to_string(), "x y".to_string()),
            ("s".to_string(), "&".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_custom_target_gets_no_default_params() {
    let target = MockTarget::spawn(200).await;
    let url = target.url("/health");
    let mut driver = LoadDriver::new(spec(&[
        ("VUS", "1"),
        ("DURATION", "100ms"),
        ("SLEEP_INTERVAL", "1s"),
        ("TARGET_URL", &url),
    ]))
    .unwrap();

    driver.run().await.unwrap();

    assert_eq!(target.hits(), 1);
    assert_eq!(target.last_query(), None);
}

#[tokio::test]
async fn test_exit_code_follows_threshold() {
    let target = MockTarget::spawn(500).await;
    let url = target.url("/compute");

    for (threshold, code) in [(None, 0), (Some("0.05"), vu_load::EXIT_THRESHOLD_FAILED)] {
        let mut pairs = vec![
            ("VUS", "1"),
            ("DURATION", "100ms"),
            ("SLEEP_INTERVAL", "20ms"),
            ("TARGET_URL", url.as_str()),
        ];
        pairs.extend(threshold.map(|t| ("FAILURE_THRESHOLD", t)));
        let mut driver = LoadDriver::new(spec(&pairs)).unwrap();

        let report = driver.run().await.unwrap();
        assert_eq!(report.status.exit_code(), code, "threshold {threshold:?}");
    }
}
