//! Run specification loading and validation.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use thiserror::Error;
use url::form_urlencoded;

pub const DEFAULT_VUS: u32 = 20;
pub const DEFAULT_DURATION: &str = "60s";
pub const DEFAULT_TARGET_URL: &str = "http://app:5000/compute";
pub const DEFAULT_REQUEST_PARAMS: &str = "work=2000000";
pub const DEFAULT_SLEEP_INTERVAL: &str = "500ms";
pub const DEFAULT_REQUEST_TIMEOUT: &str = "30s";

/// Configuration keys, with the legacy alias checked when the primary key is unset.
pub mod keys {
    pub const VUS: (&str, Option<&str>) = ("VUS", Some("K6_VUS"));
    pub const DURATION: (&str, Option<&str>) = ("DURATION", Some("K6_DURATION"));
    pub const TARGET_URL: (&str, Option<&str>) = ("TARGET_URL", None);
    pub const REQUEST_PARAMS: (&str, Option<&str>) = ("REQUEST_PARAMS", None);
    pub const SLEEP_INTERVAL: (&str, Option<&str>) = ("SLEEP_INTERVAL", None);
    pub const REQUEST_TIMEOUT: (&str, Option<&str>) = ("REQUEST_TIMEOUT", None);
    pub const FAILURE_THRESHOLD: (&str, Option<&str>) = ("FAILURE_THRESHOLD", None);
}

/// Invalid configuration. Fatal: no request is issued once one of these is raised.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got '{value}'")]
    InvalidVirtualUsers { key: &'static str, value: String },

    #[error("{key} is not a valid duration: '{value}' ({source})")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("{key} must be greater than zero")]
    ZeroDuration { key: &'static str },

    #[error("TARGET_URL must not be empty")]
    EmptyTargetUrl,

    #[error("invalid request parameter '{0}', expected key=value")]
    InvalidRequestParam(String),

    #[error("FAILURE_THRESHOLD must be a fraction in [0, 1], got '{0}'")]
    InvalidThreshold(String),
}

/// Validated configuration for one load test execution.
#[derive(Debug, Clone)]
pub struct RunSpec {
    virtual_users: u32,
    duration: Duration,
    target_url: String,
    request_params: Option<BTreeMap<String, String>>,
    sleep_interval: Duration,
    request_timeout: Duration,
    failure_threshold: Option<f64>,
}

impl RunSpec {
    /// Build a run specification from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a run specification where `overrides` win over `fallback`.
    pub fn from_layers<F>(
        overrides: &HashMap<&str, String>,
        fallback: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_lookup(|key| overrides.get(key).cloned().or_else(|| fallback(key)))
    }

    /// Build a run specification from an arbitrary key/value source.
    ///
    /// Missing or blank values fall back to their documented defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |(key, alias): (&'static str, Option<&'static str>)| {
            let found = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
            found(key).or_else(|| alias.and_then(found))
        };

        let virtual_users = match get(keys::VUS) {
            Some(raw) => parse_virtual_users(keys::VUS.0, &raw)?,
            None => DEFAULT_VUS,
        };

        let duration = parse_duration(
            keys::DURATION.0,
            get(keys::DURATION).as_deref().unwrap_or(DEFAULT_DURATION),
        )?;
        if duration.is_zero() {
            return Err(ConfigError::ZeroDuration {
                key: keys::DURATION.0,
            });
        }

        // Only emptiness is checked here; a malformed URL shows up as failed requests.
        let target_url = match lookup(keys::TARGET_URL.0) {
            Some(url) if url.trim().is_empty() => return Err(ConfigError::EmptyTargetUrl),
            Some(url) => url.trim().to_string(),
            None => DEFAULT_TARGET_URL.to_string(),
        };

        // The default query belongs to the default target. An explicitly
        // empty REQUEST_PARAMS disables it.
        let request_params = match lookup(keys::REQUEST_PARAMS.0) {
            Some(raw) => parse_request_params(&raw)?,
            None if lookup(keys::TARGET_URL.0).is_none() => {
                parse_request_params(DEFAULT_REQUEST_PARAMS)?
            }
            None => None,
        };

        let sleep_interval = parse_duration(
            keys::SLEEP_INTERVAL.0,
            get(keys::SLEEP_INTERVAL)
                .as_deref()
                .unwrap_or(DEFAULT_SLEEP_INTERVAL),
        )?;

        let request_timeout = parse_duration(
            keys::REQUEST_TIMEOUT.0,
            get(keys::REQUEST_TIMEOUT)
                .as_deref()
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        )?;
        if request_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                key: keys::REQUEST_TIMEOUT.0,
            });
        }

        let failure_threshold = get(keys::FAILURE_THRESHOLD)
            .map(|raw| parse_threshold(&raw))
            .transpose()?;

        Ok(Self {
            virtual_users,
            duration,
            target_url,
            request_params,
            sleep_interval,
            request_timeout,
            failure_threshold,
        })
    }

    pub fn virtual_users(&self) -> u32 {
        self.virtual_users
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Query parameters appended to every request, if any.
    pub fn request_params(&self) -> Option<&BTreeMap<String, String>> {
        self.request_params.as_ref()
    }

    /// Think time between two requests of the same virtual user.
    pub fn sleep_interval(&self) -> Duration {
        self.sleep_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn failure_threshold(&self) -> Option<f64> {
        self.failure_threshold
    }
}

fn parse_virtual_users(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidVirtualUsers {
            key,
            value: raw.to_string(),
        }),
    }
}

fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|source| ConfigError::InvalidDuration {
        key,
        value: raw.to_string(),
        source,
    })
}

fn parse_request_params(raw: &str) -> Result<Option<BTreeMap<String, String>>, ConfigError> {
    let raw = raw.trim().trim_start_matches('?');
    if raw.is_empty() {
        return Ok(None);
    }

    // Keys and values are form-urlencoded; they are stored decoded so the
    // client encodes them exactly once.
    let mut params = BTreeMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((key, _)) if !key.trim().is_empty() => {
                if let Some((key, value)) = form_urlencoded::parse(pair.as_bytes()).next() {
                    params.insert(key.trim().to_string(), value.into_owned());
                }
            }
            _ => return Err(ConfigError::InvalidRequestParam(pair.to_string())),
        }
    }

    Ok((!params.is_empty()).then_some(params))
}

fn parse_threshold(raw: &str) -> Result<f64, ConfigError> {
    match raw.trim().parse::<f64>() {
        Ok(t) if (0.0..=1.0).contains(&t) => Ok(t),
        _ => Err(ConfigError::InvalidThreshold(raw.to_string())),
    }
}
