//! # Network Configuration
//!
//! JSON configuration of the event bus and the network service, with
//! per-field defaults, plus flat `section.key` overrides in the shape the
//! preferences store hands out.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::events::DispatchMode;
use crate::network::proxy::ProxySettings;

/// Errors raised while loading or overriding configuration.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The file is not valid JSON for [`AppConfig`].
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// An override value does not parse for its key.
    #[error("Invalid value '{value}' for option {key}")]
    InvalidOption { key: String, value: String },
}

/// Top level configuration: one section per component.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Network service section.
    pub network: NetworkConfig,
    /// Event bus section.
    pub events: EventsConfig,
}

/// Event bus settings.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventsConfig {
    /// `"sync"` or `"async"`.
    pub dispatch: DispatchMode,
}

/// Tuning for `NetworkService`. Set once at start-up; only `proxy` changes later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    /// Retries after the first attempt for recoverable failures.
    pub max_retry_attempts: u32,
    /// Pause between two attempts.
    pub retry_interval_ms: u64,
    /// Minimum time between two unforced connectivity probes.
    pub conn_check_interval_ms: u64,
    /// Probed in order; the first success ends the probe.
    pub conn_check_urls: Vec<String>,
    /// Consecutive failed calls before the service considers itself offline.
    /// Zero or negative disables the heuristic.
    pub failures_before_offline: i32,
    /// TCP/TLS connect timeout.
    pub connect_timeout_ms: u64,
    /// Whole-request timeout, body included.
    pub request_timeout_ms: u64,
    /// Sent as `User-Agent` when set.
    pub user_agent: Option<String>,
    /// Body fragments of error pages that proxies serve with status 200.
    pub known_error_signatures: Vec<String>,
    /// Optional HTTP proxy.
    pub proxy: ProxySettings,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_interval_ms: 5_000,
            conn_check_interval_ms: 60_000,
            conn_check_urls: vec![
                "https://www.nasdaq.com/".to_string(),
                "https://www.google.com/".to_string(),
            ],
            failures_before_offline: 3,
            connect_timeout_ms: 15_000,
            request_timeout_ms: 30_000,
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36"
                    .to_string(),
            ),
            known_error_signatures: Vec::new(),
            proxy: ProxySettings::default(),
        }
    }
}

/// The `*_ms` fields as durations.
impl NetworkConfig {
    /// `retry_interval_ms`.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// `conn_check_interval_ms`.
    pub fn conn_check_interval(&self) -> Duration {
        Duration::from_millis(self.conn_check_interval_ms)
    }

    /// `connect_timeout_ms`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `request_timeout_ms`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl AppConfig {
    /// Applies flat `section.key` overrides, as stored by the preferences collaborator.
    ///
    /// List values are comma separated. Unknown keys are ignored.
    pub fn apply_options(&mut self, options: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        for (key, value) in options {
            let net = &mut self.network;
            match key.as_str() {
                "network.maxRetryAttempts" => net.max_retry_attempts = parse_option(key, value)?,
                "network.retryIntervalMs" => net.retry_interval_ms = parse_option(key, value)?,
                "network.connCheckIntervalMs" => net.conn_check_interval_ms = parse_option(key, value)?,
                "network.connCheckUrls" => net.conn_check_urls = split_list(value),
                "network.failuresBeforeOffline" => {
                    net.failures_before_offline = parse_option(key, value)?
                }
                "network.connectTimeoutMs" => net.connect_timeout_ms = parse_option(key, value)?,
                "network.requestTimeoutMs" => net.request_timeout_ms = parse_option(key, value)?,
                "network.userAgent" => {
                    net.user_agent = Some(value.trim().to_string()).filter(|ua| !ua.is_empty())
                }
                "network.knownErrorSignatures" => net.known_error_signatures = split_list(value),
                "events.dispatch" => {
                    self.events.dispatch = match value.trim().to_ascii_lowercase().as_str() {
                        "sync" => DispatchMode::Sync,
                        "async" => DispatchMode::Async,
                        _ => return Err(invalid(key, value)),
                    }
                }
                k if k.starts_with("proxy.") => {}
                other => debug!(key = other, "Ignoring unknown configuration option"),
            }
        }
        self.network.proxy.apply_preferences(options)?;
        Ok(())
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let net = &self.network;
        write!(
            f,
            "AppConfig
    Dispatch mode: {:?},
    Max retries: {},
    Retry interval: {} ms,
    Check interval: {} ms,
    Check URLs: {:?},
    Offline after: {} failures,
    Proxy: {:?}
",
            self.events.dispatch,
            net.max_retry_attempts,
            net.retry_interval_ms,
            net.conn_check_interval_ms,
            net.conn_check_urls,
            net.failures_before_offline,
            net.proxy
        )
    }
}

/// Loads the JSON configuration at `path`.
///
/// A missing path or file yields the defaults; an unreadable or malformed file is an error.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(AppConfig::default());
    };

    if !path.is_file() {
        info!("Config file not found at {}. Using defaults.", path.display());
        return Ok(AppConfig::default());
    }

    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub(crate) fn parse_option<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

pub(crate) fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
