//! Configuration
//!
//! Settings are layered: built-in defaults, then the JSON settings file,
//! then `TREMORLINK_*` environment variables. Command-line flags are applied
//! on top by the binary.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::api::{ProcessingParameters, DEFAULT_API_URL};
use crate::datalog::{NormalizationMethod, RecordMode};
use crate::protocol::{
    default_endpoints, endpoints_for_hosts, ConnectionConfig, DEFAULT_BACKOFF_FACTOR,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DEVICE_PORT, DEFAULT_KEEPALIVE_SECS,
    DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_MAX_MS, DEFAULT_SEND_TIMEOUT_MS,
    DEFAULT_WATCHDOG_SECS,
};
use crate::session::{EngineConfig, DEFAULT_PLOT_CAPACITY, DEVICE_TARGET_INTERVAL};
use crate::signal::DEFAULT_STREAM_CHANNEL;

/// Overrides the backend URL
pub const ENV_API_URL: &str = "TREMORLINK_API_URL";

/// Comma-separated device hosts or `ws://` URLs
pub const ENV_ENDPOINTS: &str = "TREMORLINK_ENDPOINTS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Device link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Hosts or `ws://` URLs, tried in order
    pub endpoints: Vec<String>,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub backoff_factor: f64,
    pub keepalive_secs: u64,
    pub watchdog_secs: u64,
    pub send_timeout_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            port: DEFAULT_DEVICE_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_base_ms: DEFAULT_RECONNECT_BASE_MS,
            reconnect_max_ms: DEFAULT_RECONNECT_MAX_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
            watchdog_secs: DEFAULT_WATCHDOG_SECS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
        }
    }
}

impl DeviceSettings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            endpoints: endpoints_for_hosts(&self.endpoints, self.port),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            reconnect_base_delay: Duration::from_millis(self.reconnect_base_ms),
            reconnect_max_delay: Duration::from_millis(self.reconnect_max_ms),
            backoff_factor: self.backoff_factor,
            keepalive_interval: Duration::from_secs(self.keepalive_secs),
            watchdog_interval: Duration::from_secs(self.watchdog_secs),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Channel streamed when none is given
    pub channel: String,
    pub target_interval_ms: u64,
    pub plot_capacity: usize,
    pub looping: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            channel: DEFAULT_STREAM_CHANNEL.to_string(),
            target_interval_ms: DEVICE_TARGET_INTERVAL.as_millis() as u64,
            plot_capacity: DEFAULT_PLOT_CAPACITY,
            looping: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub mode: RecordMode,
    pub normalization: NormalizationMethod,
    /// Local directory for CSV exports
    pub export_dir: Option<PathBuf>,
    pub parameters: ProcessingParameters,
}

/// All settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TremorLinkConfig {
    pub device: DeviceSettings,
    pub streaming: StreamingSettings,
    pub api: ApiSettings,
    pub recording: RecordingSettings,
}

impl TremorLinkConfig {
    /// `<config dir>/tremorlink/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|base| base.join("tremorlink").join("config.json"))
    }

    /// Load and validate a settings file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        debug!("Loaded settings from {}", path.as_ref().display());
        Ok(config)
    }

    /// Resolve settings: an explicit path must exist; otherwise the default
    /// file is used when present. Environment overrides are applied last.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::load(path)?,
                None => Self::default(),
            },
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `TREMORLINK_*` overrides read through `lookup`
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            self.api.base_url = url.trim().to_string();
        }
        if let Some(list) = lookup(ENV_ENDPOINTS) {
            let endpoints: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
            if !endpoints.is_empty() {
                self.device.endpoints = endpoints;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if endpoints_for_hosts(&self.device.endpoints, self.device.port).is_empty() {
            return Err(ConfigError::Invalid("no device endpoints".into()));
        }
        if self.device.connect_timeout_ms == 0
            || self.device.reconnect_base_ms == 0
            || self.device.keepalive_secs == 0
            || self.device.watchdog_secs == 0
            || self.device.send_timeout_ms == 0
        {
            return Err(ConfigError::Invalid("device timings must be non-zero".into()));
        }
        if self.device.reconnect_max_ms < self.device.reconnect_base_ms {
            return Err(ConfigError::Invalid(
                "reconnect_max_ms is below reconnect_base_ms".into(),
            ));
        }
        if !(self.device.backoff_factor >= 1.0) {
            return Err(ConfigError::Invalid("backoff_factor must be at least 1".into()));
        }
        if self.streaming.target_interval_ms == 0 {
            return Err(ConfigError::Invalid("target_interval_ms must be non-zero".into()));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api base_url is empty".into()));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            target_interval: Duration::from_millis(self.streaming.target_interval_ms),
            plot_capacity: self.streaming.plot_capacity,
            record_mode: self.recording.mode,
        }
    }
}
