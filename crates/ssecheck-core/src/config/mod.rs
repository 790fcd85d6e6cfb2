//! Configuration management for ssecheck.
//!
//! Configuration is loaded from multiple sources with the following priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `ssecheck.toml` file
//! 3. User config `~/.config/ssecheck/config.toml`
//! 4. Built-in defaults (lowest priority)
//!
//! Command-line flags are applied on top of the loaded value by the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod defaults;

pub use defaults::*;

use crate::report::DebugOutputPolicy;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Where the test service lives and how to wait for it.
    pub service: ServiceConfig,

    /// The harness's own HTTP listener.
    pub listener: ListenerConfig,

    /// Bounded waits used by the test API.
    pub timeouts: TimeoutConfig,

    /// Capacities of the internal queues.
    pub queues: QueueConfig,

    /// What to print at the end of each test.
    pub reporting: ReportingConfig,
}

impl HarnessConfig {
    /// Load configuration from default locations.
    ///
    /// Searches for config in order:
    /// 1. `./ssecheck.toml` (project local)
    /// 2. `~/.config/ssecheck/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new(CONFIG_FILE_NAME).exists() {
            return Self::from_file(CONFIG_FILE_NAME);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(CONFIG_DIR_NAME).join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: HarnessConfig = toml::from_str(&content)?;

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SSECHECK_SERVICE_URL") {
            self.service.url = url;
        }
        if let Ok(ms) = std::env::var("SSECHECK_STARTUP_TIMEOUT_MS") {
            if let Ok(n) = ms.parse() {
                self.service.startup_timeout_ms = n;
            }
        }

        if let Ok(host) = std::env::var("SSECHECK_HOST") {
            self.listener.host = host;
        }
        if let Ok(port) = std::env::var("SSECHECK_PORT") {
            if let Ok(n) = port.parse() {
                self.listener.port = n;
            }
        }

        if std::env::var("SSECHECK_DEBUG_ALL").is_ok() {
            self.reporting.debug_output = DebugOutputPolicy::Always;
        } else if std::env::var("SSECHECK_DEBUG").is_ok() {
            self.reporting.debug_output = DebugOutputPolicy::OnFailure;
        }
    }

    /// Check the values that would otherwise fail much later at run time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.url.trim().is_empty() {
            return Err(ConfigError::Invalid("test service URL is required".to_string()));
        }
        if url::Url::parse(&self.service.url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "test service URL is not a valid absolute URL: {}",
                self.service.url
            )));
        }
        if self.listener.host.trim().is_empty() {
            return Err(ConfigError::Invalid("listener host must not be empty".to_string()));
        }
        if self.queues.notification_capacity == 0
            || self.queues.chunk_capacity == 0
            || self.queues.callback_capacity == 0
        {
            return Err(ConfigError::Invalid("queue capacities must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Create a default config file content as a string.
    pub fn default_config_string() -> String {
        let config = HarnessConfig::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Test service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the test service's control endpoint.
    pub url: String,

    /// Deadline for the startup status query, in milliseconds.
    pub startup_timeout_ms: u64,

    /// First delay between status queries, in milliseconds.
    pub poll_interval_ms: u64,

    /// Cap for the doubling delay between status queries, in milliseconds.
    pub max_poll_interval_ms: u64,

    /// Send `DELETE` to the service once the run is over.
    pub stop_service_at_end: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
            stop_service_at_end: false,
        }
    }
}

impl ServiceConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Hostname the test service should use to reach us.
    pub host: String,

    /// Port to listen on (all interfaces).
    pub port: u16,

    /// How long to wait for the listener to become reachable, in milliseconds.
    pub ready_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ready_timeout_ms: DEFAULT_LISTENER_READY_TIMEOUT_MS,
        }
    }
}

impl ListenerConfig {
    /// Base URL under which the test service reaches the harness.
    pub fn external_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(DEFAULT_LISTENER_PROBE_INTERVAL_MS)
    }
}

/// Timeouts for waits performed by test bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Waiting for the test service to connect to a mock stream.
    pub await_connection_ms: u64,

    /// Waiting for a callback from the test service.
    pub await_message_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            await_connection_ms: DEFAULT_AWAIT_CONNECTION_TIMEOUT_MS,
            await_message_ms: DEFAULT_AWAIT_MESSAGE_TIMEOUT_MS,
        }
    }
}

impl TimeoutConfig {
    pub fn await_connection(&self) -> Duration {
        Duration::from_millis(self.await_connection_ms)
    }

    pub fn await_message(&self) -> Duration {
        Duration::from_millis(self.await_message_ms)
    }
}

/// Queue capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// New-connection notifications buffered per endpoint.
    pub notification_capacity: usize,

    /// Chunks buffered per stream connection.
    pub chunk_capacity: usize,

    /// In-order callbacks waiting to be read by a test.
    pub callback_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            callback_capacity: DEFAULT_CALLBACK_CAPACITY,
        }
    }
}

/// Reporting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// When a test's captured debug output is printed.
    pub debug_output: DebugOutputPolicy,
}
