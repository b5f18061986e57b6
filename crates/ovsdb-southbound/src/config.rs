//! Configuration for the southbound reconciliation core.
//!
//! Loaded from a TOML file; every field has a default so a partial file
//! (or no file at all) yields a usable configuration.
//! Default location: /etc/ovsdb/southbound.toml

use crate::error::{Result, SouthboundError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ovsdb/southbound.toml";

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of workers running one-shot reconciliation tasks
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Maximum number of submitted tasks waiting for a worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Linear backoff step in milliseconds (delay = attempt * base)
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,

    /// Attempts allowed before a task is abandoned
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Passive connection arbitration configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterConfig {
    /// Time allowed for one echo probe to be answered
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,

    /// Pause between successful probes of the same predecessor
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable output
    Compact,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

/// Complete southbound configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SouthboundConfig {
    /// Worker pool configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Connection arbitration configuration
    #[serde(default)]
    pub arbiter: ArbiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_worker_threads() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    5000
}

fn default_base_interval_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_echo_timeout_ms() -> u64 {
    1000
}

fn default_probe_interval_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

// Default implementations
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_base_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            echo_timeout_ms: default_echo_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl RetryConfig {
    /// Backoff step as Duration
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }
}

impl ArbiterConfig {
    /// Echo timeout as Duration
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    /// Probe interval as Duration
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

impl SouthboundConfig {
    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Loads configuration from file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(SouthboundError::Io(e)),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.worker_threads == 0 {
            return Err(SouthboundError::config(
                "engine.worker_threads",
                "must be > 0",
            ));
        }

        if self.engine.queue_capacity == 0 {
            return Err(SouthboundError::config(
                "engine.queue_capacity",
                "must be > 0",
            ));
        }

        if self.retry.base_interval_ms == 0 {
            return Err(SouthboundError::config(
                "retry.base_interval_ms",
                "must be > 0",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(SouthboundError::config("retry.max_attempts", "must be > 0"));
        }

        if self.arbiter.echo_timeout_ms == 0 {
            return Err(SouthboundError::config(
                "arbiter.echo_timeout_ms",
                "must be > 0",
            ));
        }

        if self.arbiter.echo_timeout_ms >= self.arbiter.probe_interval_ms {
            return Err(SouthboundError::config(
                "arbiter.echo_timeout_ms",
                format!(
                    "must be shorter than probe_interval_ms ({})",
                    self.arbiter.probe_interval_ms
                ),
            ));
        }

        Ok(())
    }
}
