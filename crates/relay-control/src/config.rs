//! Configuration for the command plane

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main command plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneConfig {
    /// Server-side bound on one agent long-poll, in seconds
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout_secs: u64,

    /// How long synchronous operations wait for their ack, in seconds
    #[serde(default = "default_result_timeout")]
    pub result_timeout_secs: u64,

    /// Buffered events per subscriber before it starts lagging
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout_secs: default_long_poll_timeout(),
            result_timeout_secs: default_result_timeout(),
            event_channel_capacity: default_event_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_long_poll_timeout() -> u64 {
    30
}

fn default_result_timeout() -> u64 {
    20
}

fn default_event_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PlaneConfig {
    /// Load configuration: defaults, then an optional file, then `RELAY_*`
    /// environment variables (`RELAY_LOGGING__LEVEL=debug`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&PlaneConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_secs)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }
}
