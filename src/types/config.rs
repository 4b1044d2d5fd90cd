//! Configuration structures.
//!
//! Configuration is built from defaults or loaded from a JSON document.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Error, Result};

/// Global client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Event dispatch configuration.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a configuration document. Missing sections fall back to defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.dispatch.validate()?;
        Ok(config)
    }
}

/// Event dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Route delivery reports lacking a private completion channel to the
    /// shared events stream instead of returning them directly.
    pub forward_unrouted_deliveries: bool,

    /// Copy message headers out of native messages.
    pub materialize_headers: bool,

    /// Capacity of the shared events channel. A full channel stalls dispatch.
    pub events_channel_capacity: usize,

    /// Blocking timeout for the first native poll of each dispatch call.
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Maximum events handled by one dispatch call before it yields.
    pub max_events_per_poll: usize,
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.events_channel_capacity == 0 {
            return Err(Error::validation("events_channel_capacity must be > 0"));
        }
        if self.max_events_per_poll == 0 {
            return Err(Error::validation("max_events_per_poll must be > 0"));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::validation("poll_timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            forward_unrouted_deliveries: true,
            materialize_headers: true,
            events_channel_capacity: 1000,
            poll_timeout: Duration::from_millis(100),
            max_events_per_poll: 1000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
