//! Driver configuration.
//!
//! ```toml
//! [dispatch]
//! max_parallel = 8
//! step_timeout_ms = 1000
//!
//! [connection_defaults]
//! password = ""
//! timeout_ms = 10000
//!
//! [connection_defaults.display]
//! encoding = "tight"
//! quality = 5
//!
//! [connection_defaults.updates]
//! max_deferred = 60
//! ```

use crate::errors::DriverError;
use rfb_client::config::{DisplayConfig, UpdatesConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete driver configuration. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    /// How `step` fans out across connections.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Settings applied to every connection unless `connect_with` overrides
    /// them.
    #[serde(default)]
    pub connection_defaults: ConnectionDefaults,
}

/// Fan-out limits for `step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Connections serviced at the same time.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Budget for one connection's share of a step, in milliseconds.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
}

fn default_max_parallel() -> usize {
    num_cpus::get().max(1)
}

fn default_step_timeout_ms() -> u64 {
    1_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            step_timeout_ms: default_step_timeout_ms(),
        }
    }
}

/// Per-connection defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDefaults {
    /// VNC password; empty offers security type None only.
    #[serde(default)]
    pub password: String,

    /// Connect and handshake budget, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long to keep retrying an unreachable server; 0 tries once.
    #[serde(default)]
    pub start_timeout_ms: u64,

    /// Encoding and quality levels.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Back-pressure and per-update limits.
    #[serde(default)]
    pub updates: UpdatesConfig,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            password: String::new(),
            timeout_ms: default_timeout_ms(),
            start_timeout_ms: 0,
            display: DisplayConfig::default(),
            updates: UpdatesConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("loaded driver config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self, DriverError> {
        let config: Self = toml::from_str(s).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check limits that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Config`] naming the first bad field.
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.dispatch.max_parallel == 0 {
            return Err(DriverError::Config(
                "dispatch.max_parallel must be at least 1".to_string(),
            ));
        }
        if self.dispatch.step_timeout_ms == 0 {
            return Err(DriverError::Config(
                "dispatch.step_timeout_ms must be non-zero".to_string(),
            ));
        }
        let defaults = &self.connection_defaults;
        if defaults.timeout_ms == 0 {
            return Err(DriverError::Config(
                "connection_defaults.timeout_ms must be non-zero".to_string(),
            ));
        }
        if defaults.updates.max_deferred == 0 || defaults.updates.max_rects == 0 {
            return Err(DriverError::Config(
                "connection_defaults.updates limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-connection budget inside `step`.
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.step_timeout_ms)
    }
}
