//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{GatekeeperError, Result};
use crate::gate::DEFAULT_CONCURRENT_NUM;
use crate::ratelimit::{ThrottleConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW};

/// Prefix for environment variable overrides, e.g. `GATEKEEPER__THROTTLE__MAX_ATTEMPTS`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-caller rate limiting configuration
    #[serde(default)]
    pub throttle: ThrottleSettings,

    /// Concurrency gate configuration
    #[serde(default)]
    pub concurrency: ConcurrencySettings,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            json_logs: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// Attempts allowed per caller per window; 0 selects the default
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,

    /// Window length in milliseconds; 0 selects the default
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_ms: default_window_ms(),
        }
    }
}

impl ThrottleSettings {
    pub fn to_throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig::new(self.max_attempts, Duration::from_millis(self.window_ms))
    }
}

fn default_max_attempts() -> u64 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW.as_millis() as u64
}

/// Concurrency gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Requests allowed to execute at once
    #[serde(default = "default_concurrent_num")]
    pub concurrent_num: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            concurrent_num: default_concurrent_num(),
        }
    }
}

fn default_concurrent_num() -> usize {
    DEFAULT_CONCURRENT_NUM
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then apply
    /// `GATEKEEPER__SECTION__FIELD` environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: GatekeeperConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot be turned into working components.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.concurrent_num == 0 {
            return Err(GatekeeperError::Config(
                "concurrency.concurrent_num must be positive".to_string(),
            ));
        }
        self.throttle.to_throttle_config().validate()
    }
}
