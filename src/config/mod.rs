//! Runtime configuration module
//!
//! Provides type-safe configuration for the orchestrator, loadable from
//! environment variables using the `config` and `dotenvy` crates.
//! Configuration is read with the `XSTATENET` prefix and nested values use
//! double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use xstatenet::config::OrchestratorConfig;
//!
//! let config = OrchestratorConfig::from_env().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod error;

pub use error::{ConfigError, ValidationError};

use serde::Deserialize;
use std::time::Duration;

/// Orchestrator configuration.
///
/// All fields have documented defaults; [`OrchestratorConfig::default()`]
/// is the usual entry point and [`OrchestratorConfig::from_env()`] overlays
/// environment variables (`XSTATENET__POOL_SIZE=8` etc.).
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of worker tasks servicing mailboxes.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Bounded capacity shared by the external and priority lanes of each
    /// mailbox. Enqueues beyond this fail fast with `Backpressure`.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Cap on self-send cascades within a single turn. When exceeded the
    /// remaining self-sends stay queued and the mailbox is rescheduled so
    /// other machines get a worker.
    #[serde(default = "default_max_micro_steps")]
    pub max_micro_steps_per_turn: usize,

    /// Default request/response timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// How long `stop()` waits for in-flight turns before aborting workers,
    /// in milliseconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Emit per-event debug logs. Off by default; the orchestrator stays
    /// quiet at `info` and above either way.
    #[serde(default)]
    pub enable_logging: bool,
}

impl OrchestratorConfig {
    /// Load configuration from environment variables.
    ///
    /// This function:
    /// 1. Loads a `.env` file if present (for development)
    /// 2. Reads environment variables with the `XSTATENET` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("XSTATENET")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any value is outside its legal range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pool_size == 0 {
            return Err(ValidationError::InvalidPoolSize);
        }
        if self.mailbox_capacity == 0 {
            return Err(ValidationError::InvalidMailboxCapacity);
        }
        if self.max_micro_steps_per_turn == 0 {
            return Err(ValidationError::InvalidMicroStepCap);
        }
        if self.default_timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }

    /// Default request timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Shutdown deadline as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            mailbox_capacity: default_mailbox_capacity(),
            max_micro_steps_per_turn: default_max_micro_steps(),
            default_timeout_ms: default_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            enable_logging: false,
        }
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_mailbox_capacity() -> usize {
    1024
}

fn default_max_micro_steps() -> usize {
    256
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.mailbox_capacity, 1024);
        assert_eq!(config.max_micro_steps_per_turn, 256);
        assert_eq!(config.default_timeout_ms, 30_000);
        assert!(!config.enable_logging);
    }

    #[test]
    fn default_config_validates() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config = OrchestratorConfig {
            pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ValidationError::InvalidPoolSize)));
    }

    #[test]
    fn zero_mailbox_capacity_is_rejected() {
        let config = OrchestratorConfig {
            mailbox_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidMailboxCapacity)
        ));
    }

    #[test]
    fn zero_micro_step_cap_is_rejected() {
        let config = OrchestratorConfig {
            max_micro_steps_per_turn: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ValidationError::InvalidMicroStepCap)));
    }

    #[test]
    fn timeout_converts_to_duration() {
        let config = OrchestratorConfig {
            default_timeout_ms: 1_500,
            ..Default::default()
        };
        assert_eq!(config.default_timeout(), Duration::from_millis(1_500));
    }
}
