//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Worker pool size must be at least 1")]
    InvalidPoolSize,

    #[error("Mailbox capacity must be at least 1")]
    InvalidMailboxCapacity,

    #[error("Micro-step cap must be at least 1")]
    InvalidMicroStepCap,

    #[error("Invalid request timeout")]
    InvalidTimeout,
}
