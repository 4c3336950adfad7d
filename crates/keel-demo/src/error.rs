//! Keel demo: application error types.

use keel_core::error::DomainError;
use thiserror::Error;

/// Startup and runtime errors for the demo binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// An environment variable holds an invalid value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The runtime rejected an operation.
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
}
