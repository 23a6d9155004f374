// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for hearth-host.
//!
//! The first group of variants is the lifecycle taxonomy surfaced to the
//! boundary layer; the rest wrap collaborator failures.

use thiserror::Error;

/// Host errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed or missing required input. Never retried automatically.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Path collision or optimistic-concurrency clash. Retry with fresh state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The actor lacks a right for a field it attempted to change.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The referenced entity no longer exists.
    #[error("Gone: {0}")]
    Gone(String),

    /// An online/offline/hand-off/relocate step failed at the process or filesystem layer.
    #[error("Runtime transition failed: {0}")]
    RuntimeTransition(String),

    /// The supervised process died unexpectedly.
    #[error("Process crashed: {0}")]
    Crash(String),

    /// The operation observed a cancellation request and stopped.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runner (process execution) failed.
    #[error("Runner error: {0}")]
    Runner(#[from] crate::runner::RunnerError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable error code for the boundary layer to map to a transport status.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Gone(_) => "GONE",
            Self::RuntimeTransition(_) => "RUNTIME_TRANSITION_FAILED",
            Self::Crash(_) => "PROCESS_CRASHED",
            Self::Cancelled => "CANCELLED",
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::Database(_) | Self::Migrate(_) => "DATABASE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "SERIALIZATION_ERROR",
            Self::Runner(_) => "RUNNER_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same request after reloading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type using the host Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Validation("x".into()).error_code(), "VALIDATION_ERROR");
        assert_eq!(Error::Conflict("x".into()).error_code(), "CONFLICT");
        assert_eq!(Error::Forbidden("x".into()).error_code(), "FORBIDDEN");
        assert_eq!(Error::Gone("x".into()).error_code(), "GONE");
        assert_eq!(Error::Cancelled.error_code(), "CANCELLED");
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(Error::Conflict("row changed".into()).is_retryable());
        assert!(!Error::Validation("name".into()).is_retryable());
        assert!(!Error::RuntimeTransition("probe".into()).is_retryable());
    }
}
