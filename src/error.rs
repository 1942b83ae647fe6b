//! Error types for the restic exporter.
//!
//! This module defines custom error types using `thiserror` for structured
//! error handling throughout the application.

use std::time::Duration;
use thiserror::Error;

/// Main error type for restic exporter operations.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// restic exited with a non-zero status
    #[error("Error executing restic {command} command: {stderr} Exit code: {code}")]
    Command {
        command: String,
        stderr: String,
        code: i32,
    },

    /// restic could not be started at all
    #[error("Failed to execute restic {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// restic did not finish within the configured timeout
    #[error("restic {command} timed out after {secs}s", secs = .after.as_secs())]
    Timeout { command: String, after: Duration },

    /// Error parsing restic output
    #[error("Failed to parse restic output: {0}")]
    ParseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Metrics error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// HTTP server error
    #[error("HTTP server error: {0}")]
    Server(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ExporterError {
    fn from(e: serde_json::Error) -> Self {
        ExporterError::ParseError(e.to_string())
    }
}

/// Result type alias for exporter operations.
pub type Result<T> = std::result::Result<T, ExporterError>;
