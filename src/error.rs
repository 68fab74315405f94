//! Error types for chainwarden.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainwardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The filter engine refused a required operation.
    #[error("{operation} failed (exit code {}): {stderr}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Engine {
        operation: String,
        stderr: String,
        code: Option<i32>,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Permission denied: {0}")]
    Permission(String),
}

impl ChainwardenError {
    /// Build an engine error from a failed command.
    pub fn engine(operation: impl Into<String>, stderr: impl Into<String>, code: Option<i32>) -> Self {
        Self::Engine {
            operation: operation.into(),
            stderr: stderr.into(),
            code,
        }
    }
}
