//! Error types for mqstate-core

use thiserror::Error;

/// Errors that can occur during a convergence run
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("attribute path '{path}' writes through a non-map value")]
    PathConflict { path: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("action '{action}' failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Shorthand for an `InvalidConfig` error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        CoreError::InvalidConfig {
            reason: reason.into(),
        }
    }
}
