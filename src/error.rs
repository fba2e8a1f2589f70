//! Error types for ghost batch normalization.
//!
//! Every failure is detected before any partial computation runs and aborts
//! the whole forward call; a partially normalized batch would silently
//! corrupt downstream training.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GhostNormError {
    #[error("Invalid configuration in '{operation}': {reason}")]
    InvalidConfiguration { operation: String, reason: String },

    #[error("Invalid shape in operation '{operation}': {reason}")]
    InvalidShape { operation: String, reason: String },

    #[error("Parameters not initialized in operation '{operation}': {reason}")]
    UninitializedParameters { operation: String, reason: String },
}

impl GhostNormError {
    pub fn invalid_configuration(
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        GhostNormError::InvalidConfiguration {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_shape(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        GhostNormError::InvalidShape {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn uninitialized(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        GhostNormError::UninitializedParameters {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GhostNormError>;
