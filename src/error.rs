//! # Core Error Types
//!
//! Crate-wide error type for batch process orchestration, using thiserror
//! for structured variants instead of `Box<dyn Error>` patterns.

use thiserror::Error;

use crate::store::StoreError;

/// Top-level error for orchestration entry points
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Orchestration error: {message}")]
    Orchestration { message: String },
}

impl CoreError {
    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an orchestration error
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration {
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::configuration("loader", err.to_string())
    }
}

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, CoreError>;
