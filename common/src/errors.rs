//! Common error types used across the workspace

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared error type for the security engine and its collaborators
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum EngineError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Security violation: {message}")]
    Security { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Convert to HTTP status code for callers wrapping the engine in a service
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::InvalidInput { .. } => 400,
            EngineError::Session { .. } => 401,
            EngineError::Security { .. } => 403,
            EngineError::NotFound { .. } => 404,
            EngineError::RateLimit { .. } => 429,
            EngineError::Configuration { .. } | EngineError::Internal { .. } => 500,
        }
    }
}
