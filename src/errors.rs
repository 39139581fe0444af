//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the keyword highlighting engine, providing
//! structured error types and conversion utilities for all system components.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from various system components
//! - **Output**: Structured error types with context and error chains
//! - **Error Categories**: Configuration, Pattern, Document, Store, Transport
//!
//! ## Key Features
//! - Hierarchical error types with detailed context
//! - Automatic error conversion and chaining
//! - Structured logging integration
//!
//! The engine itself treats every error as non-fatal: a failed store read
//! leaves the in-memory configuration untouched, a failed message becomes a
//! `success: false` acknowledgement, and the worst observable outcome is a
//! stale or absent annotation layer.

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error types for the keyword highlighting engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration errors (file loading, validation)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Pattern compilation errors (e.g. alternation exceeds regex size limit)
    #[error("Pattern compilation failed: {reason}")]
    Pattern { reason: String },

    /// Selector parsing errors
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// Settings store errors
    #[error("Settings store error during {operation}: {details}")]
    Store { operation: String, details: String },

    /// A referenced setting does not exist in the store
    #[error("Setting not found: {id}")]
    SettingNotFound { id: String },

    /// Malformed inbound message payloads
    #[error("Invalid message: {details}")]
    InvalidMessage { details: String },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation errors
    #[error("Validation failed for field '{field}': {reason}")]
    ValidationFailed { field: String, reason: String },
}

impl EngineError {
    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Config { .. }
            | EngineError::ValidationFailed { .. }
            | EngineError::Toml(_) => "configuration",
            EngineError::Pattern { .. } | EngineError::InvalidSelector { .. } => "pattern",
            EngineError::Store { .. }
            | EngineError::SettingNotFound { .. }
            | EngineError::Database(_)
            | EngineError::Serialization(_) => "store",
            EngineError::InvalidMessage { .. } | EngineError::Json(_) => "transport",
            EngineError::Io(_) => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = EngineError::Pattern {
            reason: "too large".to_string(),
        };
        assert_eq!(err.category(), "pattern");

        let err = EngineError::Store {
            operation: "load_active".to_string(),
            details: "tree missing".to_string(),
        };
        assert_eq!(err.category(), "store");
    }

    #[test]
    fn test_display_includes_context() {
        let err = EngineError::InvalidSelector {
            selector: "??".to_string(),
            reason: "unsupported form".to_string(),
        };
        assert!(err.to_string().contains("??"));
    }
}
