//! Error types for querywatch.

use thiserror::Error;

/// Diagnostic raised when a query threshold is violated in strict mode.
///
/// Carries the originating URL of the request and the formatted violation
/// message, which names the triggering statement.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("url: {url}\n{message}")]
pub struct DiagnosticError {
    /// URL of the request that triggered the violation
    pub url: String,
    /// Formatted violation message
    pub message: String,
}

/// Main error type for querywatch operations.
#[derive(Error, Debug)]
pub enum QueryWatchError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A threshold violation escalated in strict mode
    #[error("Query diagnostic violation: {0}")]
    Violation(#[from] DiagnosticError),

    /// The wrapped query engine failed the statement
    #[error("Query execution error: {0}")]
    Executor(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for QueryWatchError {
    fn from(e: config::ConfigError) -> Self {
        QueryWatchError::Config(e.to_string())
    }
}

/// Result type alias for querywatch operations.
pub type Result<T> = std::result::Result<T, QueryWatchError>;
