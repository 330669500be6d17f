//! Error types for GrantBot.
//!
//! Library crates use [`GrantBotError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Recoverable, stage-local failures (a single bad URL, a malformed selector
//! reply) have their own enums in the crates that produce them and surface as
//! [`crate::Diagnostic`]s instead of errors.

use std::path::PathBuf;

/// Top-level error type for all GrantBot operations.
#[derive(Debug, thiserror::Error)]
pub enum GrantBotError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP client error (client construction, unreadable responses).
    #[error("network error: {0}")]
    Network(String),

    /// HTML or model-output parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Chat-completion call failed (transport, quota, malformed envelope).
    #[error("LLM error: {0}")]
    Llm(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (empty query, bad URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GrantBotError>;

impl GrantBotError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
