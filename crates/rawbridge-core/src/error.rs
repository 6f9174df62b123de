//! Error types for rawbridge sessions.
//!
//! Every failure that crosses the public surface is one of the variants
//! below. Opaque engine status codes are translated exactly once, at the
//! scheduler boundary, through [`SessionError::from_status`]; raw codes
//! never leak to callers except inside the `Internal` catch-all.

use std::path::PathBuf;
use thiserror::Error;

use crate::engine::EngineStatus;
use crate::handle::HandleState;

/// Top-level error type for session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// File not found or unreadable.
    #[error("I/O error for {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// File signature not recognized by the decode engine.
    #[error("Unsupported RAW format: {0}")]
    UnsupportedFormat(String),

    /// The decode engine reported malformed data mid-parse.
    #[error("Corrupt RAW data: {0}")]
    CorruptData(String),

    /// Operation invoked in a state that forbids it. Programmer error,
    /// never retryable.
    #[error("Invalid state for {operation}: requires {required}, handle is {actual}")]
    InvalidState {
        operation: &'static str,
        required: HandleState,
        actual: HandleState,
    },

    /// Encode option validation failed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An external codec library failed.
    #[error("Encode error ({format}): {message}")]
    Encode { format: String, message: String },

    /// Allocation failure or resource exhaustion.
    #[error("Resource exhausted: {0}")]
    Resource(String),

    /// Unclassified native failure. Carries the raw engine code for
    /// diagnosis.
    #[error("Internal decoder error (code {code}): {message}")]
    Internal { code: i32, message: String },
}

impl SessionError {
    /// Translate an opaque engine status into a typed error.
    ///
    /// Unmapped codes funnel into `Internal` and log the raw code so the
    /// mapping table can be extended.
    pub fn from_status(status: EngineStatus, context: &str) -> Self {
        match status {
            EngineStatus::FILE_UNSUPPORTED => {
                SessionError::UnsupportedFormat(context.to_string())
            }
            EngineStatus::DATA_ERROR | EngineStatus::NO_THUMBNAIL => {
                SessionError::CorruptData(format!("{}: {}", context, status.strerror()))
            }
            EngineStatus::IO_ERROR => SessionError::Io {
                path: PathBuf::from(context),
                message: status.strerror().to_string(),
            },
            EngineStatus::INSUFFICIENT_MEMORY => {
                SessionError::Resource(format!("{}: {}", context, status.strerror()))
            }
            other => {
                tracing::warn!(code = other.code(), context, "unmapped engine status");
                SessionError::Internal {
                    code: other.code(),
                    message: format!("{}: {}", context, other.strerror()),
                }
            }
        }
    }

    /// Whether retrying the same call can reasonably succeed.
    ///
    /// State errors are programmer errors; corrupt/unsupported inputs are
    /// terminal for that input. I/O and resource pressure may clear up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Io { .. } | SessionError::Resource(_))
    }
}

/// Convenience type alias for session results.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}
