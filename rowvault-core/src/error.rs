//! # Error Handling
//!
//! Error taxonomy shared by every rowvault crate.
//!
//! ## Propagation Rules
//!
//! 1. **Synchronous**: validation and capacity errors are detected before any
//!    mutation and returned directly to the caller
//! 2. **Job-terminal**: execution errors surface only through a job's `failed`
//!    state and its recorded error message
//! 3. **Explicit retry**: ref compare-and-swap conflicts are returned to the
//!    writer, never retried by the store itself

use thiserror::Error;

/// Result type alias for rowvault operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for rowvault
#[derive(Error, Debug)]
pub enum Error {
    // Caller errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Ref {reference} moved: expected {expected}, found {actual}")]
    Conflict {
        reference: String,
        expected: String,
        actual: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Capacity exceeded: {message} (limit {limit})")]
    Capacity { message: String, limit: u64 },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    // Execution errors
    #[error("Execution failed: {message}")]
    Execution { message: String },

    #[error("Job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("Stored object is corrupt: {details}")]
    Corruption { details: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification used to route errors to callers or job records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Capacity,
    Execution,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn capacity(message: impl Into<String>, limit: u64) -> Self {
        Error::Capacity {
            message: message.into(),
            limit,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. }
            | Error::PermissionDenied { .. }
            | Error::Configuration { .. } => ErrorKind::Validation,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Capacity { .. } => ErrorKind::Capacity,
            _ => ErrorKind::Execution,
        }
    }

    /// Only ref conflicts can succeed after the caller re-resolves
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::Conflict { .. } => "CONFLICT",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Capacity { .. } => "CAPACITY_EXCEEDED",
            Error::PermissionDenied { .. } => "PERMISSION_DENIED",
            Error::Execution { .. } => "EXECUTION_ERROR",
            Error::Cancelled { .. } => "CANCELLED",
            Error::Corruption { .. } => "CORRUPTION",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e {
            // Caller-facing errors keep their identity
            Error::Validation { .. }
            | Error::Conflict { .. }
            | Error::NotFound { .. }
            | Error::Capacity { .. }
            | Error::PermissionDenied { .. }
            | Error::Cancelled { .. } => e,
            other => Error::Execution {
                message: format!("{}: {}", f(), other),
            },
        })
    }
}
