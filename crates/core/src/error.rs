//! Error types for arc-core
//!
//! Provides a unified error type that can be classified as retryable or not,
//! recorded on a transfer task, and converted to an appropriate exit code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for arc-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for arc-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed location or unknown provider id
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Source is a directory but a recursive copy was not requested
    #[error("Is a directory: {0}. Use -r/--recursive to copy directories")]
    IsDirectory(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authorization failure
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Destination is out of space or over quota
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Network timeout, rate limit or similar (retryable)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Post-transfer size or checksum check failed
    #[error("Integrity mismatch: {0}")]
    IntegrityMismatch(String),

    /// Operation cancelled by the caller
    #[error("Cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General error
    #[error("{0}")]
    General(String),
}

/// Classification of a per-task failure, stored on the task and in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidReference,
    NotFound,
    PermissionDenied,
    QuotaExceeded,
    Transient,
    IntegrityMismatch,
    Cancelled,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::InvalidReference => "InvalidReference",
            FailureKind::NotFound => "NotFound",
            FailureKind::PermissionDenied => "PermissionDenied",
            FailureKind::QuotaExceeded => "QuotaExceeded",
            FailureKind::Transient => "Transient",
            FailureKind::IntegrityMismatch => "IntegrityMismatch",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::Other => "Other",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Whether retrying the same operation may succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Classification recorded on a failed transfer task
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Error::InvalidReference(_) => FailureKind::InvalidReference,
            Error::NotFound(_) => FailureKind::NotFound,
            Error::PermissionDenied(_) => FailureKind::PermissionDenied,
            Error::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            Error::Transient(_) => FailureKind::Transient,
            Error::IntegrityMismatch(_) => FailureKind::IntegrityMismatch,
            Error::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Other,
        }
    }

    /// Classify an IO error raised while touching `path`
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => Error::NotFound(path.to_string()),
            ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => {
                Error::PermissionDenied(format!("{path}: {err}"))
            }
            ErrorKind::StorageFull | ErrorKind::FileTooLarge => {
                Error::QuotaExceeded(format!("{path}: {err}"))
            }
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::ResourceBusy => Error::Transient(format!("{path}: {err}")),
            ErrorKind::IsADirectory => Error::IsDirectory(path.to_string()),
            _ => Error::Io(err),
        }
    }

    /// Get the appropriate exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidReference(_) | Error::IsDirectory(_) => 2, // UsageError
            Error::Config(_) => 2,                                   // UsageError
            Error::Transient(_) => 3,                                // NetworkError
            Error::PermissionDenied(_) => 4,                         // AuthError
            Error::NotFound(_) => 5,                                 // NotFound
            Error::Cancelled => 130,                                 // Interrupted
            _ => 1,                                                  // GeneralError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(Error::InvalidReference("test".into()).exit_code(), 2);
        assert_eq!(Error::IsDirectory("test".into()).exit_code(), 2);
        assert_eq!(Error::Config("test".into()).exit_code(), 2);
        assert_eq!(Error::Transient("test".into()).exit_code(), 3);
        assert_eq!(Error::PermissionDenied("test".into()).exit_code(), 4);
        assert_eq!(Error::NotFound("test".into()).exit_code(), 5);
        assert_eq!(Error::Cancelled.exit_code(), 130);
        assert_eq!(Error::QuotaExceeded("test".into()).exit_code(), 1);
        assert_eq!(Error::General("test".into()).exit_code(), 1);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::Transient("timeout".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
        assert!(!Error::PermissionDenied("x".into()).is_retryable());
        assert!(!Error::QuotaExceeded("x".into()).is_retryable());
        assert!(!Error::IntegrityMismatch("x".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_io_classification() {
        use std::io::{Error as IoError, ErrorKind};

        let err = Error::from_io("a.txt", IoError::from(ErrorKind::NotFound));
        assert!(matches!(err, Error::NotFound(p) if p == "a.txt"));

        let err = Error::from_io("a.txt", IoError::from(ErrorKind::PermissionDenied));
        assert_eq!(err.failure_kind(), FailureKind::PermissionDenied);

        let err = Error::from_io("a.txt", IoError::from(ErrorKind::StorageFull));
        assert_eq!(err.failure_kind(), FailureKind::QuotaExceeded);

        let err = Error::from_io("a.txt", IoError::from(ErrorKind::TimedOut));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidReference("nocolon".into());
        assert_eq!(err.to_string(), "Invalid reference: nocolon");

        assert_eq!(FailureKind::IntegrityMismatch.to_string(), "IntegrityMismatch");
        assert_eq!(Error::Cancelled.to_string(), "Cancelled");
    }
}
