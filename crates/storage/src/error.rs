//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied by the filesystem
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::BackendError(_))
    }

    /// Returns `true` if the error only means "there is nothing there".
    ///
    /// The cache tier treats these as a plain miss rather than a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(ErrorKind::NotFound(PathBuf::from("a.png")).is_not_found());
        assert!(ErrorKind::Io(IoError::from(std::io::ErrorKind::NotFound)).is_not_found());
        assert!(!ErrorKind::Io(IoError::from(std::io::ErrorKind::Other)).is_not_found());
        assert!(!ErrorKind::PermissionDenied(PathBuf::from("a.png")).is_not_found());
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Io(IoError::from(std::io::ErrorKind::Interrupted)).is_retryable());
        assert!(!ErrorKind::InvalidPath(PathBuf::from("..")).is_retryable());
        assert!(!ErrorKind::NotFound(PathBuf::from("x")).is_retryable());
    }
}
