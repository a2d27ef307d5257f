//! Fetch Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. These never escape the cache tier: the
//! [`FetchCoordinator`](crate::FetchCoordinator) logs them and collapses
//! every one of them into a [`Lookup::Miss`](crate::Lookup::Miss).

use derive_more::{Display, Error};

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch and decode operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The location could not be parsed as something fetchable.
    #[display("invalid location: {_0}")]
    InvalidLocation(#[error(not(source))] String),
    /// The location uses a scheme this fetcher does not speak.
    #[display("unsupported scheme: {_0}")]
    UnsupportedScheme(#[error(not(source))] String),
    /// The remote answered with a non-2xx status.
    #[display("unexpected status code: {_0}")]
    Status(#[error(not(source))] u16),
    /// Connection, TLS, timeout or body read failure.
    #[display("transport error: {_0}")]
    Transport(#[error(not(source))] String),
    /// The response body exceeded the configured limit.
    #[display("response body larger than {_0} bytes")]
    TooLarge(#[error(not(source))] u64),
    /// Bytes were obtained but are not a usable object.
    #[display("undecodable data")]
    Decode,
    /// A blocking task was cancelled or panicked.
    #[display("background task interrupted")]
    Interrupted,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status(code) => matches!(code, 408 | 429 | 500 | 502 | 503 | 504),
            Self::Transport(_) | Self::Interrupted => true,
            _ => false,
        }
    }
}
