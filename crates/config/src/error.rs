//! Configuration Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No cache directory was configured, and the platform has no home
    /// directory to derive a default from.
    #[display("no cache directory configured; set cache.directory or QUIRE_CACHE__DIRECTORY")]
    NoCacheDirectory,
    /// A configuration source could not be read or parsed.
    #[display("failed to load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// Configuration parsed but a value is unusable.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
}
