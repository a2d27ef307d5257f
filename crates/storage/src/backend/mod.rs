//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, the unified interface the
//! disk cache tier is written against. Production uses [`LocalBackend`];
//! tests in other crates use `MockBackend` behind the `mock` feature.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::FileInfo;
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;

pub type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for storage backends.
///
/// All storage operations are asynchronous so that callers can suspend on
/// I/O without blocking other work.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Absent Root
/// A backend whose root directory does not exist (yet, or any more) behaves
/// as an empty store: listing yields nothing, reads are
/// [`NotFound`](crate::error::ErrorKind::NotFound), and writes recreate it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Stream metadata for every stored file.
    ///
    /// Yields results incrementally. A failure on one entry is yielded as an
    /// `Err` item without ending the stream, so callers can decide whether a
    /// partial listing is good enough.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::StreamExt;
    /// # use quire_storage::backend::StorageBackend;
    /// # async fn example(backend: &dyn StorageBackend) -> u64 {
    /// let mut total = 0;
    /// let mut stream = backend.list_stream();
    /// while let Some(item) = stream.next().await {
    ///     if let Ok(info) = item {
    ///         total += info.size;
    ///     }
    /// }
    /// # total
    /// # }
    /// ```
    fn list_stream(&self) -> FileInfoStream<'_>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, replacing any existing file.
    ///
    /// # Notes
    /// - Implementations must create parent directories as needed.
    /// - Implementations must never expose a partially written file to a
    ///   concurrent [`read()`](Self::read): write elsewhere, then move into
    ///   place.
    ///
    /// ```no_run
    /// use std::path::Path;
    /// # use quire_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// backend.write(Path::new("0a1b2c.png"), b"\x89PNG...").await?;
    /// # Ok(())
    /// # }
    /// ```
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Remove everything stored under the root.
    ///
    /// Clearing an already-absent root succeeds.
    async fn clear(&self) -> Result<()>;
}
