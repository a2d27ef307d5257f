//! Path validation and staging utilities.
//!
//! Cache entries are addressed by paths relative to the storage root. Those
//! paths are derived from hashes, so they should always be well-formed, but
//! backends still refuse anything that would escape the root.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ErrorKind, Result};

/// Suffix given to in-progress writes before they are renamed into place.
pub(crate) const STAGING_SUFFIX: &str = "part";

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** Null bytes are explicitly rejected; everything else that
/// >           `Path::components()` accepts is left alone.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use quire_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("af1349b9.png").is_ok());
/// assert!(validate_path("covers/af1349b9.png").is_ok());
/// // Invalid paths
/// assert!(validate_path("../af1349b9.png").is_err());
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("./covers//../af1349b9.png").unwrap(),
///     Path::new("af1349b9.png")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Hidden sibling path used while a write is in progress.
///
/// Unique per process and per call, so concurrent writers of the same target
/// never share a staging file: the last rename wins.
pub(crate) fn staging_sibling(target: &Path) -> PathBuf {
    let sequence = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_default());
    name.push(format!(".{}-{sequence}.{STAGING_SUFFIX}", std::process::id()));
    target.with_file_name(name)
}

/// Whether a path points at an in-progress write.
pub(crate) fn is_staging(path: &Path) -> bool {
    let hidden = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.'));
    hidden && path.extension().is_some_and(|ext| ext == STAGING_SUFFIX)
}
