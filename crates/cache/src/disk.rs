//! Disk tier: raw bytes persisted per key.
//!
//! Every method here is infallible from the caller's point of view. A missing
//! or unreadable file is a miss, a failed write is a no-op, and a failed
//! listing reports the last size that could be computed. Failures are logged
//! and otherwise swallowed so a bad disk never aborts a resolution.

use crate::CacheKey;
use futures::StreamExt;
use quire_storage::BackendHandle;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Extension used when a key's URI has none worth keeping.
pub const DEFAULT_EXTENSION: &str = "img";

/// Content-addressed byte store keyed by source location.
///
/// Cheap to clone; clones share the backend and the last-known usage figure.
#[derive(Clone)]
pub struct DiskStore {
    backend: BackendHandle,
    default_extension: Arc<str>,
    last_usage: Arc<AtomicU64>,
}

impl DiskStore {
    pub fn new(backend: BackendHandle) -> Self {
        Self::with_default_extension(backend, DEFAULT_EXTENSION)
    }

    pub fn with_default_extension(backend: BackendHandle, default_extension: impl AsRef<str>) -> Self {
        Self {
            backend,
            default_extension: Arc::from(default_extension.as_ref()),
            last_usage: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Relative path of the file backing `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        key.file_name(&self.default_extension)
    }

    /// Bytes previously stored for `key`, if any.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        match self.backend.read(&path).await {
            Ok(bytes) => {
                tracing::trace!(%key, path = %path.display(), bytes = bytes.len(), "Disk tier hit");
                Some(bytes)
            },
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                tracing::warn!(
                    %key,
                    path = %path.display(),
                    error = %*err,
                    retryable = err.is_retryable(),
                    "Unreadable disk cache entry; treating as miss"
                );
                None
            },
        }
    }

    /// Store `bytes` for `key`, replacing whatever was there.
    pub async fn put(&self, key: &CacheKey, bytes: &[u8]) {
        let path = self.path_for(key);
        match self.backend.write(&path, bytes).await {
            Ok(()) => tracing::trace!(%key, path = %path.display(), bytes = bytes.len(), "Disk tier write"),
            Err(err) => tracing::warn!(
                %key,
                path = %path.display(),
                error = %*err,
                retryable = err.is_retryable(),
                "Failed to persist disk cache entry"
            ),
        }
    }

    /// Remove every stored entry.
    pub async fn clear(&self) {
        match self.backend.clear().await {
            Ok(()) => {
                self.last_usage.store(0, Ordering::Relaxed);
                tracing::info!(backend = self.backend.name(), "Cleared disk cache");
            },
            Err(err) => tracing::warn!(backend = self.backend.name(), error = %*err, "Failed to clear disk cache"),
        }
    }

    /// Best-effort total size of stored entries, in bytes.
    ///
    /// Entries that fail to list are skipped. If nothing at all could be
    /// listed because of errors, the last successfully computed total is
    /// returned instead.
    pub async fn usage_size(&self) -> u64 {
        let mut total = 0u64;
        let mut listed = 0usize;
        let mut failed = 0usize;
        let mut entries = self.backend.list_stream();
        while let Some(entry) = entries.next().await {
            match entry {
                Ok(info) => {
                    listed += 1;
                    total = total.saturating_add(info.size);
                },
                Err(err) => {
                    failed += 1;
                    tracing::debug!(backend = self.backend.name(), error = %*err, "Skipping entry during usage scan");
                },
            }
        }
        if listed == 0 && failed > 0 {
            return self.last_usage.load(Ordering::Relaxed);
        }
        self.last_usage.store(total, Ordering::Relaxed);
        total
    }
}

/// Render a byte count with binary units, for humans.
///
/// ```
/// use quire_cache::format_bytes;
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1536), "1.5 KiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
