//! Local filesystem storage backend.
//!
//! Files are stored in a configured directory and accessed using standard
//! filesystem operations via `tokio::fs` for async I/O. The root directory is
//! created lazily by the first write and may be deleted out from under the
//! backend at any time.

use crate::backend::FileInfoStream;
use crate::error::ErrorKind;
use crate::path::{is_staging, staging_sibling};
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// Stores files in a directory on the local filesystem. All paths are relative
/// to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use quire_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("covers", "/var/cache/quire/covers")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory for cached files
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// The root does not have to exist yet; it is created on first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or if it exists but is
    /// not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() && !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        Ok(Self { name: name.into(), root })
    }

    /// Root directory this backend manages.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the absolute path for a relative storage path.
    ///
    /// Validates the path and joins it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path back to a relative storage path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        Ok(validate_path(relative)?)
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn ensure_parent(abs_path: &Path, path: &Path) -> Result<()> {
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(())
    }

    /// Classify a single directory entry. Entries can vanish between the
    /// directory read and the metadata call (a concurrent clear), which is
    /// reported as a skip rather than an error.
    async fn process_entry(&self, entry: DirEntry) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(WalkEntry::Skip),
            Err(e) => exn::bail!(Self::map_io_error(e, &path)),
        };
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        let relative = self.relative_path(&path)?;
        if metadata.is_file() && !is_staging(&relative) {
            return Ok(WalkEntry::File(FileInfo::new(relative, metadata.len())));
        }
        // Note: silently drop in-progress writes and broken symlinks.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream(&self) -> FileInfoStream<'_> {
        let mut stack = vec![self.root.clone()];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // A missing root (never written, or cleared) is an empty
                    // store, not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'dirs; },
                    };
                    match self.process_entry(entry).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Self::ensure_parent(&abs_path, path).await?;
        let staging = staging_sibling(&abs_path);
        if let Err(e) = fs::write(&staging, data).await {
            exn::bail!(Self::map_io_error(e, path));
        }
        if let Err(e) = fs::rename(&staging, &abs_path).await {
            // Best effort: the staging file is hidden from listings and reads
            // anyway, but don't leave it lying around if we can help it.
            _ = fs::remove_file(&staging).await;
            exn::bail!(Self::map_io_error(e, path));
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                tracing::debug!(backend = %self.name, root = %self.root.display(), "Cleared storage root");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => exn::bail!(Self::map_io_error(e, &self.root)),
        }
    }
}
