//! A JSON file of books and where their covers might be.
//!
//! ```json
//! {"books": {"dune": {"primary": "https://…/dune.jpg", "candidates": ["…", "…"]}}}
//! ```

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use quire_cache::CacheKey;
use quire_resolve::{CandidateRecord, WinnerPersistence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::{fs, process};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub books: BTreeMap<String, CandidateRecord>,
}

impl Catalog {
    /// A missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err).or_raise(|| ErrorKind::CatalogRead(path.to_path_buf())),
        };
        serde_json::from_slice(&bytes).or_raise(|| ErrorKind::CatalogRead(path.to_path_buf()))
    }

    /// Rewrite the whole file, via a sibling temp file and a rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let error = || ErrorKind::CatalogWrite(path.to_path_buf());
        let json = serde_json::to_vec_pretty(self).or_raise(error)?;
        let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
        let staging = path.with_file_name(format!(".{file_name}.{}.tmp", process::id()));
        fs::write(&staging, json).or_raise(error)?;
        if let Err(err) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(err).or_raise(error);
        }
        Ok(())
    }
}

/// One book in a catalog file, which learns its winning cover location.
///
/// Inside a runtime the file is rewritten on the blocking pool; call
/// [`flush()`](Self::flush) before exiting to wait for those writes.
pub struct CatalogEntry {
    path: Arc<Path>,
    book: String,
    catalog: Arc<Mutex<Catalog>>,
    saving: Mutex<Vec<JoinHandle<()>>>,
}

impl CatalogEntry {
    pub fn open(path: impl Into<PathBuf>, book: impl Into<String>) -> Result<Self> {
        let path: PathBuf = path.into();
        let catalog = Catalog::load(&path)?;
        Ok(Self {
            path: Arc::from(path),
            book: book.into(),
            catalog: Arc::new(Mutex::new(catalog)),
            saving: Mutex::new(Vec::new()),
        })
    }

    /// The book's stored locations; empty if the catalog doesn't know it.
    pub fn record(&self) -> CandidateRecord {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner).books.get(&self.book).cloned().unwrap_or_default()
    }

    /// Wait for every catalog write started so far.
    pub async fn flush(&self) {
        let saving = std::mem::take(&mut *self.saving.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in saving {
            if let Err(err) = handle.await {
                tracing::warn!(path = %self.path.display(), error = %err, "Catalog write did not finish");
            }
        }
    }
}

/// Write whatever the catalog holds now. Holding the lock for the write means
/// a later save can never be overtaken by an earlier one.
fn save_current(catalog: &Mutex<Catalog>, path: &Path, book: &str, winner: &CacheKey) {
    let catalog = catalog.lock().unwrap_or_else(PoisonError::into_inner);
    match catalog.save(path) {
        Ok(()) => tracing::info!(book, %winner, "Recorded winning cover location"),
        Err(err) => tracing::warn!(book, error = %*err, "Could not record winning cover location"),
    }
}

impl WinnerPersistence for CatalogEntry {
    fn persist_winner(&self, winner: &CacheKey) {
        let changed = self
            .catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .books
            .entry(self.book.clone())
            .or_default()
            .promote(winner.as_str());
        if !changed {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            save_current(&self.catalog, &self.path, &self.book, winner);
            return;
        };
        let (catalog, path, book, winner) = (self.catalog.clone(), self.path.clone(), self.book.clone(), winner.clone());
        let handle = runtime.spawn_blocking(move || save_current(&catalog, &path, &book, &winner));
        self.saving.lock().unwrap_or_else(PoisonError::into_inner).push(handle);
    }
}
