//! Storage backends for the on-disk cover cache.
//!
//! The cache tier above this crate only ever sees a [`StorageBackend`]: a
//! flat-ish CRUD interface over paths relative to a root. The local backend
//! is what runs in production; the in-memory [`MockBackend`](backend::MockBackend)
//! (feature `mock`) exists for other crates' tests.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
