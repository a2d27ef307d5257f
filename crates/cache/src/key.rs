//! Cache keys and their on-disk file names.

use derive_more::Display;
use std::path::PathBuf;
use std::sync::Arc;

/// Longest extension (in characters) accepted from a URI path.
const MAX_EXTENSION_LEN: usize = 5;

/// A source location, used verbatim as the cache key.
///
/// Two different strings are always two different keys, even when they would
/// resolve to the same bytes: no case folding, no URL normalization.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{_0}")]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(location: impl AsRef<str>) -> Self {
        Self(Arc::from(location.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase hex BLAKE3 digest of the key's exact string form.
    pub fn digest(&self) -> String {
        blake3::hash(self.0.as_bytes()).to_hex().to_string()
    }

    /// Extension inferred from the last segment of the URI path.
    ///
    /// Query strings and fragments are ignored. Only short, ASCII
    /// alphanumeric extensions are accepted; anything else yields `None`.
    pub fn extension(&self) -> Option<String> {
        let location = self.0.as_ref();
        let without_scheme = location.split_once("://").map_or(location, |(_, rest)| rest);
        let end = without_scheme.find(['?', '#']).unwrap_or(without_scheme.len());
        let before_query = &without_scheme[..end];
        // The authority is not a path segment: "https://example.com" has no
        // extension even though the host contains a dot.
        let path = match location.contains("://") {
            true => before_query.find('/').map_or("", |slash| &before_query[slash..]),
            false => before_query,
        };
        let segment = path.rsplit('/').next()?;
        let (stem, ext) = segment.rsplit_once('.')?;
        let valid = !stem.is_empty()
            && !ext.is_empty()
            && ext.len() <= MAX_EXTENSION_LEN
            && ext.chars().all(|c| c.is_ascii_alphanumeric());
        valid.then(|| ext.to_ascii_lowercase())
    }

    /// Relative file name for this key in the disk tier.
    pub fn file_name(&self, default_extension: &str) -> PathBuf {
        let extension = self.extension().unwrap_or_else(|| default_extension.to_string());
        PathBuf::from(format!("{}.{extension}", self.digest()))
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}
impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
