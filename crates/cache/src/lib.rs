//! Two-tier cover cache in front of a network fetch.
//!
//! A lookup for a location goes through three tiers in order:
//! - **Memory**: decoded objects, process lifetime, unbounded
//!   ([`MemoryCache`]).
//! - **Disk**: raw bytes keyed by a BLAKE3 digest of the location, kept
//!   until cleared ([`DiskStore`] over a
//!   [`StorageBackend`](quire_storage::StorageBackend)).
//! - **Network**: whatever [`Fetcher`] is plugged in, normally
//!   [`HttpFetcher`].
//!
//! [`FetchCoordinator`] ties them together and guarantees at most one load
//! per key is running at any moment. Only successfully decoded bytes are
//! ever cached; failures of any kind are a [`Lookup::Miss`] and are never
//! remembered.

mod coordinator;
mod decode;
mod disk;
pub mod error;
mod fetch;
mod key;
mod memory;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use crate::coordinator::{FetchCoordinator, Lookup};
#[cfg(any(test, feature = "mock"))]
pub use crate::decode::sample_png;
pub use crate::decode::{Cover, CoverDecoder, Decoder, RawDecoder};
pub use crate::disk::{DEFAULT_EXTENSION, DiskStore, format_bytes};
pub use crate::fetch::{Fetcher, HttpFetcher};
pub use crate::key::CacheKey;
pub use crate::memory::MemoryCache;
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockFetcher;

/// Coordinator producing decoded cover images.
pub type CoverCoordinator = FetchCoordinator<CoverDecoder>;
