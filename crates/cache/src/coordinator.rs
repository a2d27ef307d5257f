//! Memory, then disk, then network, with one load per key at a time.

use crate::decode::Decoder;
use crate::error::{ErrorKind, Result};
use crate::{CacheKey, DiskStore, Fetcher, MemoryCache};
use exn::ResultExt;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Outcome of a lookup. Every failure along the way collapses into `Miss`.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit(Arc<T>),
    Miss,
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn hit(&self) -> Option<&Arc<T>> {
        match self {
            Self::Hit(object) => Some(object),
            Self::Miss => None,
        }
    }

    pub fn into_hit(self) -> Option<Arc<T>> {
        match self {
            Self::Hit(object) => Some(object),
            Self::Miss => None,
        }
    }
}

// Derived `Clone` would require `T: Clone`.
impl<T> Clone for Lookup<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Hit(object) => Self::Hit(object.clone()),
            Self::Miss => Self::Miss,
        }
    }
}

type InFlight<T> = Shared<BoxFuture<'static, Lookup<T>>>;

struct Inner<D: Decoder> {
    disk: DiskStore,
    memory: Arc<MemoryCache<D::Output>>,
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<D>,
    in_flight: Mutex<HashMap<CacheKey, InFlight<D::Output>>>,
}

/// Single entry point for "get the object for this location".
///
/// Lookups go memory, then disk, then network. Only the memory check happens
/// on the caller's task: everything after it runs as one spawned load per
/// key, which every concurrent caller for that key waits on. The load always
/// runs to completion even if every waiter goes away, so its result still
/// lands in both tiers. Disk is written before memory.
pub struct FetchCoordinator<D: Decoder> {
    inner: Arc<Inner<D>>,
}

impl<D: Decoder> Clone for FetchCoordinator<D> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<D: Decoder> FetchCoordinator<D> {
    pub fn new(disk: DiskStore, memory: Arc<MemoryCache<D::Output>>, fetcher: Arc<dyn Fetcher>, decoder: D) -> Self {
        Self {
            inner: Arc::new(Inner {
                disk,
                memory,
                fetcher,
                decoder: Arc::new(decoder),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn disk(&self) -> &DiskStore {
        &self.inner.disk
    }

    pub fn memory(&self) -> &MemoryCache<D::Output> {
        &self.inner.memory
    }

    /// Number of keys with a load currently running.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Look up `key`, waiting for however long the load takes.
    pub async fn fetch(&self, key: &CacheKey) -> Lookup<D::Output> {
        if let Some(object) = self.inner.memory.get(key) {
            tracing::trace!(%key, "Memory tier hit");
            return Lookup::Hit(object);
        }
        self.join_or_start(key).await
    }

    /// Look up `key` unless `cancel` fires first.
    ///
    /// Returns `None` once cancelled. Cancelling only detaches this caller:
    /// a load it started or joined keeps running for everyone else and still
    /// fills the caches.
    pub async fn fetch_cancellable(&self, key: &CacheKey, cancel: &CancellationToken) -> Option<Lookup<D::Output>> {
        if cancel.is_cancelled() {
            return None;
        }
        if let Some(object) = self.inner.memory.get(key) {
            tracing::trace!(%key, "Memory tier hit");
            return Some(Lookup::Hit(object));
        }
        let load = self.join_or_start(key);
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(%key, "Caller stopped waiting for cover");
                None
            },
            lookup = load => Some(lookup),
        }
    }

    /// Wipe both tiers.
    ///
    /// Loads already running are not interrupted and may repopulate their
    /// own key afterwards.
    pub async fn clear_all(&self) {
        self.inner.memory.clear();
        self.inner.disk.clear().await;
    }

    /// Best-effort size of the disk tier, in bytes.
    pub async fn usage_size(&self) -> u64 {
        self.inner.disk.usage_size().await
    }

    /// Attach to the running load for `key`, or start one.
    fn join_or_start(&self, key: &CacheKey) -> InFlight<D::Output> {
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(load) = in_flight.get(key) {
            tracing::trace!(%key, "Joining in-flight load");
            return load.clone();
        }
        // A load may have finished between the caller's memory check and
        // taking the lock.
        if let Some(object) = self.inner.memory.get(key) {
            return futures::future::ready(Lookup::Hit(object)).boxed().shared();
        }

        let inner = self.inner.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let _registration = Registration { inner: inner.clone(), key: task_key.clone() };
            load(&inner, &task_key).await
        });
        let join_key = key.clone();
        let shared = async move {
            match handle.await {
                Ok(lookup) => lookup,
                Err(err) => {
                    tracing::error!(key = %join_key, error = %err, "Cover load task failed");
                    Lookup::Miss
                },
            }
        }
        .boxed()
        .shared();
        in_flight.insert(key.clone(), shared.clone());
        shared
    }
}

/// Removes a key's in-flight entry when its load task ends, however it ends.
struct Registration<D: Decoder> {
    inner: Arc<Inner<D>>,
    key: CacheKey,
}

impl<D: Decoder> Drop for Registration<D> {
    fn drop(&mut self) {
        self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}

#[instrument(level = "debug", skip_all, fields(%key))]
async fn load<D: Decoder>(inner: &Inner<D>, key: &CacheKey) -> Lookup<D::Output> {
    if let Some(bytes) = inner.disk.get(key).await {
        match decode(&inner.decoder, Arc::from(bytes)).await {
            Ok(object) => {
                let object = Arc::new(object);
                inner.memory.put(key.clone(), object.clone());
                tracing::debug!("Loaded cover from disk");
                return Lookup::Hit(object);
            },
            // Left in place; the network result below overwrites it.
            Err(err) => tracing::warn!(error = %*err, "Disk cache entry failed to decode; falling back to network"),
        }
    }

    let bytes: Arc<[u8]> = match inner.fetcher.fetch(key).await {
        Ok(bytes) => Arc::from(bytes),
        Err(err) => {
            tracing::debug!(error = %*err, retryable = err.is_retryable(), "Network fetch failed");
            return Lookup::Miss;
        },
    };
    let object = match decode(&inner.decoder, bytes.clone()).await {
        Ok(object) => Arc::new(object),
        Err(err) => {
            tracing::debug!(error = %*err, bytes = bytes.len(), "Fetched bytes failed to decode; not caching");
            return Lookup::Miss;
        },
    };
    inner.disk.put(key, &bytes).await;
    inner.memory.put(key.clone(), object.clone());
    tracing::debug!(bytes = bytes.len(), "Loaded cover from network");
    Lookup::Hit(object)
}

async fn decode<D: Decoder>(decoder: &Arc<D>, bytes: Arc<[u8]>) -> Result<D::Output> {
    let decoder = decoder.clone();
    tokio::task::spawn_blocking(move || decoder.decode(&bytes)).await.or_raise(|| ErrorKind::Interrupted)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{CoverDecoder, RawDecoder, sample_png};
    use crate::mock::MockFetcher;
    use async_trait::async_trait;
    use futures::future::join_all;
    use quire_storage::backend::{FileInfoStream, MockBackend};
    use quire_storage::error::Result as StorageResult;
    use quire_storage::StorageBackend;
    use std::path::Path;
    use std::time::Duration;

    const COVER: &str = "https://covers.example/a.png";

    struct Harness<D: Decoder> {
        backend: Arc<MockBackend>,
        fetcher: Arc<MockFetcher>,
        coordinator: FetchCoordinator<D>,
    }

    fn harness<D: Decoder>(backend: MockBackend, fetcher: MockFetcher, decoder: D) -> Harness<D> {
        let backend = Arc::new(backend);
        let fetcher = Arc::new(fetcher);
        let coordinator =
            FetchCoordinator::new(DiskStore::new(backend.clone()), Arc::default(), fetcher.clone(), decoder);
        Harness { backend, fetcher, coordinator }
    }

    async fn wait_for_calls(fetcher: &MockFetcher, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while fetcher.call_count() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("fetcher was never called");
    }

    #[tokio::test]
    async fn test_network_hit_fills_both_tiers() {
        let h = harness(MockBackend::default(), MockFetcher::with_responses([(COVER, b"bytes")]), RawDecoder);
        let key = CacheKey::new(COVER);

        let lookup = h.coordinator.fetch(&key).await;
        assert_eq!(lookup.hit().map(|b| b.as_slice()), Some(&b"bytes"[..]));
        assert_eq!(h.backend.writes(), 1);
        assert_eq!(h.coordinator.disk().get(&key).await, Some(b"bytes".to_vec()));
        assert!(h.coordinator.memory().get(&key).is_some());

        // Served from memory: no further disk read or network call.
        let reads = h.backend.reads();
        assert!(h.coordinator.fetch(&key).await.is_hit());
        assert_eq!(h.backend.reads(), reads);
        assert_eq!(h.fetcher.call_count(), 1);
        assert_eq!(h.coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_disk_hit_skips_network() {
        let key = CacheKey::new(COVER);
        let backend = MockBackend::with_files([(key.file_name("img"), b"from disk".to_vec())]);
        let h = harness(backend, MockFetcher::with_responses([(COVER, b"from network")]), RawDecoder);

        let lookup = h.coordinator.fetch(&key).await;
        assert_eq!(lookup.hit().map(|b| b.as_slice()), Some(&b"from disk"[..]));
        assert_eq!(h.fetcher.call_count(), 0);
        assert_eq!(h.backend.writes(), 0);
        assert!(h.coordinator.memory().get(&key).is_some());
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_falls_through_to_network() {
        let key = CacheKey::new(COVER);
        let backend = MockBackend::with_files([(key.file_name("img"), b"<html>not a png</html>".to_vec())]);
        let png = sample_png(5, 3);
        let h = harness(backend, MockFetcher::with_responses([(COVER, png.clone())]), CoverDecoder);

        let cover = h.coordinator.fetch(&key).await.into_hit().unwrap();
        assert_eq!((cover.width, cover.height), (5, 3));
        assert_eq!(h.fetcher.call_count(), 1);
        assert_eq!(h.coordinator.disk().get(&key).await, Some(png));
    }

    #[tokio::test]
    async fn test_failures_write_nothing() {
        let h = harness(
            MockBackend::default(),
            MockFetcher::with_responses([("https://covers.example/page.png", b"<html>login</html>")]),
            CoverDecoder,
        );

        // 404 from the network.
        let missing = CacheKey::new("https://covers.example/missing.png");
        assert!(!h.coordinator.fetch(&missing).await.is_hit());
        // 200 with bytes that aren't an image.
        let page = CacheKey::new("https://covers.example/page.png");
        assert!(!h.coordinator.fetch(&page).await.is_hit());

        assert_eq!(h.backend.writes(), 0);
        assert!(h.coordinator.memory().is_empty());
        assert_eq!(h.coordinator.in_flight_count(), 0);

        // Misses are not cached: asking again goes back to the network.
        assert!(!h.coordinator.fetch(&missing).await.is_hit());
        assert_eq!(h.fetcher.calls_for(&missing), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let h = harness(MockBackend::default(), MockFetcher::with_responses([(COVER, b"shared")]), RawDecoder);
        let key = CacheKey::new(COVER);
        h.fetcher.hold();

        let waiters = join_all((0..8).map(|_| h.coordinator.fetch(&key)));
        let release = async {
            wait_for_calls(&h.fetcher, 1).await;
            assert_eq!(h.coordinator.in_flight_count(), 1);
            h.fetcher.release();
        };
        let (lookups, ()) = tokio::join!(waiters, release);

        assert_eq!(h.fetcher.call_count(), 1);
        let first = lookups[0].hit().unwrap();
        for lookup in &lookups {
            assert!(Arc::ptr_eq(lookup.hit().unwrap(), first));
        }
        assert_eq!(h.backend.writes(), 1);
        assert_eq!(h.coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_failure_is_shared() {
        let h = harness(MockBackend::default(), MockFetcher::default(), RawDecoder);
        let key = CacheKey::new(COVER);
        h.fetcher.hold();

        let waiters = join_all((0..4).map(|_| h.coordinator.fetch(&key)));
        let release = async {
            wait_for_calls(&h.fetcher, 1).await;
            h.fetcher.release();
        };
        let (lookups, ()) = tokio::join!(waiters, release);

        assert!(lookups.iter().all(|lookup| !lookup.is_hit()));
        assert_eq!(h.fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_abort_shared_fetch() {
        let h = harness(MockBackend::default(), MockFetcher::with_responses([(COVER, b"bytes")]), RawDecoder);
        let key = CacheKey::new(COVER);
        h.fetcher.hold();

        let cancel = CancellationToken::new();
        let cancelled = tokio::spawn({
            let (coordinator, key, cancel) = (h.coordinator.clone(), key.clone(), cancel.clone());
            async move { coordinator.fetch_cancellable(&key, &cancel).await }
        });
        let waiting = tokio::spawn({
            let (coordinator, key) = (h.coordinator.clone(), key.clone());
            async move { coordinator.fetch(&key).await }
        });
        wait_for_calls(&h.fetcher, 1).await;

        cancel.cancel();
        assert!(cancelled.await.unwrap().is_none());
        assert_eq!(h.coordinator.in_flight_count(), 1);

        h.fetcher.release();
        assert!(waiting.await.unwrap().is_hit());
        assert!(h.coordinator.memory().get(&key).is_some());
        assert_eq!(h.coordinator.in_flight_count(), 0);

        // Re-issuing after cancellation neither deadlocks nor refetches.
        let again = h.coordinator.fetch_cancellable(&key, &CancellationToken::new()).await;
        assert!(again.unwrap().is_hit());
        assert_eq!(h.fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_load_completes_after_every_caller_cancels() {
        let h = harness(MockBackend::default(), MockFetcher::with_responses([(COVER, b"bytes")]), RawDecoder);
        let key = CacheKey::new(COVER);
        h.fetcher.hold();

        let cancel = CancellationToken::new();
        let cancelled = tokio::spawn({
            let (coordinator, key, cancel) = (h.coordinator.clone(), key.clone(), cancel.clone());
            async move { coordinator.fetch_cancellable(&key, &cancel).await }
        });
        wait_for_calls(&h.fetcher, 1).await;
        cancel.cancel();
        assert!(cancelled.await.unwrap().is_none());

        h.fetcher.release();
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.coordinator.in_flight_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(h.coordinator.memory().get(&key).is_some());
        assert_eq!(h.coordinator.disk().get(&key).await, Some(b"bytes".to_vec()));
    }

    #[tokio::test]
    async fn test_already_cancelled_starts_nothing() {
        let h = harness(MockBackend::default(), MockFetcher::with_responses([(COVER, b"bytes")]), RawDecoder);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(h.coordinator.fetch_cancellable(&CacheKey::new(COVER), &cancel).await.is_none());
        assert_eq!(h.coordinator.in_flight_count(), 0);
        assert_eq!(h.fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_all_empties_both_tiers() {
        let h = harness(MockBackend::default(), MockFetcher::with_responses([(COVER, b"12345")]), RawDecoder);
        let key = CacheKey::new(COVER);
        assert!(h.coordinator.fetch(&key).await.is_hit());
        assert_eq!(h.coordinator.usage_size().await, 5);

        h.coordinator.clear_all().await;
        assert!(h.coordinator.memory().is_empty());
        assert!(h.backend.is_empty().await);
        assert_eq!(h.coordinator.usage_size().await, 0);

        assert!(h.coordinator.fetch(&key).await.is_hit());
        assert_eq!(h.fetcher.call_count(), 2);
    }

    /// Backend that records whether the memory tier already held anything
    /// at the moment each write arrived.
    struct OrderRecorder {
        inner: MockBackend,
        memory: Arc<MemoryCache<Vec<u8>>>,
        memory_before_write: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl StorageBackend for OrderRecorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn list_stream(&self) -> FileInfoStream<'_> {
            self.inner.list_stream()
        }
        async fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
            self.inner.read(path).await
        }
        async fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
            self.memory_before_write.lock().unwrap().push(!self.memory.is_empty());
            self.inner.write(path, data).await
        }
        async fn clear(&self) -> StorageResult<()> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn test_disk_written_before_memory() {
        let memory = Arc::new(MemoryCache::new());
        let recorder = Arc::new(OrderRecorder {
            inner: MockBackend::default(),
            memory: memory.clone(),
            memory_before_write: Mutex::new(Vec::new()),
        });
        let fetcher = Arc::new(MockFetcher::with_responses([(COVER, b"bytes")]));
        let coordinator = FetchCoordinator::new(DiskStore::new(recorder.clone()), memory.clone(), fetcher, RawDecoder);

        assert!(coordinator.fetch(&CacheKey::new(COVER)).await.is_hit());
        assert_eq!(*recorder.memory_before_write.lock().unwrap(), vec![false]);
        assert_eq!(memory.len(), 1);
    }
}
