//! Walking a candidate list through the fetch coordinator.

use crate::candidates::Candidates;
use crate::winner::WinnerPersistence;
use async_stream::stream;
use futures::{Stream, StreamExt};
use quire_cache::{CacheKey, Decoder, FetchCoordinator, Lookup};
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Progress of one resolution, in the order it happens.
///
/// A walk always starts with `Loading` and, unless the list changes under
/// it, ends with exactly one of `Loaded` or `Empty`.
#[derive(Debug)]
pub enum ResolveEvent<T> {
    Loading,
    Attempting(CacheKey),
    Missed(CacheKey),
    Loaded { winner: CacheKey, object: Arc<T> },
    /// Every candidate missed, or there were none.
    Empty,
    /// The watched list changed; a fresh walk follows.
    Restarted,
}

/// Final outcome of a one-shot resolution.
#[derive(Debug)]
pub enum Resolution<T> {
    Resolved { winner: CacheKey, object: Arc<T> },
    Exhausted,
}

impl<T> Resolution<T> {
    pub fn winner(&self) -> Option<&CacheKey> {
        match self {
            Self::Resolved { winner, .. } => Some(winner),
            Self::Exhausted => None,
        }
    }
}

enum Step<T> {
    Done(Lookup<T>),
    Changed(Candidates),
}

/// Tries candidates one at a time until one loads.
///
/// The walk is a single left-to-right pass starting at the preferred
/// candidate: anything before it is never tried, and a candidate is never
/// tried twice. Dropping a resolution stream part-way only stops this
/// caller waiting; a fetch it started still completes and fills the caches.
pub struct Resolver<D: Decoder> {
    coordinator: FetchCoordinator<D>,
}

impl<D: Decoder> Clone for Resolver<D> {
    fn clone(&self) -> Self {
        Self { coordinator: self.coordinator.clone() }
    }
}

impl<D: Decoder> Resolver<D> {
    pub fn new(coordinator: FetchCoordinator<D>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &FetchCoordinator<D> {
        &self.coordinator
    }

    /// Resolve a fixed list.
    pub fn resolve<'a>(
        &'a self,
        candidates: &'a Candidates,
        preferred: Option<&'a str>,
        persistence: &'a dyn WinnerPersistence,
    ) -> impl Stream<Item = ResolveEvent<D::Output>> + 'a {
        stream! {
            yield ResolveEvent::Loading;
            for location in candidates.walk(preferred) {
                let key = CacheKey::new(location);
                yield ResolveEvent::Attempting(key.clone());
                match self.coordinator.fetch(&key).await {
                    Lookup::Hit(object) => {
                        tracing::info!(winner = %key, "Resolved cover");
                        persistence.persist_winner(&key);
                        yield ResolveEvent::Loaded { winner: key, object };
                        return;
                    },
                    Lookup::Miss => yield ResolveEvent::Missed(key),
                }
            }
            tracing::debug!(candidates = candidates.len(), "No candidate could be loaded");
            yield ResolveEvent::Empty;
        }
    }

    /// Resolve a list that may be replaced while resolving.
    ///
    /// `preferred` only applies to the first walk. Whenever the list changes
    /// to something that normalises differently, the current attempt is
    /// abandoned, `Restarted` is emitted, and a new walk starts from the
    /// first entry of the new list. After a walk settles the stream keeps
    /// waiting for changes, and ends once the sending side is dropped.
    pub fn watch<'a>(
        &'a self,
        mut list: watch::Receiver<Vec<String>>,
        preferred: Option<String>,
        persistence: &'a dyn WinnerPersistence,
    ) -> impl Stream<Item = ResolveEvent<D::Output>> + 'a {
        stream! {
            let mut candidates = Candidates::normalize(list.borrow_and_update().iter());
            let mut start = candidates.start_index(preferred.as_deref());
            let mut live = true;
            'walk: loop {
                yield ResolveEvent::Loading;
                let mut settled = false;
                let mut index = start;
                while index < candidates.len() {
                    let key = CacheKey::new(&candidates.as_slice()[index]);
                    yield ResolveEvent::Attempting(key.clone());
                    let step = loop {
                        if !live {
                            break Step::Done(self.coordinator.fetch(&key).await);
                        }
                        // Fetch first, so the attempt is always started and
                        // a finished lookup beats a simultaneous change.
                        tokio::select! {
                            biased;
                            lookup = self.coordinator.fetch(&key) => break Step::Done(lookup),
                            changed = list.changed() => {
                                if changed.is_err() {
                                    live = false;
                                    continue;
                                }
                                let next = Candidates::normalize(list.borrow_and_update().iter());
                                if next != candidates {
                                    break Step::Changed(next);
                                }
                            },
                        }
                    };
                    match step {
                        Step::Done(Lookup::Hit(object)) => {
                            tracing::info!(winner = %key, "Resolved cover");
                            persistence.persist_winner(&key);
                            yield ResolveEvent::Loaded { winner: key, object };
                            settled = true;
                            break;
                        },
                        Step::Done(Lookup::Miss) => {
                            yield ResolveEvent::Missed(key);
                            index += 1;
                        },
                        Step::Changed(next) => {
                            tracing::debug!(abandoned = %key, candidates = next.len(), "Candidate list changed mid-walk");
                            candidates = next;
                            start = 0;
                            yield ResolveEvent::Restarted;
                            continue 'walk;
                        },
                    }
                }
                if !settled {
                    yield ResolveEvent::Empty;
                }

                if !live {
                    break;
                }
                loop {
                    if list.changed().await.is_err() {
                        break 'walk;
                    }
                    let next = Candidates::normalize(list.borrow_and_update().iter());
                    if next != candidates {
                        candidates = next;
                        break;
                    }
                }
                start = 0;
                yield ResolveEvent::Restarted;
            }
        }
    }

    /// Resolve a fixed list to its final outcome.
    ///
    /// Returns `None` if `cancel` fires first. Persistence happens before
    /// this returns, and only on success.
    pub async fn resolve_once(
        &self,
        candidates: &Candidates,
        preferred: Option<&str>,
        persistence: &dyn WinnerPersistence,
        cancel: &CancellationToken,
    ) -> Option<Resolution<D::Output>> {
        let run = async {
            let mut events = pin!(self.resolve(candidates, preferred, persistence));
            while let Some(event) = events.next().await {
                match event {
                    ResolveEvent::Loaded { winner, object } => return Resolution::Resolved { winner, object },
                    ResolveEvent::Empty => return Resolution::Exhausted,
                    _ => {},
                }
            }
            Resolution::Exhausted
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            resolution = run => Some(resolution),
        }
    }
}
