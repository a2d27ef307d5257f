//! Scripted network tier for tests.

use crate::error::{ErrorKind, Result};
use crate::{CacheKey, Fetcher};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

/// Fetcher that answers from a fixed table and records every call.
///
/// Locations without a scripted body fail with a 404. The fetcher can be
/// [held](Self::hold) so that calls park until [released](Self::release),
/// which makes "while a fetch is in flight" states easy to set up.
pub struct MockFetcher {
    responses: Mutex<HashMap<CacheKey, Vec<u8>>>,
    calls: Mutex<Vec<CacheKey>>,
    gate: watch::Sender<bool>,
}

impl MockFetcher {
    pub fn with_responses(responses: impl IntoIterator<Item = (impl Into<CacheKey>, impl Into<Vec<u8>>)>) -> Self {
        let responses = responses.into_iter().map(|(key, body)| (key.into(), body.into())).collect();
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
            gate: watch::Sender::new(true),
        }
    }

    /// Park every subsequent call until [`release()`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Let parked and future calls complete.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Every location fetched so far, in call order.
    pub fn calls(&self) -> Vec<CacheKey> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// How many times one location has been fetched.
    pub fn calls_for(&self, key: &CacheKey) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).iter().filter(|call| *call == key).count()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        let responses: [(&str, Vec<u8>); 0] = [];
        Self::with_responses(responses)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, key: &CacheKey) -> Result<Vec<u8>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(key.clone());
        let mut gate = self.gate.subscribe();
        // The sender lives as long as `self`, so this only errors if the
        // fetcher is being torn down mid-call.
        if gate.wait_for(|open| *open).await.is_err() {
            exn::bail!(ErrorKind::Interrupted);
        }
        let body = self.responses.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned();
        match body {
            Some(body) => Ok(body),
            None => exn::bail!(ErrorKind::Status(404)),
        }
    }
}
