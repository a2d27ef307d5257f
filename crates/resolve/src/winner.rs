//! Feeding a resolved winner back to whoever owns the candidate list.

use crate::candidates::{Candidates, same_location};
use quire_cache::CacheKey;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Told about the winner of every successful resolution.
///
/// Fire-and-forget: the resolver does not wait on or look at the outcome,
/// so implementations deal with their own storage failures.
pub trait WinnerPersistence: Send + Sync {
    fn persist_winner(&self, winner: &CacheKey);
}

impl<F> WinnerPersistence for F
where
    F: Fn(&CacheKey) + Send + Sync,
{
    fn persist_winner(&self, winner: &CacheKey) {
        self(winner)
    }
}

/// Persistence that remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Forget;

impl WinnerPersistence for Forget {
    fn persist_winner(&self, _winner: &CacheKey) {}
}

/// The cover locations an entity stores about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(default)]
    pub candidates: Vec<String>,
}

impl CandidateRecord {
    pub fn new(primary: Option<String>, candidates: Vec<String>) -> Self {
        Self { primary, candidates }
    }

    /// The normalised list to resolve, primary first.
    pub fn to_candidates(&self) -> Candidates {
        Candidates::normalize(self.primary.iter().chain(self.candidates.iter()))
    }

    pub fn preferred(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    /// Make `winner` the primary location and the first candidate.
    ///
    /// The primary is only replaced when it differs ignoring case. Any other
    /// spelling of the winner is dropped from the list. Returns whether
    /// anything changed, so promoting the same winner twice is a no-op.
    pub fn promote(&mut self, winner: &str) -> bool {
        let before = self.clone();
        if !self.primary.as_deref().is_some_and(|primary| same_location(primary, winner)) {
            self.primary = Some(winner.to_string());
        }
        match self.candidates.first() {
            Some(first) if first == winner => {
                let mut index = 1;
                while index < self.candidates.len() {
                    if same_location(&self.candidates[index], winner) {
                        self.candidates.remove(index);
                    } else {
                        index += 1;
                    }
                }
            },
            _ => {
                self.candidates.retain(|candidate| !same_location(candidate, winner));
                self.candidates.insert(0, winner.to_string());
            },
        }
        *self != before
    }
}

impl WinnerPersistence for Mutex<CandidateRecord> {
    fn persist_winner(&self, winner: &CacheKey) {
        self.lock().unwrap_or_else(PoisonError::into_inner).promote(winner.as_str());
    }
}
