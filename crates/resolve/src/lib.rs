//! Candidate resolution on top of the cover cache.
//!
//! An entity (a book, say) knows several places its cover might live. The
//! [`Resolver`] normalises that list into [`Candidates`], walks it through a
//! [`FetchCoordinator`](quire_cache::FetchCoordinator) until one location
//! loads, and reports the winner to a [`WinnerPersistence`] so the entity can
//! move it to the front for next time.

mod candidates;
mod resolver;
mod winner;

pub use crate::candidates::{Candidates, same_location};
pub use crate::resolver::{ResolveEvent, Resolution, Resolver};
pub use crate::winner::{CandidateRecord, Forget, WinnerPersistence};
