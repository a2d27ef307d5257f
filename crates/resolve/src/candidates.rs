//! Normalised candidate lists.

use std::collections::HashSet;

/// Case-insensitive comparison used everywhere candidates are matched.
pub fn same_location(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// An ordered, de-duplicated list of candidate locations.
///
/// Built only through [`normalize()`](Self::normalize): every entry is
/// trimmed and non-empty, and no two entries are equal ignoring case. The
/// first spelling seen wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates(Vec<String>);

impl Candidates {
    pub fn normalize<I>(raw: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let candidates = raw
            .into_iter()
            .filter_map(|candidate| {
                let trimmed = candidate.as_ref().trim();
                (!trimmed.is_empty() && seen.insert(trimmed.to_lowercase())).then(|| trimmed.to_string())
            })
            .collect();
        Self(candidates)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, location: &str) -> Option<usize> {
        let location = location.trim();
        self.0.iter().position(|candidate| same_location(candidate, location))
    }

    /// Where a walk begins: the preferred entry if it is in the list,
    /// otherwise the first.
    pub fn start_index(&self, preferred: Option<&str>) -> usize {
        preferred.and_then(|preferred| self.position(preferred)).unwrap_or(0)
    }

    /// The candidates a walk visits, in order. Entries before the start
    /// index are never visited.
    pub fn walk(&self, preferred: Option<&str>) -> &[String] {
        &self.0[self.start_index(preferred)..]
    }
}
