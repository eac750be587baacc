//! In-memory record of dispatched message ids

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::models::MessageId;

/// Message ids dispatched during the current clearing window
///
/// An id stays until the window ends unless its dispatch failed, in which
/// case the caller removes it so the next pass retries.
#[derive(Debug)]
pub struct DedupSet {
    ids: HashSet<MessageId>,
    window: Duration,
    window_started: Instant,
}

impl DedupSet {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60 * 60);

    pub fn new(window: Duration) -> Self {
        Self {
            ids: HashSet::new(),
            window,
            window_started: Instant::now(),
        }
    }

    /// Claim an id for dispatch; false if it was already claimed
    pub fn insert(&mut self, id: &MessageId) -> bool {
        self.ids.insert(id.clone())
    }

    pub fn remove(&mut self, id: &MessageId) -> bool {
        self.ids.remove(id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Clear everything once the window has elapsed; returns true if cleared
    pub fn clear_if_expired(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_started) < self.window {
            return false;
        }
        self.ids.clear();
        self.window_started = now;
        true
    }
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_claims_once() {
        let mut set = DedupSet::default();
        let id = MessageId::new("m1");
        assert!(set.insert(&id));
        assert!(!set.insert(&id));
        assert!(set.contains(&id));
        assert!(set.remove(&id));
        assert!(set.insert(&id));
    }

    #[test]
    fn test_clears_only_after_window() {
        let mut set = DedupSet::new(Duration::from_secs(10));
        let start = Instant::now();
        set.insert(&MessageId::new("m1"));

        assert!(!set.clear_if_expired(start));
        assert_eq!(set.len(), 1);

        assert!(set.clear_if_expired(start + Duration::from_secs(11)));
        assert!(set.is_empty());
    }
}
