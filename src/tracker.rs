//! Request identifiers and "started" bookkeeping.

use crate::transport::RequestId;
use std::collections::HashSet;

/// Hands out request ids and remembers which requests have started.
#[derive(Debug, Default)]
pub struct RequestTracker {
    last_id: RequestId,
    started: HashSet<RequestId>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next request id. Ids start at 1 and are never reused.
    pub fn next_id(&mut self) -> RequestId {
        self.last_id += 1;
        self.last_id
    }

    /// Records the first data arrival for `id`.
    ///
    /// Returns `true` only on the first call for a given id, so repeated
    /// read-ready notifications produce a single "started" event.
    pub fn mark_started(&mut self, id: RequestId) -> bool {
        self.started.insert(id)
    }

    pub fn is_started(&self, id: RequestId) -> bool {
        self.started.contains(&id)
    }

    /// Drops the bookkeeping for a request that has finished.
    pub fn clear(&mut self, id: RequestId) {
        self.started.remove(&id);
    }

    /// Number of requests currently marked as started.
    pub fn started_count(&self) -> usize {
        self.started.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase() {
        let mut tracker = RequestTracker::new();
        let ids: Vec<_> = (0..100).map(|_| tracker.next_id()).collect();
        assert_eq!(ids[0], 1);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_mark_started_once() {
        let mut tracker = RequestTracker::new();
        let id = tracker.next_id();
        assert!(tracker.mark_started(id));
        assert!(!tracker.mark_started(id));
        assert!(!tracker.mark_started(id));
        assert!(tracker.is_started(id));
    }

    #[test]
    fn test_clear() {
        let mut tracker = RequestTracker::new();
        let a = tracker.next_id();
        let b = tracker.next_id();
        tracker.mark_started(a);
        tracker.mark_started(b);
        tracker.clear(a);
        assert!(!tracker.is_started(a));
        assert_eq!(tracker.started_count(), 1);

        // Clearing an unknown id is harmless
        tracker.clear(42);
        assert_eq!(tracker.started_count(), 1);
    }

    #[test]
    fn test_ids_not_reused_after_clear() {
        let mut tracker = RequestTracker::new();
        let a = tracker.next_id();
        tracker.clear(a);
        assert_ne!(tracker.next_id(), a);
    }
}
