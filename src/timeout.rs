//! Per-request single-shot timeouts.
//!
//! The supervisor does not own any timer task. It keeps a registry of
//! deadlines keyed by request id; whoever drives the event loop sleeps until
//! [`TimeoutSupervisor::next_deadline`] and then calls
//! [`TimeoutSupervisor::expire`]. Disarming removes the registry entry, so a
//! request that completed can never be reported as timed out.

use crate::transport::RequestId;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct TimeoutSupervisor {
    deadlines: HashMap<RequestId, Instant>,
    queue: BTreeSet<(Instant, RequestId)>,
}

impl TimeoutSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a countdown of `timeout` for `id`, starting at `now`.
    ///
    /// A zero timeout arms nothing, and a request that already has a
    /// countdown keeps it. Returns whether a countdown was armed.
    pub fn arm(&mut self, id: RequestId, now: Instant, timeout: Duration) -> bool {
        if timeout.is_zero() || self.deadlines.contains_key(&id) {
            return false;
        }

        let deadline = now + timeout;
        self.deadlines.insert(id, deadline);
        self.queue.insert((deadline, id));
        true
    }

    /// Cancels the countdown for `id`. Returns whether one was armed.
    pub fn disarm(&mut self, id: RequestId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => {
                self.queue.remove(&(deadline, id));
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, id: RequestId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.first().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns every countdown due at `now`, earliest first.
    pub fn expire(&mut self, now: Instant) -> Vec<RequestId> {
        let mut fired = Vec::new();
        while let Some(&(deadline, id)) = self.queue.first() {
            if deadline > now {
                break;
            }
            self.queue.pop_first();
            self.deadlines.remove(&id);
            fired.push(id);
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
