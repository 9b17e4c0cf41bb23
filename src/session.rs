use std::sync::Arc;

use dashmap::DashSet;
use tracing::debug;

/// Tracks which requesters have a research session in flight.
///
/// Cloning shares the same underlying set.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    active: Arc<DashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for `requester_id` unless one is already live.
    /// The check and the insert are one atomic step.
    pub fn try_acquire(&self, requester_id: &str) -> bool {
        let acquired = self.active.insert(requester_id.to_string());
        debug!(requester_id, acquired, "session acquire");
        acquired
    }

    /// Removes the record; returns whether one existed.
    pub fn release(&self, requester_id: &str) -> bool {
        let released = self.active.remove(requester_id).is_some();
        debug!(requester_id, released, "session release");
        released
    }

    /// Like [`try_acquire`](Self::try_acquire), but the returned guard
    /// releases the slot when dropped, whichever way the session ends.
    pub fn acquire(&self, requester_id: &str) -> Option<SessionGuard> {
        self.try_acquire(requester_id).then(|| SessionGuard {
            registry: self.clone(),
            requester_id: requester_id.to_string(),
        })
    }

    pub fn is_active(&self, requester_id: &str) -> bool {
        self.active.contains(requester_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Holds one acquired session slot.
#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
    requester_id: String,
}

impl SessionGuard {
    pub fn requester_id(&self) -> &str {
        &self.requester_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.release(&self.requester_id);
    }
}
