//! At-most-one-turn-per-session enforcement (spec §4.4, §5).
//!
//! Each session key maps to a binary `Semaphore`; a live turn holds the
//! single permit for its session's entire duration. `/submit` while a turn
//! is in flight must see the semaphore already drained and return
//! `409 Conflict` rather than queue behind it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
pub struct SessionBusy;

impl std::fmt::Display for SessionBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a turn is already in flight for this session")
    }
}

impl std::error::Error for SessionBusy {}

pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    fn semaphore_for(&self, session_id: &str) -> Arc<Semaphore> {
        self.locks.lock().entry(session_id.to_owned()).or_insert_with(|| Arc::new(Semaphore::new(1))).clone()
    }

    /// Attempt to acquire the session's lock without blocking. Returns
    /// `SessionBusy` if a turn is already live — this is the `409
    /// Conflict` path, never a queue.
    pub fn acquire(&self, session_id: &str) -> Result<OwnedSemaphorePermit, SessionBusy> {
        let sem = self.semaphore_for(session_id);
        sem.try_acquire_owned().map_err(|_| SessionBusy)
    }

    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop idle entries (no turn holding the permit) to bound memory
    /// across a long-lived daemon's session history.
    pub fn prune_idle(&self) {
        self.locks.lock().retain(|_, sem| sem.available_permits() == 0);
    }
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_access_succeeds() {
        let map = SessionLockMap::new();
        {
            let _permit = map.acquire("s1").unwrap();
        }
        let _permit = map.acquire("s1").unwrap();
    }

    #[test]
    fn different_sessions_concurrent() {
        let map = SessionLockMap::new();
        let _a = map.acquire("s1").unwrap();
        let _b = map.acquire("s2").unwrap();
    }

    #[test]
    fn same_session_while_held_is_busy() {
        let map = SessionLockMap::new();
        let _permit = map.acquire("s1").unwrap();
        assert!(map.acquire("s1").is_err());
    }

    #[test]
    fn prune_idle_drops_unheld_locks() {
        let map = SessionLockMap::new();
        {
            let _permit = map.acquire("s1").unwrap();
        }
        assert_eq!(map.session_count(), 1);
        map.prune_idle();
        assert_eq!(map.session_count(), 0);
    }

    #[test]
    fn prune_idle_keeps_held_locks() {
        let map = SessionLockMap::new();
        let _permit = map.acquire("s1").unwrap();
        map.prune_idle();
        assert_eq!(map.session_count(), 1);
    }
}
