//! Per-session cancellation (spec §4.4 Cancellation, §5 Suspension points).
//!
//! Wraps [`muxd_domain::CancelToken`], the primitive shared with the
//! `providers` crate's transport layer, in a map keyed by session id so the
//! Daemon Server can look a turn's signal up by session without threading
//! it through every layer explicitly.

use std::collections::HashMap;

use muxd_domain::CancelToken;
use parking_lot::Mutex;

pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()) }
    }

    /// Register a fresh cancel token for `session_id`, replacing any
    /// leftover token from a prior turn. Call at the start of a turn;
    /// the returned token is what gets passed into `Provider::stream`.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(session_id.to_owned(), token.clone());
        token
    }

    /// Signal cancellation for a session's in-flight turn, if any.
    /// Returns `true` if a token was found and cancelled.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }

    /// Signal every in-flight turn, for graceful shutdown (spec §5
    /// Resource cleanup). Returns the number of turns signalled.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Remove the token once a turn ends, so a future `cancel()` call for
    /// the same session id is a harmless no-op rather than affecting the
    /// next turn.
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_cancel_sets_token() {
        let map = CancelMap::new();
        let token = map.register("s1");
        assert!(!token.is_cancelled());
        assert!(map.cancel("s1"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_unknown_session_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("missing"));
    }

    #[test]
    fn remove_clears_running_state() {
        let map = CancelMap::new();
        map.register("s1");
        assert!(map.is_running("s1"));
        map.remove("s1");
        assert!(!map.is_running("s1"));
    }

    #[test]
    fn register_replaces_stale_token() {
        let map = CancelMap::new();
        let first = map.register("s1");
        let second = map.register("s1");
        map.cancel("s1");
        assert!(!first.is_cancelled());
        assert!(second.is_cancelled());
    }
}
