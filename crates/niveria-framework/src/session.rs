//! Per-player sessions.
//!
//! A session is a [`CancellationToken`] opened when a player joins and
//! cancelled when they leave. Capability calls made on behalf of a player
//! can race against it (see `CapabilityContext::get_with`) so a lookup whose
//! caller disconnected is abandoned instead of awaited.

use std::collections::HashMap;

use niveria_core::EntityKey;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Tracks one cancellation token per online player.
pub struct SessionTracker {
    root: CancellationToken,
    sessions: Mutex<HashMap<EntityKey, CancellationToken>>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a session, replacing (and cancelling) any previous one.
    pub fn open(&self, key: &EntityKey) -> CancellationToken {
        let token = self.root.child_token();
        if let Some(previous) = self.sessions.lock().insert(key.clone(), token.clone()) {
            previous.cancel();
        }
        trace!(key = %key, "Session opened");
        token
    }

    /// Token of the open session, if any.
    pub fn token(&self, key: &EntityKey) -> Option<CancellationToken> {
        self.sessions.lock().get(key).cloned()
    }

    /// Cancels and forgets a session. Returns `false` if none was open.
    pub fn close(&self, key: &EntityKey) -> bool {
        match self.sessions.lock().remove(key) {
            Some(token) => {
                token.cancel();
                trace!(key = %key, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Cancels every session.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.lock().drain().collect();
        for (_, token) in &drained {
            token.cancel();
        }
        drained.len()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` when nobody is online.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopen_cancels_previous_session() {
        let tracker = SessionTracker::new();
        let key = EntityKey::new(uuid::Uuid::from_u128(1));

        let first = tracker.open(&key);
        let second = tracker.open(&key);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        assert!(tracker.close(&key));
        assert!(second.is_cancelled());
        assert!(!tracker.close(&key));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_close_all() {
        let tracker = SessionTracker::new();
        let tokens: Vec<_> = (0..3)
            .map(|n| tracker.open(&EntityKey::new(uuid::Uuid::from_u128(n))))
            .collect();
        assert_eq!(tracker.close_all(), 3);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }
}
