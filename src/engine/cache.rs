// In-memory session affinity cache: cache key -> backend conversation identifiers.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::session::{CacheKey, SessionState};

/// Shared mapping of caller identity to backend session.
///
/// Entries never expire on their own; the dispatcher evicts one when the backend
/// reports its session invalid. Lock sections never span network I/O.
#[derive(Default)]
pub struct SessionCache {
    entries: RwLock<HashMap<CacheKey, SessionState>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<SessionState> {
        self.entries.read().get(key).cloned()
    }

    /// Insert or wholesale replace the session for `key`, returning the previous one.
    pub fn put(&self, key: CacheKey, state: SessionState) -> Option<SessionState> {
        self.entries.write().insert(key, state)
    }

    pub fn evict(&self, key: &CacheKey) -> Option<SessionState> {
        self.entries.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
