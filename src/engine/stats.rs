// Dispatch counters — which routes were taken and which recoveries fired.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub creates: u64,
    pub retries: u64,
    pub auth_recoveries: u64,
    pub session_evictions: u64,
    pub failures: u64,
}

pub struct DispatchStats {
    creates: AtomicU64,
    retries: AtomicU64,
    auth_recoveries: AtomicU64,
    session_evictions: AtomicU64,
    failures: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self {
            creates: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            auth_recoveries: AtomicU64::new(0),
            session_evictions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// A create request went out (successful or not).
    pub fn record_create(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    /// A retry request against a cached session went out.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_recovery(&self) {
        self.auth_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.session_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// A dispatch gave up and returned an error to its caller.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            creates: self.creates.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            auth_recoveries: self.auth_recoveries.load(Ordering::Relaxed),
            session_evictions: self.session_evictions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::new()
    }
}
