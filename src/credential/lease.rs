use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::traits::{Clearance, CredentialProvider};
use crate::config::{CREDENTIAL_TTL, DEFAULT_USER_AGENT};
use crate::error::{preview, EngineError};

/// Browser identity a credential has to be presented with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for BrowserProfile {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub expires_at: Instant,
    pub profile: BrowserProfile,
}

impl Credential {
    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Time-boxed shared credential with lazy acquisition and single-flight refresh.
///
/// Readers take the `current` read lock only long enough to clone the credential.
/// Refreshes are serialised by `refresh_lock`, which also holds the error of the last
/// attempt. A caller that queued behind an attempt takes that attempt's outcome, success
/// or failure, instead of calling the provider again.
pub struct CredentialLease {
    provider: Arc<dyn CredentialProvider>,
    ttl: Duration,
    current: RwLock<Option<Credential>>,
    profile: RwLock<BrowserProfile>,
    refresh_lock: Mutex<Option<EngineError>>,
    // Bumped under `refresh_lock` when a provider call finishes either way.
    attempts: AtomicU64,
    refreshes: AtomicU64,
}

impl CredentialLease {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self::with_ttl(provider, CREDENTIAL_TTL)
    }

    pub fn with_ttl(provider: Arc<dyn CredentialProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            current: RwLock::new(None),
            profile: RwLock::new(BrowserProfile::default()),
            refresh_lock: Mutex::new(None),
            attempts: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Return the cached credential, refreshing it first if absent or expired.
    pub async fn acquire(&self) -> Result<Credential, EngineError> {
        if let Some(credential) = self.fresh_cached() {
            debug!("using leased credential {}", token_preview(&credential.token));
            return Ok(credential);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut last_error = self.refresh_lock.lock().await;
        if let Some(credential) = self.fresh_cached() {
            return Ok(credential);
        }
        if let Some(err) = self.shared_failure(seen, &last_error) {
            return Err(err);
        }
        self.refresh_locked(&mut last_error).await
    }

    /// Replace a credential the backend just rejected.
    ///
    /// When another caller already swapped in a different fresh credential while this
    /// one waited for the lock, that credential is returned without a provider call.
    pub async fn force_refresh(&self, rejected: &str) -> Result<Credential, EngineError> {
        let seen = self.attempts.load(Ordering::Acquire);
        let mut last_error = self.refresh_lock.lock().await;
        if let Some(err) = self.shared_failure(seen, &last_error) {
            return Err(err);
        }
        if let Some(credential) = self.fresh_cached() {
            if credential.token != rejected {
                debug!("credential already refreshed by a concurrent request");
                return Ok(credential);
            }
        }
        self.refresh_locked(&mut last_error).await
    }

    /// Browser identity learned from the most recent clearance.
    pub fn profile(&self) -> BrowserProfile {
        self.profile.read().clone()
    }

    /// Number of completed provider refreshes.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Error of an attempt that finished while the caller waited for the lock.
    fn shared_failure(&self, seen: u64, last_error: &Option<EngineError>) -> Option<EngineError> {
        if self.attempts.load(Ordering::Acquire) == seen {
            return None;
        }
        let err = last_error.clone()?;
        debug!("sharing failed refresh with a queued caller: {}", err);
        Some(err)
    }

    fn fresh_cached(&self) -> Option<Credential> {
        let current = self.current.read();
        current.as_ref().filter(|c| c.is_fresh()).cloned()
    }

    // `last_error` is the guarded value of `refresh_lock`.
    async fn refresh_locked(
        &self,
        last_error: &mut Option<EngineError>,
    ) -> Result<Credential, EngineError> {
        info!("refreshing credential from clearance provider");
        let result = self.provider.fetch_clearance().await;
        self.attempts.fetch_add(1, Ordering::Release);
        let clearance = match result {
            Ok(c) => {
                *last_error = None;
                c
            }
            Err(e) => {
                warn!("credential refresh failed: {}", e);
                *last_error = Some(e.clone());
                return Err(e);
            }
        };

        let profile = self.merge_profile(&clearance);
        let credential = Credential {
            token: clearance.cookie,
            expires_at: Instant::now() + self.ttl,
            profile,
        };

        *self.current.write() = Some(credential.clone());
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        info!(
            "credential refreshed {} valid_for_secs={}",
            token_preview(&credential.token),
            self.ttl.as_secs()
        );
        Ok(credential)
    }

    fn merge_profile(&self, clearance: &Clearance) -> BrowserProfile {
        let mut profile = self.profile.write();
        if let Some(ua) = &clearance.user_agent {
            profile.user_agent = ua.clone();
        }
        if let Some(lang) = &clearance.lang {
            profile.accept_language = lang.clone();
        }
        profile.clone()
    }
}

pub(crate) fn token_preview(token: &str) -> String {
    preview(token, 16)
}
