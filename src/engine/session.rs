// Backend conversation identity and the cache key that binds it to a caller.

use std::fmt;

use crate::config::{AUTH_COOKIE_NAME, CACHE_KEY_FRAGMENT_LEN};

/// One backend-side conversation thread, bound to a (credential, model) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: String,
    pub user_message_id: String,
    pub model_message_id: String,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the session cache key for a credential and backend model id.
///
/// The fragment is the value of the `arena-auth-prod-v1.0` cookie when the credential
/// carries one, otherwise the credential itself. Either way at most
/// [`CACHE_KEY_FRAGMENT_LEN`] characters are kept, so the full secret never ends up in
/// the key. Distinct credentials sharing a fragment share sessions.
pub fn derive_cache_key(credential: &str, model_id: &str) -> CacheKey {
    let fragment = credential_fragment(credential);
    CacheKey(format!("{}_{}", fragment, model_id))
}

fn credential_fragment(credential: &str) -> &str {
    let marker = format!("{}=", AUTH_COOKIE_NAME);
    let source = match credential.split_once(marker.as_str()) {
        Some((_, rest)) => rest.split(';').next().unwrap_or(rest),
        None => credential,
    };
    truncate_chars(source, CACHE_KEY_FRAGMENT_LEN)
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
