use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::EngineError;

/// Validity window granted to a credential from the moment it is acquired.
pub const CREDENTIAL_TTL: Duration = Duration::from_secs(30 * 60);

/// Maximum number of characters of the credential that take part in a cache key.
pub const CACHE_KEY_FRAGMENT_LEN: usize = 50;

/// Cookie carrying the backend's auth token; preferred as the cache key fragment.
pub const AUTH_COOKIE_NAME: &str = "arena-auth-prod-v1.0";

/// Credential value clients send when they have nothing real to send.
pub const PLACEHOLDER_CREDENTIAL: &str = "EMPTY_KEY";

/// Prefix that routes an inbound model name to this relay.
pub const MODEL_PREFIX: &str = "lmsys-chat/";

/// Built-in model used when a requested name resolves to nothing.
pub const DEFAULT_MODEL: &str = "gpt-4.1-2025-04-14";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0";

/// How long a backend request may wait for response headers (seconds).
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 60;

/// Overall ceiling on a single response decode (seconds).
pub const DEFAULT_DECODE_TIMEOUT_SECS: u64 = 180;

/// Consecutive body read failures tolerated before the stream is abandoned.
pub const MAX_READ_RETRIES: u32 = 3;

/// Pause between body read retries.
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Longest error body preview attached to an error value.
pub const ERROR_BODY_PREVIEW_CHARS: usize = 512;

/// Model name to backend model id, as shipped.
pub const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("gpt-4.1-2025-04-14", "14e9311c-94d2-40c2-8c54-273947e208b0"),
    ("gemini-2.5-pro", "e2d9d353-6dbe-4414-bf87-bd289d523726"),
    ("claude-opus-4-20250514", "ee116d12-64d6-48a8-88e5-b2d06325cdd2"),
    (
        "claude-3-7-sonnet-20250219-thinking-32k",
        "be98fcfd-345c-4ae1-9a82-a19123ebf1d2",
    ),
    ("gpt-5-chat", "4b11c78c-08c8-461c-938e-5fc97d56a40d"),
    ("gpt-5-high", "983bc566-b783-4d28-b24c-3c8b08eb1086"),
    ("claude-opus-4-1-20250805", "96ae95fd-b70d-49c3-91cc-b58c7da1090b"),
    (
        "gpt-5-high-new-system-prompt",
        "19ad5f04-38c6-48ae-b826-f7d5bbfd79f7",
    ),
    (
        "claude-opus-4-1-20250805-thinking-16k",
        "f1a2eb6f-fc30-4806-9e00-1efd0d73cbc4",
    ),
    (
        "claude-opus-4-20250514-thinking-16k",
        "3b5e9593-3dc0-4492-a3da-19784c4bde75",
    ),
];

/// Top-level configuration for the relay engine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub browser_less: ClearanceConfig,
    /// Custom model name to backend id entries; these win over the built-in table.
    pub models: HashMap<String, String>,
    pub decode: DecodeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the relay server binds to.
    pub listen: String,
    /// Shared secret checked against the inbound bearer token.
    pub password: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            password: None,
        }
    }
}

/// Where the chat backend lives and how requests present themselves to it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub origin: String,
    pub referer: String,
    pub connect_timeout_secs: u64,
    /// Ceiling on waiting for response headers, per attempt.
    pub response_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://lmarena.ai/nextjs-api".to_string(),
            origin: "https://lmarena.ai".to_string(),
            referer: "https://lmarena.ai/?mode=direct".to_string(),
            connect_timeout_secs: 30,
            response_timeout_secs: DEFAULT_RESPONSE_TIMEOUT_SECS,
        }
    }
}

/// External clearance service that hands out browser cookies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClearanceConfig {
    pub enabled: bool,
    /// Explicit service address; takes precedence over `port`.
    pub reversal: Option<String>,
    pub port: u16,
    /// Site the clearance is requested for (`x-website` header).
    pub website: String,
}

impl Default for ClearanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reversal: None,
            port: 8000,
            website: "https://lmarena.ai/?mode=direct".to_string(),
        }
    }
}

impl ClearanceConfig {
    /// Base URL of the clearance service, or `None` when the provider is switched off.
    pub fn base_url(&self) -> Option<String> {
        let reversal = self
            .reversal
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        match reversal {
            Some(url) => Some(url.trim_end_matches('/').to_string()),
            None if self.enabled => Some(format!("http://127.0.0.1:{}", self.port)),
            None => None,
        }
    }
}

/// What to do with content when the body ends without a terminal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfInputPolicy {
    /// Keep whatever arrived; the backend sometimes omits the terminal record.
    #[default]
    Complete,
    /// Drop unterminated content so the caller sees an empty response.
    Discard,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub timeout_secs: u64,
    pub end_of_input: EndOfInputPolicy,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_DECODE_TIMEOUT_SECS,
            end_of_input: EndOfInputPolicy::Complete,
        }
    }
}

impl EngineConfig {
    /// Load a JSON configuration file; missing sections fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Map an inbound model name to the backend model id.
    ///
    /// Custom entries override the built-in table; anything unknown falls back to
    /// [`DEFAULT_MODEL`].
    pub fn resolve_model_id(&self, name: &str) -> String {
        if let Some(id) = self.models.get(name) {
            return id.clone();
        }
        builtin_model_id(name)
            .or_else(|| builtin_model_id(DEFAULT_MODEL))
            .unwrap_or_default()
            .to_string()
    }

    pub fn is_known_model(&self, name: &str) -> bool {
        self.models.contains_key(name) || builtin_model_id(name).is_some()
    }

    /// Custom names first (sorted), then the built-in table, without duplicates.
    pub fn model_names(&self) -> Vec<String> {
        let mut custom: Vec<String> = self.models.keys().cloned().collect();
        custom.sort();
        for (name, _) in BUILTIN_MODELS {
            if !self.models.contains_key(*name) {
                custom.push((*name).to_string());
            }
        }
        custom
    }

    /// Check an inbound token against the shared secret.
    ///
    /// Returns the token to use as the backend credential, if any. A token equal to the
    /// password only authenticates the caller and is never forwarded.
    pub fn authorize<'a>(&self, token: Option<&'a str>) -> Result<Option<&'a str>, EngineError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let password = self.server.password.as_deref().filter(|p| !p.is_empty());
        match (password, token) {
            (_, None) => Ok(None),
            (None, Some(t)) => Ok(Some(t)),
            (Some(p), Some(t)) if p == t => Ok(None),
            (Some(_), Some(_)) => Err(EngineError::Unauthorized),
        }
    }
}

fn builtin_model_id(name: &str) -> Option<&'static str> {
    BUILTIN_MODELS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, id)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_id_custom_overrides_builtin() {
        let mut config = EngineConfig::default();
        config
            .models
            .insert("gpt-5-chat".to_string(), "custom-id".to_string());
        assert_eq!(config.resolve_model_id("gpt-5-chat"), "custom-id");
        assert_eq!(
            config.resolve_model_id("gemini-2.5-pro"),
            "e2d9d353-6dbe-4414-bf87-bd289d523726"
        );
    }

    #[test]
    fn test_resolve_model_id_falls_back_to_default() {
        let config = EngineConfig::default();
        assert_eq!(
            config.resolve_model_id("no-such-model"),
            "14e9311c-94d2-40c2-8c54-273947e208b0"
        );
        assert!(!config.is_known_model("no-such-model"));
    }

    #[test]
    fn test_model_names_dedup() {
        let mut config = EngineConfig::default();
        config
            .models
            .insert("gpt-5-chat".to_string(), "x".to_string());
        config.models.insert("a-custom".to_string(), "y".to_string());
        let names = config.model_names();
        assert_eq!(names[0], "a-custom");
        assert_eq!(names.len(), BUILTIN_MODELS.len() + 1);
        assert_eq!(names.iter().filter(|n| *n == "gpt-5-chat").count(), 1);
    }

    #[test]
    fn test_authorize() {
        let mut config = EngineConfig::default();
        assert_eq!(config.authorize(None).unwrap(), None);
        assert_eq!(config.authorize(Some("  ")).unwrap(), None);
        assert_eq!(config.authorize(Some("cookie")).unwrap(), Some("cookie"));

        config.server.password = Some("secret".to_string());
        assert_eq!(config.authorize(Some("secret")).unwrap(), None);
        assert_eq!(config.authorize(None).unwrap(), None);
        assert!(matches!(
            config.authorize(Some("other")),
            Err(EngineError::Unauthorized)
        ));
    }

    #[test]
    fn test_clearance_base_url() {
        let mut cfg = ClearanceConfig::default();
        assert_eq!(cfg.base_url(), None);

        cfg.enabled = true;
        cfg.port = 9222;
        assert_eq!(cfg.base_url().as_deref(), Some("http://127.0.0.1:9222"));

        cfg.enabled = false;
        cfg.reversal = Some("https://clearance.example/".to_string());
        assert_eq!(
            cfg.base_url().as_deref(),
            Some("https://clearance.example")
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"browser_less": {"enabled": true}, "decode": {"end_of_input": "discard"}}"#,
        )
        .unwrap();
        assert!(config.browser_less.enabled);
        assert_eq!(config.browser_less.port, 8000);
        assert_eq!(config.decode.end_of_input, EndOfInputPolicy::Discard);
        assert_eq!(config.decode.timeout_secs, DEFAULT_DECODE_TIMEOUT_SECS);
        assert_eq!(config.backend.origin, "https://lmarena.ai");
    }
}
