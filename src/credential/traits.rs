use async_trait::async_trait;

use crate::error::EngineError;

/// What a clearance provider hands back: the cookie plus the browser it was minted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clearance {
    pub cookie: String,
    pub user_agent: Option<String>,
    pub lang: Option<String>,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch_clearance(&self) -> Result<Clearance, EngineError>;
}

/// Provider used when no clearance service is configured.
pub struct DisabledProvider;

#[async_trait]
impl CredentialProvider for DisabledProvider {
    async fn fetch_clearance(&self) -> Result<Clearance, EngineError> {
        Err(EngineError::CredentialUnavailable(
            "no clearance service configured; set `browser_less.enabled` or `browser_less.reversal`"
                .to_string(),
        ))
    }
}
