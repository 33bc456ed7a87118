use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::traits::{Clearance, CredentialProvider};
use crate::config::{ClearanceConfig, ERROR_BODY_PREVIEW_CHARS};
use crate::error::{preview, EngineError};

/// Fetches browser clearance cookies from an external headless-browser service.
pub struct ClearanceProvider {
    client: Client,
    base_url: String,
    website: String,
}

#[derive(Deserialize)]
struct ClearanceEnvelope {
    data: Option<ClearanceData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearanceData {
    cookie: Option<String>,
    user_agent: Option<String>,
    lang: Option<String>,
}

impl ClearanceProvider {
    pub fn new(base_url: impl Into<String>, website: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            website: website.into(),
        }
    }

    /// Build a provider from configuration; `None` when the service is switched off.
    pub fn from_config(config: &ClearanceConfig) -> Option<Self> {
        let base_url = config.base_url()?;
        info!("clearance provider url={}", base_url);
        Some(Self::new(base_url, config.website.clone()))
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v0/clearance", self.base_url)
    }
}

#[async_trait]
impl CredentialProvider for ClearanceProvider {
    async fn fetch_clearance(&self) -> Result<Clearance, EngineError> {
        let url = self.endpoint();
        debug!("requesting clearance url={} website={}", url, self.website);

        let resp = self
            .client
            .get(&url)
            .header("x-website", self.website.as_str())
            .send()
            .await
            .map_err(|e| EngineError::CredentialUnavailable(format!("{}: {}", url, e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| EngineError::CredentialUnavailable(format!("reading body: {}", e)))?;

        if status != StatusCode::OK {
            warn!("clearance request failed status={}", status.as_u16());
            return Err(EngineError::CredentialUnavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                preview(&body, ERROR_BODY_PREVIEW_CHARS)
            )));
        }

        parse_clearance(&body)
    }
}

/// Parse the provider's `{data: {cookie, userAgent, lang}}` envelope.
pub fn parse_clearance(body: &str) -> Result<Clearance, EngineError> {
    let envelope: ClearanceEnvelope = serde_json::from_str(body).map_err(|e| {
        EngineError::CredentialProtocol(format!(
            "{}: {}",
            e,
            preview(body, ERROR_BODY_PREVIEW_CHARS)
        ))
    })?;

    let data = envelope
        .data
        .ok_or_else(|| EngineError::CredentialProtocol("missing `data` field".to_string()))?;

    let cookie = data
        .cookie
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| EngineError::CredentialProtocol("missing cookie".to_string()))?;

    Ok(Clearance {
        cookie,
        user_agent: data.user_agent.filter(|ua| !ua.is_empty()),
        lang: data.lang.filter(|l| !l.is_empty()),
    })
}
