use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::credential::clearance::ClearanceProvider;
use crate::credential::lease::CredentialLease;
use crate::credential::traits::{CredentialProvider, DisabledProvider};
use crate::engine::cache::SessionCache;
use crate::engine::decoder::{decode, DecodeOptions, DecodeOutcome, StreamEvent};
use crate::engine::dispatcher::Dispatcher;
use crate::engine::stats::{DispatchSnapshot, DispatchStats};
use crate::error::EngineError;

/// One chat turn as handed to the engine.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Caller-supplied backend credential; blank or placeholder values use the lease.
    pub credential: Option<&'a str>,
    /// Already flattened prompt text.
    pub prompt: &'a str,
    /// Public model name (without the relay prefix).
    pub model: &'a str,
}

/// Process-wide relay state: one credential lease, one session cache, one dispatcher.
pub struct RelayEngine {
    config: EngineConfig,
    lease: Arc<CredentialLease>,
    sessions: Arc<SessionCache>,
    stats: Arc<DispatchStats>,
    dispatcher: Dispatcher,
    decode_options: DecodeOptions,
}

impl RelayEngine {
    /// Build an engine whose credential provider comes from `config.browser_less`.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let provider: Arc<dyn CredentialProvider> =
            match ClearanceProvider::from_config(&config.browser_less) {
                Some(provider) => Arc::new(provider),
                None => {
                    info!("no clearance provider configured, callers must supply credentials");
                    Arc::new(DisabledProvider)
                }
            };
        Self::with_provider(config, provider)
    }

    pub fn with_provider(
        config: EngineConfig,
        provider: Arc<dyn CredentialProvider>,
    ) -> Result<Self, EngineError> {
        let lease = Arc::new(CredentialLease::new(provider));
        let sessions = Arc::new(SessionCache::new());
        let stats = Arc::new(DispatchStats::new());
        let dispatcher = Dispatcher::new(
            config.backend.clone(),
            lease.clone(),
            sessions.clone(),
            stats.clone(),
        )?;
        let decode_options = DecodeOptions::from(&config.decode);

        info!(
            "relay engine ready backend={} models={}",
            config.backend.base_url,
            config.model_names().len()
        );

        Ok(Self {
            config,
            lease,
            sessions,
            stats,
            dispatcher,
            decode_options,
        })
    }

    /// Run one chat turn: dispatch, then decode the streamed answer.
    ///
    /// Deltas reach `on_event` while the body is still arriving. An exchange that ends
    /// without text or images is `EmptyResponse`, or `Backend` when the stream itself
    /// carried an error record.
    pub async fn complete<F>(
        &self,
        request: CompletionRequest<'_>,
        cancel: &CancellationToken,
        on_event: F,
    ) -> Result<DecodeOutcome, EngineError>
    where
        F: FnMut(&StreamEvent),
    {
        let model_id = self.config.resolve_model_id(request.model);
        debug!("complete model={} backend_model={}", request.model, model_id);

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            res = self.dispatcher.send(request.credential, request.prompt, &model_id) => res?,
        };
        debug!(
            "dispatched route={:?} session={}",
            stream.route(),
            stream.session().session_id
        );

        let outcome = decode(stream.into_reader(), &self.decode_options, cancel, on_event).await?;
        if outcome.is_empty() {
            if let Some(detail) = outcome.errors.first() {
                return Err(EngineError::Backend(detail.clone()));
            }
            warn!("empty response model={}", request.model);
            return Err(EngineError::EmptyResponse);
        }
        Ok(outcome)
    }

    pub fn models(&self) -> Vec<String> {
        self.config.model_names()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lease(&self) -> &Arc<CredentialLease> {
        &self.lease
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }
}
