// Request dispatcher — create/retry against the backend with bounded self-healing.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::SessionCache;
use super::payload::{CreateEvaluation, RetryEvaluation};
use super::session::{derive_cache_key, SessionState};
use super::stats::DispatchStats;
use crate::config::{BackendConfig, ERROR_BODY_PREVIEW_CHARS, PLACEHOLDER_CREDENTIAL};
use crate::credential::lease::{token_preview, BrowserProfile, Credential, CredentialLease};
use crate::error::{preview, EngineError};

/// Body reader handed to the decoder.
pub type BodyReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Create,
    Retry,
}

/// A successful backend response whose body has not been read yet.
#[derive(Debug)]
pub struct BackendStream {
    route: Route,
    session: SessionState,
    response: Response,
}

impl BackendStream {
    pub fn route(&self) -> Route {
        self.route
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn into_reader(self) -> BodyReader {
        let body = self.response.bytes_stream().map_err(io::Error::other).boxed();
        StreamReader::new(body)
    }
}

/// Credential as presented on the wire for one attempt.
#[derive(Debug, Clone)]
struct ActiveCredential {
    token: String,
    profile: BrowserProfile,
}

impl From<Credential> for ActiveCredential {
    fn from(credential: Credential) -> Self {
        Self {
            token: credential.token,
            profile: credential.profile,
        }
    }
}

enum Attempt {
    Create,
    Retry(SessionState),
}

/// A caller-supplied credential is used as-is unless it is blank or the placeholder.
pub fn is_explicit_credential(credential: &str) -> bool {
    let trimmed = credential.trim();
    !trimmed.is_empty() && trimmed != PLACEHOLDER_CREDENTIAL
}

pub struct Dispatcher {
    client: Client,
    response_timeout: Duration,
    backend: BackendConfig,
    lease: Arc<CredentialLease>,
    sessions: Arc<SessionCache>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        backend: BackendConfig,
        lease: Arc<CredentialLease>,
        sessions: Arc<SessionCache>,
        stats: Arc<DispatchStats>,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(backend.connect_timeout_secs.max(1)))
            .build()?;
        let response_timeout = Duration::from_secs(backend.response_timeout_secs.max(1));
        Ok(Self {
            client,
            response_timeout,
            backend,
            lease,
            sessions,
            stats,
        })
    }

    /// Send `prompt` to the backend conversation for (credential, model).
    ///
    /// A cached session is continued through the retry endpoint; otherwise a new one is
    /// created and cached. One forced credential refresh is spent on a 403, and one
    /// eviction-plus-recreate on a 500 from the retry endpoint. Anything else, or the same
    /// failure a second time, is returned.
    pub async fn send(
        &self,
        credential: Option<&str>,
        prompt: &str,
        model_id: &str,
    ) -> Result<BackendStream, EngineError> {
        let result = self.send_inner(credential, prompt, model_id).await;
        if result.is_err() {
            self.stats.record_failure();
        }
        result
    }

    async fn send_inner(
        &self,
        credential: Option<&str>,
        prompt: &str,
        model_id: &str,
    ) -> Result<BackendStream, EngineError> {
        let mut credential = self.resolve_credential(credential).await?;
        let key = derive_cache_key(&credential.token, model_id);

        let mut attempt = match self.sessions.get(&key) {
            Some(session) => {
                info!("continuing session {} model={}", session.session_id, model_id);
                Attempt::Retry(session)
            }
            None => {
                info!("creating session model={}", model_id);
                Attempt::Create
            }
        };

        let mut auth_recovered = false;
        let mut session_recovered = false;

        loop {
            let result = match &attempt {
                Attempt::Create => self.create(&credential, prompt, model_id).await,
                Attempt::Retry(session) => self.retry(&credential, prompt, model_id, session).await,
            };

            let err = match result {
                Ok(stream) => {
                    if stream.route == Route::Create {
                        self.sessions.put(key, stream.session.clone());
                    }
                    return Ok(stream);
                }
                Err(err) => err,
            };

            match err {
                EngineError::AuthExpired { .. } if !auth_recovered => {
                    auth_recovered = true;
                    self.stats.record_auth_recovery();
                    warn!(
                        "credential {} rejected, forcing refresh",
                        token_preview(&credential.token)
                    );
                    match self.lease.force_refresh(&credential.token).await {
                        Ok(fresh) => credential = fresh.into(),
                        Err(refresh_err) => {
                            warn!("credential refresh after 403 failed: {}", refresh_err);
                            return Err(err);
                        }
                    }
                }
                EngineError::SessionInvalid { ref session_id, .. } if !session_recovered => {
                    session_recovered = true;
                    warn!("session {} invalidated, recreating", session_id);
                    self.sessions.evict(&key);
                    self.stats.record_eviction();
                    attempt = Attempt::Create;
                }
                err => return Err(err),
            }
        }
    }

    async fn resolve_credential(
        &self,
        explicit: Option<&str>,
    ) -> Result<ActiveCredential, EngineError> {
        match explicit.filter(|c| is_explicit_credential(c)) {
            Some(token) => {
                debug!("using caller credential {}", token_preview(token));
                Ok(ActiveCredential {
                    token: token.trim().to_string(),
                    profile: self.lease.profile(),
                })
            }
            None => Ok(self.lease.acquire().await?.into()),
        }
    }

    async fn create(
        &self,
        credential: &ActiveCredential,
        prompt: &str,
        model_id: &str,
    ) -> Result<BackendStream, EngineError> {
        let session = SessionState {
            session_id: Uuid::new_v4().to_string(),
            user_message_id: Uuid::new_v4().to_string(),
            model_message_id: Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
        };
        let body = CreateEvaluation::new(Uuid::new_v4().to_string(), &session, prompt);
        let url = format!("{}/stream/create-evaluation", self.base_url());

        self.stats.record_create();
        debug!("POST {} session={}", url, session.session_id);
        let response = self
            .execute(self.client.post(&url), credential, &body)
            .await?;
        let response = classify(response, Route::Create, &session.session_id).await?;

        Ok(BackendStream {
            route: Route::Create,
            session,
            response,
        })
    }

    async fn retry(
        &self,
        credential: &ActiveCredential,
        prompt: &str,
        model_id: &str,
        session: &SessionState,
    ) -> Result<BackendStream, EngineError> {
        let body = RetryEvaluation::new(session, prompt, model_id);
        let url = format!(
            "{}/stream/retry-evaluation-session-message/{}/messages/{}",
            self.base_url(),
            session.session_id,
            session.model_message_id
        );

        self.stats.record_retry();
        debug!("PUT {}", url);
        let response = self
            .execute(self.client.put(&url), credential, &body)
            .await?;
        let response = classify(response, Route::Retry, &session.session_id).await?;

        Ok(BackendStream {
            route: Route::Retry,
            session: session.clone(),
            response,
        })
    }

    /// Attach browser headers and the JSON body (sent as text/plain, as the site does).
    async fn execute<T: Serialize>(
        &self,
        request: RequestBuilder,
        credential: &ActiveCredential,
        body: &T,
    ) -> Result<Response, EngineError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| EngineError::transport(None, format!("encoding request: {}", e)))?;

        let mut request = request
            .header(header::USER_AGENT, credential.profile.user_agent.as_str())
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::ORIGIN, self.backend.origin.as_str())
            .header(header::REFERER, self.backend.referer.as_str())
            .header(header::COOKIE, credential.token.as_str())
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8");
        if !credential.profile.accept_language.is_empty() {
            request = request.header(
                header::ACCEPT_LANGUAGE,
                credential.profile.accept_language.as_str(),
            );
        }

        match tokio::time::timeout(self.response_timeout, request.body(payload).send()).await {
            Ok(response) => Ok(response?),
            Err(_) => {
                warn!(
                    "backend sent no response headers within {}s",
                    self.response_timeout.as_secs()
                );
                Err(EngineError::transport(
                    None,
                    format!(
                        "no response within {}s",
                        self.response_timeout.as_secs()
                    ),
                ))
            }
        }
    }

    fn base_url(&self) -> &str {
        self.backend.base_url.trim_end_matches('/')
    }
}

/// Map a backend response onto success or one of the recoverable failure classes.
async fn classify(
    response: Response,
    route: Route,
    session_id: &str,
) -> Result<Response, EngineError> {
    let status = response.status();
    if status == StatusCode::OK {
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if content_type.contains("text/event-stream") {
            return Ok(response);
        }
        let body = error_body(response).await;
        warn!("backend answered 200 with content-type {:?}", content_type);
        return Err(EngineError::transport(
            Some(200),
            format!("unexpected content type {:?}: {}", content_type, body),
        ));
    }

    let body = error_body(response).await;
    warn!("backend {:?} failed status={} body={}", route, status.as_u16(), body);
    match (status, route) {
        (StatusCode::FORBIDDEN, _) => Err(EngineError::AuthExpired { body }),
        (StatusCode::INTERNAL_SERVER_ERROR, Route::Retry) => Err(EngineError::SessionInvalid {
            session_id: session_id.to_string(),
            body,
        }),
        _ => Err(EngineError::transport(Some(status.as_u16()), body)),
    }
}

async fn error_body(response: Response) -> String {
    match response.text().await {
        Ok(text) => preview(&text, ERROR_BODY_PREVIEW_CHARS),
        Err(e) => format!("<unreadable body: {}>", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_explicit_credential() {
        assert!(is_explicit_credential("arena-auth-prod-v1.0=abc"));
        assert!(!is_explicit_credential(""));
        assert!(!is_explicit_credential("   "));
        assert!(!is_explicit_credential("EMPTY_KEY"));
        assert!(!is_explicit_credential(" EMPTY_KEY "));
    }
}
