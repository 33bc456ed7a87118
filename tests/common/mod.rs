// Fake chat backend and credential provider shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arena_relay_engine::credential::traits::{Clearance, CredentialProvider};
use arena_relay_engine::EngineError;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{post, put},
    Router,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;

pub const STOP_LINE: &str = "ad:{\"finishReason\":\"stop\"}\n";

/// How the fake backend answers the next request.
#[derive(Debug, Clone)]
pub enum Reply {
    Stream(String),
    Status(u16),
    Json,
    /// Accept the request and never answer.
    Silent,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub cookie: String,
    pub user_agent: String,
    pub content_type: String,
    pub body: Value,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    default_body: Arc<Mutex<String>>,
}

impl FakeBackend {
    /// Start the backend on an ephemeral port; returns it with its base URL.
    pub async fn start() -> (Self, String) {
        let backend = Self::default();
        backend.set_default_body(&format!("a0:\"Hello\"\na0:\" world\"\n{}", STOP_LINE));

        let app = Router::new()
            .route("/stream/create-evaluation", post(backend_handler))
            .route(
                "/stream/retry-evaluation-session-message/{session}/messages/{message}",
                put(backend_handler),
            )
            .with_state(backend.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (backend, format!("http://127.0.0.1:{}", port))
    }

    /// Queue replies for the next requests; once drained the default stream is served.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().extend(replies);
    }

    pub fn set_default_body(&self, body: &str) {
        *self.default_body.lock() = body.to_string();
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

async fn backend_handler(
    State(backend): State<FakeBackend>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    backend.requests.lock().push(RecordedRequest {
        method,
        path: uri.path().to_string(),
        cookie: header_str(header::COOKIE),
        user_agent: header_str(header::USER_AGENT),
        content_type: header_str(header::CONTENT_TYPE),
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });

    let reply = backend.script.lock().pop_front();
    let reply = reply.unwrap_or_else(|| Reply::Stream(backend.default_body.lock().clone()));
    match reply {
        Reply::Stream(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/event-stream")],
            body,
        )
            .into_response(),
        Reply::Status(code) => (
            StatusCode::from_u16(code).unwrap(),
            format!("scripted failure {}", code),
        )
            .into_response(),
        Reply::Silent => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
        Reply::Json => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            "{\"error\":\"not a stream\"}",
        )
            .into_response(),
    }
}

/// Provider minting `cookie-1`, `cookie-2`, ... and counting calls.
#[derive(Default)]
pub struct CountingProvider {
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn fetch_clearance(&self) -> Result<Clearance, EngineError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Clearance {
            cookie: format!("arena-auth-prod-v1.0=cookie-{}", n),
            user_agent: Some("FakeBrowser/1.0".to_string()),
            lang: Some("en-US".to_string()),
        })
    }
}
