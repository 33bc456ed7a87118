// Axum relay surface — OpenAI-style chat requests in, engine turns out.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::api::relay_api::{CompletionRequest, RelayEngine};
use crate::config::MODEL_PREFIX;
use crate::engine::decoder::{DecodeOutcome, StreamEvent};
use crate::error::EngineError;

pub struct RelayServer {
    addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl RelayServer {
    /// Bind `listen` and serve the relay routes until [`RelayServer::shutdown`].
    pub async fn start(engine: Arc<RelayEngine>, listen: &str) -> Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = Router::new()
            .route("/v1/models", get(models_handler))
            .route("/v1/chat/completions", post(chat_handler))
            .with_state(engine);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("relay server listening on {}", addr);
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    model: String,
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Value,
}

/// Engine errors rendered as OpenAI-style error bodies.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            EngineError::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication_error"),
            EngineError::UnsupportedModel(_) | EngineError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error")
            }
            EngineError::CredentialUnavailable(_) | EngineError::CredentialProtocol(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "credential_error")
            }
            EngineError::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
            _ => (StatusCode::BAD_GATEWAY, "upstream_error"),
        };
        if status.is_server_error() {
            error!("chat request failed: {}", self.0);
        }
        let body = json!({
            "error": {
                "message": self.0.to_string(),
                "type": kind,
            }
        });
        (status, Json(body)).into_response()
    }
}

/// GET /v1/models
async fn models_handler(State(engine): State<Arc<RelayEngine>>) -> Response {
    let data: Vec<Value> = engine
        .models()
        .into_iter()
        .map(|name| {
            json!({
                "id": format!("{}{}", MODEL_PREFIX, name),
                "object": "model",
                "created": 1686935002,
                "owned_by": "lmsys-chat-adapter",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data })).into_response()
}

/// POST /v1/chat/completions
async fn chat_handler(
    State(engine): State<Arc<RelayEngine>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    match chat(engine, headers, body).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

async fn chat(
    engine: Arc<RelayEngine>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let request: ChatRequest = serde_json::from_str(&body)
        .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;

    let credential = engine
        .config()
        .authorize(bearer_token(&headers))?
        .map(str::to_string);

    let model = request
        .model
        .strip_prefix(MODEL_PREFIX)
        .filter(|name| engine.config().is_known_model(name))
        .ok_or_else(|| EngineError::UnsupportedModel(request.model.clone()))?
        .to_string();

    let prompt = flatten_messages(&request.messages);
    debug!(
        "chat request model={} stream={} messages={} prompt_chars={}",
        model,
        request.stream,
        request.messages.len(),
        prompt.len()
    );

    if request.stream {
        return Ok(stream_completion(engine, credential, prompt, model).into_response());
    }

    let cancel = CancellationToken::new();
    let outcome = engine
        .complete(
            CompletionRequest {
                credential: credential.as_deref(),
                prompt: &prompt,
                model: &model,
            },
            &cancel,
            |_| {},
        )
        .await?;

    Ok(Json(completion_body(&request.model, &outcome)).into_response())
}

fn stream_completion(
    engine: Arc<RelayEngine>,
    credential: Option<String>,
    prompt: String,
    model: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let cancel = CancellationToken::new();
    let id = completion_id();
    let created = unix_now();
    let public_model = format!("{}{}", MODEL_PREFIX, model);

    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        let chunk = |delta: Value, finish: Option<&str>| {
            Event::default().data(
                json!({
                    "id": id,
                    "object": "chat.completion.chunk",
                    "created": created,
                    "model": public_model,
                    "choices": [{ "index": 0, "delta": delta, "finish_reason": finish }],
                })
                .to_string(),
            )
        };

        // Images sit in their own paragraph, as in `render_content`.
        let mut wrote_content = false;
        let mut after_image = false;
        let on_event = |event: &StreamEvent| {
            let (content, is_image) = match event {
                StreamEvent::ContentDelta(text) if after_image => (format!("\n\n{}", text), false),
                StreamEvent::ContentDelta(text) => (text.clone(), false),
                StreamEvent::ImageUrl(url) if wrote_content => {
                    (format!("\n\n{}", image_markdown(url)), true)
                }
                StreamEvent::ImageUrl(url) => (image_markdown(url), true),
                StreamEvent::Finished(_) | StreamEvent::Error(_) => return,
            };
            wrote_content = true;
            after_image = is_image;
            let delta = json!({ "role": "assistant", "content": content });
            if tx.send(chunk(delta, None)).is_err() {
                // Client went away; stop reading the backend.
                task_cancel.cancel();
            }
        };

        let result = engine
            .complete(
                CompletionRequest {
                    credential: credential.as_deref(),
                    prompt: &prompt,
                    model: &model,
                },
                &task_cancel,
                on_event,
            )
            .await;

        match result {
            Ok(_) => {
                let _ = tx.send(chunk(json!({}), Some("stop")));
            }
            Err(EngineError::Cancelled) => {
                debug!("stream client disconnected");
                return;
            }
            Err(e) => {
                error!("stream completion failed: {}", e);
                let _ = tx.send(Event::default().data(
                    json!({ "error": { "message": e.to_string(), "type": "upstream_error" } })
                        .to_string(),
                ));
            }
        }
        let _ = tx.send(Event::default().data("[DONE]"));
    });

    // Dropping the stream (client disconnect) cancels the in-flight turn.
    let guard = cancel.drop_guard();
    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Infallible>(event), (rx, guard)))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn completion_body(model: &str, outcome: &DecodeOutcome) -> Value {
    json!({
        "id": completion_id(),
        "object": "chat.completion",
        "created": unix_now(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": render_content(outcome) },
            "finish_reason": "stop",
        }],
    })
}

/// Text followed by any images, as markdown.
fn render_content(outcome: &DecodeOutcome) -> String {
    let mut content = outcome.content.clone();
    for url in &outcome.images {
        if !content.is_empty() {
            content.push_str("\n\n");
        }
        content.push_str(&image_markdown(url));
    }
    content
}

fn image_markdown(url: &str) -> String {
    format!("![image]({})", url)
}

/// Plain `role: content` join; richer role templates live outside this crate.
fn flatten_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, message_text(&m.content)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Text of a message whose content is a string or an array of typed parts.
fn message_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value);
    Some(token.trim())
}

fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
