// Error taxonomy shared by the credential lease, dispatcher, decoder and relay facade.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The clearance provider is switched off, unreachable, or answered with a non-200.
    #[error("credential provider unavailable: {0}")]
    CredentialUnavailable(String),

    /// The clearance provider answered, but not with a usable cookie.
    #[error("credential provider returned a malformed response: {0}")]
    CredentialProtocol(String),

    /// HTTP 403 from the backend.
    #[error("backend rejected the credential (HTTP 403): {body}")]
    AuthExpired { body: String },

    /// HTTP 500 on the retry route: the cached conversation is gone.
    #[error("backend session {session_id} is no longer valid: {body}")]
    SessionInvalid { session_id: String, body: String },

    /// Any other non-success outcome, including connection and body read failures.
    #[error("backend transport error (status {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The stream carried an error record and no content.
    #[error("backend reported an error: {0}")]
    Backend(String),

    #[error("EMPTY RESPONSE")]
    EmptyResponse,

    #[error("request cancelled")]
    Cancelled,

    #[error("unauthorized")]
    Unauthorized,

    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    /// Caller request body could not be understood.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    pub(crate) fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transport {
            status,
            message: message.into(),
        }
    }

    /// HTTP status the backend answered with, when the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthExpired { .. } => Some(403),
            Self::SessionInvalid { .. } => Some(500),
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::transport(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

/// First `max_chars` characters of `text`, marked when cut.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
