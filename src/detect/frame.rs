// Line classification for the backend's prefix-tagged response stream.

use serde::Deserialize;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// One classified response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `a0:` — text to append.
    Delta(String),
    /// `ad:` — finish metadata; `Some("stop")` ends the turn.
    Finish(Option<String>),
    /// `a2:` string that is an image URL.
    Image(String),
    /// `a2:` string that is anything else.
    Annotation(String),
    /// `a3:` — error reported by the backend inside the stream.
    Error(String),
    /// Unrecognised prefix, or no prefix at all.
    Unknown,
    /// Recognised prefix whose payload did not match its schema.
    Malformed { prefix: String, reason: String },
}

impl Frame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Finish(Some(reason)) if reason == "stop")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishPayload {
    finish_reason: Option<String>,
}

/// Classify a single line (without its trailing newline).
pub fn parse_frame(line: &str) -> Frame {
    let Some((prefix, payload)) = line.split_once(':') else {
        return Frame::Unknown;
    };

    match prefix {
        "a0" => match serde_json::from_str::<String>(payload) {
            Ok(text) => Frame::Delta(text),
            Err(e) => malformed(prefix, e),
        },
        "ad" => match serde_json::from_str::<FinishPayload>(payload) {
            Ok(finish) => Frame::Finish(finish.finish_reason),
            Err(e) => malformed(prefix, e),
        },
        "a2" => match serde_json::from_str::<String>(payload) {
            Ok(value) if is_image_url(&value) => Frame::Image(value),
            Ok(value) => Frame::Annotation(value),
            Err(e) => malformed(prefix, e),
        },
        "a3" => match serde_json::from_str::<String>(payload) {
            Ok(detail) => Frame::Error(detail),
            Err(e) => malformed(prefix, e),
        },
        _ => Frame::Unknown,
    }
}

fn malformed(prefix: &str, err: serde_json::Error) -> Frame {
    Frame::Malformed {
        prefix: prefix.to_string(),
        reason: err.to_string(),
    }
}

/// `https://` URL whose path ends in a known image extension.
/// Query strings and fragments are ignored; the match is case-insensitive.
pub fn is_image_url(value: &str) -> bool {
    let Some(rest) = value.trim().strip_prefix("https://") else {
        return false;
    };
    let path = rest.split(['?', '#']).next().unwrap_or(rest);
    let Some((host, path)) = path.split_once('/') else {
        return false;
    };
    if host.is_empty() {
        return false;
    }
    match path.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}
