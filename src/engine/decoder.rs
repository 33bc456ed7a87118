// Stream decoder — reassembles the backend's line-framed response into text.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{
    DecodeConfig, EndOfInputPolicy, DEFAULT_DECODE_TIMEOUT_SECS, MAX_READ_RETRIES,
    READ_RETRY_DELAY,
};
use crate::detect::frame::{parse_frame, Frame};
use crate::error::EngineError;

/// Events forwarded to the consumer as the stream is decoded, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ContentDelta(String),
    Finished(String),
    ImageUrl(String),
    Error(String),
}

/// How decoding came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Termination {
    /// Terminal `finishReason: "stop"` record seen.
    Finished,
    /// Body ended without a terminal record.
    #[default]
    EndOfInput,
    /// Wall-clock ceiling reached.
    TimedOut,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOutcome {
    pub content: String,
    pub images: Vec<String>,
    pub errors: Vec<String>,
    pub termination: Termination,
}

impl DecodeOutcome {
    /// Neither text nor images arrived.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.images.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub timeout: Duration,
    pub end_of_input: EndOfInputPolicy,
    pub max_read_retries: u32,
    pub read_retry_delay: Duration,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_DECODE_TIMEOUT_SECS),
            end_of_input: EndOfInputPolicy::Complete,
            max_read_retries: MAX_READ_RETRIES,
            read_retry_delay: READ_RETRY_DELAY,
        }
    }
}

impl From<&DecodeConfig> for DecodeOptions {
    fn from(config: &DecodeConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            end_of_input: config.end_of_input,
            ..Self::default()
        }
    }
}

/// Decode a response body until a terminal record, end of input, or the deadline.
///
/// Each content delta is appended to the returned text and forwarded to `on_event` as
/// soon as its line is read. Malformed lines are logged and skipped. Read errors are
/// retried up to `max_read_retries` times in a row, never past the deadline.
pub async fn decode<R, F>(
    mut reader: R,
    options: &DecodeOptions,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<DecodeOutcome, EngineError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&StreamEvent),
{
    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut outcome = DecodeOutcome::default();
    let mut line = Vec::with_capacity(256);
    let mut read_failures = 0u32;
    let mut lines = 0u64;

    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("decode cancelled after {} lines", lines);
                return Err(EngineError::Cancelled);
            }
            res = tokio::time::timeout_at(deadline, reader.read_until(b'\n', &mut line)) => res,
        };

        match read {
            Err(_) => {
                warn!(
                    "decode deadline of {}s reached, returning {} chars",
                    options.timeout.as_secs(),
                    outcome.content.len()
                );
                outcome.termination = Termination::TimedOut;
                break;
            }
            Ok(Ok(0)) => {
                outcome.termination = Termination::EndOfInput;
                if options.end_of_input == EndOfInputPolicy::Discard {
                    debug!("body ended without a terminal record, discarding content");
                    outcome.content.clear();
                    outcome.images.clear();
                }
                break;
            }
            Ok(Ok(_)) => {
                read_failures = 0;
            }
            Ok(Err(e)) => {
                read_failures += 1;
                if read_failures > options.max_read_retries {
                    return Err(EngineError::transport(
                        None,
                        format!("response read failed after {} attempts: {}", read_failures, e),
                    ));
                }
                warn!("response read failed (attempt {}): {}", read_failures, e);
                let resume_at = (Instant::now() + options.read_retry_delay).min(deadline);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep_until(resume_at) => {}
                }
                continue;
            }
        }

        lines += 1;
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\n', '\r']);
        if text.is_empty() {
            continue;
        }
        trace!("stream line: {}", text);

        let frame = parse_frame(text);
        if frame.is_terminal() {
            on_event(&StreamEvent::Finished("stop".to_string()));
            outcome.termination = Termination::Finished;
            break;
        }

        match frame {
            Frame::Delta(delta) => {
                if delta.is_empty() {
                    continue;
                }
                outcome.content.push_str(&delta);
                on_event(&StreamEvent::ContentDelta(delta));
            }
            Frame::Finish(reason) => {
                debug!("non-terminal finish record: {:?}", reason);
            }
            Frame::Image(url) => {
                on_event(&StreamEvent::ImageUrl(url.clone()));
                outcome.images.push(url);
            }
            Frame::Annotation(value) => {
                trace!("ignoring annotation: {}", value);
            }
            Frame::Error(detail) => {
                warn!("backend reported stream error: {}", detail);
                on_event(&StreamEvent::Error(detail.clone()));
                outcome.errors.push(detail);
            }
            Frame::Malformed { prefix, reason } => {
                warn!("skipping malformed `{}:` line: {}", prefix, reason);
            }
            Frame::Unknown => {
                trace!("skipping unrecognised line");
            }
        }
    }

    debug!(
        "decode finished termination={:?} lines={} chars={} elapsed_ms={}",
        outcome.termination,
        lines,
        outcome.content.len(),
        started.elapsed().as_millis()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, BufReader, ReadBuf};

    async fn decode_str(input: &str, options: &DecodeOptions) -> (DecodeOutcome, Vec<StreamEvent>) {
        let mut events = Vec::new();
        let outcome = decode(
            input.as_bytes(),
            options,
            &CancellationToken::new(),
            |ev| events.push(ev.clone()),
        )
        .await
        .unwrap();
        (outcome, events)
    }

    #[tokio::test]
    async fn test_decode_until_stop() {
        let input = "a0:\"Hello\"\na0:\" world\"\nad:{\"finishReason\":\"stop\"}\na0:\"after\"\n";
        let (outcome, events) = decode_str(input, &DecodeOptions::default()).await;

        assert_eq!(outcome.content, "Hello world");
        assert_eq!(outcome.termination, Termination::Finished);
        assert_eq!(
            events,
            vec![
                StreamEvent::ContentDelta("Hello".to_string()),
                StreamEvent::ContentDelta(" world".to_string()),
                StreamEvent::Finished("stop".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_decode_end_of_input_without_terminal() {
        let (outcome, _) = decode_str("a0:\"partial\"\r\n", &DecodeOptions::default()).await;
        assert_eq!(outcome.content, "partial");
        assert_eq!(outcome.termination, Termination::EndOfInput);
    }

    #[tokio::test]
    async fn test_decode_end_of_input_discard_policy() {
        let options = DecodeOptions {
            end_of_input: EndOfInputPolicy::Discard,
            ..DecodeOptions::default()
        };
        let (outcome, events) = decode_str("a0:\"partial\"\n", &options).await;
        assert!(outcome.is_empty());
        assert_eq!(events.len(), 1);

        let (outcome, _) = decode_str("a0:\"done\"\nad:{\"finishReason\":\"stop\"}\n", &options).await;
        assert_eq!(outcome.content, "done");
    }

    #[tokio::test]
    async fn test_decode_skips_malformed_and_unknown_lines() {
        let input = "a0:not-json\nf:{\"messageId\":\"x\"}\n\nad:\"oops\"\na0:\"kept\"\nad:{\"finishReason\":\"length\"}\na0:\" too\"\n";
        let (outcome, _) = decode_str(input, &DecodeOptions::default()).await;
        assert_eq!(outcome.content, "kept too");
        assert_eq!(outcome.termination, Termination::EndOfInput);
    }

    #[tokio::test]
    async fn test_decode_images_and_errors() {
        let input = "a2:\"https://cdn.example.com/out.PNG?sig=1\"\na2:\"not an image\"\na3:\"rate limited\"\nad:{\"finishReason\":\"stop\"}\n";
        let (outcome, events) = decode_str(input, &DecodeOptions::default()).await;
        assert!(outcome.content.is_empty());
        assert_eq!(outcome.images, vec!["https://cdn.example.com/out.PNG?sig=1"]);
        assert_eq!(outcome.errors, vec!["rate limited"]);
        assert!(!outcome.is_empty());
        assert_eq!(
            events[0],
            StreamEvent::ImageUrl("https://cdn.example.com/out.PNG?sig=1".to_string())
        );
        assert_eq!(events[1], StreamEvent::Error("rate limited".to_string()));
    }

    #[tokio::test]
    async fn test_decode_timeout_returns_partial_content() {
        tokio::time::pause();
        let (client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut server, b"a0:\"slow\"\n")
            .await
            .unwrap();

        let options = DecodeOptions {
            timeout: Duration::from_secs(5),
            ..DecodeOptions::default()
        };
        // `server` stays open, so the second read never completes.
        let outcome = decode(
            BufReader::new(client),
            &options,
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome.content, "slow");
        assert_eq!(outcome.termination, Termination::TimedOut);
        drop(server);
    }

    #[tokio::test]
    async fn test_decode_cancelled() {
        let (client, _server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = decode(BufReader::new(client), &DecodeOptions::default(), &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    /// Fails every read after yielding its data once.
    struct FlakyReader {
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for FlakyReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if let Some(data) = self.data.take() {
                buf.put_slice(data);
                return Poll::Ready(Ok(()));
            }
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    #[tokio::test]
    async fn test_decode_read_errors_are_bounded() {
        tokio::time::pause();
        let reader = BufReader::new(FlakyReader {
            data: Some(b"a0:\"x\"\n"),
        });
        let options = DecodeOptions::default();
        let err = decode(reader, &options, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        match err {
            EngineError::Transport { status, message } => {
                assert_eq!(status, None);
                assert!(message.contains("4 attempts"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
