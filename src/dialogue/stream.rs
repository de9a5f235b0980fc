//! Streaming dialogue turns against a chat-completions backend.
//!
//! One turn POSTs the system instruction, trailing history window, and the
//! new user message with `stream: true`, then reads the server-sent event
//! reply line by line. Non-data and malformed lines are skipped, a literal
//! `[DONE]` ends the stream, and the cancellation token is checked at every
//! line so barge-in stops the read promptly. The full reply text is
//! accumulated for history even while segments are being emitted.

use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::segment::ResponseSegmenter;
use super::{ChatMessage, TurnCancellation};

/// Caller id sent with every request.
const CALLER_ID: &str = "voice-node";

/// Longest gap between reply bytes before the turn is considered stalled.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    user: &'a str,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// What one SSE line amounts to.
pub enum StreamEvent {
    /// A content delta to append and segment.
    Delta(String),
    /// Explicit end-of-stream sentinel.
    Done,
    /// Comment, empty line, malformed payload, or delta without content.
    Ignore,
}

/// Classify a single SSE line. Malformed lines are ignored, never fatal.
pub fn parse_sse_line(line: &str) -> StreamEvent {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return StreamEvent::Ignore;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return StreamEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map_or(StreamEvent::Ignore, StreamEvent::Delta),
        Err(e) => {
            debug!("Skipping malformed stream line: {e}");
            StreamEvent::Ignore
        }
    }
}

/// Splits a byte stream into newline-terminated lines, buffering a partial
/// trailing line across chunks.
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        lines
    }

    /// The unterminated final line, if the stream closed without a newline.
    fn remainder(self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.buf).trim_end().to_string())
    }
}

/// Per-turn consumer: routes deltas through the segmenter to the emit
/// callback, accumulates the reply, and honors cancellation.
pub struct TurnConsumer<F: FnMut(&str)> {
    segmenter: ResponseSegmenter,
    cancel: TurnCancellation,
    emit: F,
    reply: String,
}

impl<F: FnMut(&str)> TurnConsumer<F> {
    pub fn new(cancel: TurnCancellation, emit: F) -> Self {
        Self {
            segmenter: ResponseSegmenter::new(),
            cancel,
            emit,
            reply: String::new(),
        }
    }

    /// Feed one received line. Returns `false` when reading should stop
    /// (end-of-stream sentinel or cancellation).
    pub fn feed_line(&mut self, line: &str) -> bool {
        if self.cancel.is_raised() {
            return false;
        }
        match parse_sse_line(line) {
            StreamEvent::Done => false,
            StreamEvent::Ignore => true,
            StreamEvent::Delta(delta) => {
                self.reply.push_str(&delta);
                for segment in self.segmenter.push_delta(&delta) {
                    if self.cancel.is_raised() {
                        return false;
                    }
                    (self.emit)(&segment);
                }
                true
            }
        }
    }

    /// The stream is over: flush the final remainder (unless cancelled) and
    /// return the accumulated reply text.
    pub fn finish(mut self) -> String {
        if !self.cancel.is_raised() {
            if let Some(rest) = self.segmenter.finish() {
                (self.emit)(&rest);
            }
        }
        self.reply
    }
}

/// Client for the dialogue backend.
#[derive(Clone)]
pub struct DialogueClient {
    client: reqwest::Client,
    url: String,
    model: String,
    agent_id: String,
}

impl DialogueClient {
    pub fn new(base_url: &str, model: &str, agent_id: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(READ_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!(
                "{}/v1/chat/completions",
                base_url.trim_end_matches('/')
            ),
            model: model.to_string(),
            agent_id: agent_id.to_string(),
        }
    }

    /// Run one streaming turn. Completed segments are handed to `emit` in
    /// order; the return value is the full accumulated reply (possibly
    /// partial after a mid-stream transport fault or cancellation).
    ///
    /// Errors are returned only when the request itself fails before any
    /// reply bytes arrive.
    pub async fn stream_turn(
        &self,
        messages: &[ChatMessage],
        cancel: TurnCancellation,
        emit: impl FnMut(&str),
    ) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            user: CALLER_ID,
        };

        let resp = self
            .client
            .post(&self.url)
            .header("x-agent-id", &self.agent_id)
            .json(&request)
            .send()
            .await
            .context("Dialogue backend request failed")?
            .error_for_status()
            .context("Dialogue backend returned an error status")?;

        let mut consumer = TurnConsumer::new(cancel.clone(), emit);
        let mut stream = resp.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut open = true;

        'read: while let Some(chunk) = stream.next().await {
            if cancel.is_raised() {
                break;
            }
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    // Keep the partial reply; the turn aborts back to idle.
                    warn!("Stream read error: {e}");
                    break;
                }
            };
            for line in lines.push(&chunk) {
                if !consumer.feed_line(&line) {
                    open = false;
                    break 'read;
                }
            }
        }

        // A stream that closed without a trailing newline still carries one
        // last data line.
        if open {
            if let Some(line) = lines.remainder() {
                consumer.feed_line(&line);
            }
        }

        Ok(consumer.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_line(content: &str) -> String {
        format!(
            r#"data: {{"choices":[{{"delta":{{"content":{}}}}}]}}"#,
            serde_json::to_string(content).unwrap()
        )
    }

    #[test]
    fn parses_content_deltas() {
        match parse_sse_line(&delta_line("Hello")) {
            StreamEvent::Delta(d) => assert_eq!(d, "Hello"),
            _ => panic!("expected delta"),
        }
    }

    #[test]
    fn recognizes_done_sentinel() {
        assert!(matches!(parse_sse_line("data: [DONE]"), StreamEvent::Done));
    }

    #[test]
    fn ignores_non_data_and_malformed_lines() {
        assert!(matches!(parse_sse_line(""), StreamEvent::Ignore));
        assert!(matches!(parse_sse_line(": keepalive"), StreamEvent::Ignore));
        assert!(matches!(
            parse_sse_line("data: {not json"),
            StreamEvent::Ignore
        ));
        assert!(matches!(
            parse_sse_line(r#"data: {"choices":[]}"#),
            StreamEvent::Ignore
        ));
    }

    #[test]
    fn consumer_emits_segments_and_accumulates_reply() {
        let mut emitted = Vec::new();
        let cancel = TurnCancellation::new();
        let mut consumer = TurnConsumer::new(cancel, |s: &str| emitted.push(s.to_string()));
        for part in ["Hello", " world.", " How are", " you?"] {
            assert!(consumer.feed_line(&delta_line(part)));
        }
        assert!(!consumer.feed_line("data: [DONE]"));
        let reply = consumer.finish();
        assert_eq!(emitted, vec!["Hello world.", "How are you?"]);
        assert_eq!(reply, "Hello world. How are you?");
    }

    #[test]
    fn consumer_flushes_unterminated_remainder_on_finish() {
        let mut emitted = Vec::new();
        let cancel = TurnCancellation::new();
        let mut consumer = TurnConsumer::new(cancel, |s: &str| emitted.push(s.to_string()));
        consumer.feed_line(&delta_line("Partial thought"));
        let reply = consumer.finish();
        assert_eq!(emitted, vec!["Partial thought"]);
        assert_eq!(reply, "Partial thought");
    }

    #[test]
    fn cancellation_stops_all_further_segments() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let deltas: Vec<String> = (0..8).map(|i| delta_line(&format!("s{i}. "))).collect();
        let cancel = TurnCancellation::new();
        let emitted = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&emitted);
        let mut consumer =
            TurnConsumer::new(cancel.clone(), move |s: &str| sink.borrow_mut().push(s.to_string()));
        for (i, line) in deltas.iter().enumerate() {
            if i == 3 {
                cancel.raise();
            }
            if !consumer.feed_line(line) {
                break;
            }
        }
        let emitted_before = emitted.borrow().len();
        assert_eq!(emitted_before, 3);
        consumer.finish();
        assert_eq!(emitted.borrow().len(), emitted_before, "no segments after cancel");
    }

    #[test]
    fn line_buffer_splits_across_chunk_boundaries() {
        let mut lines = LineBuffer::new();
        assert!(lines.push(b"data: ").is_empty());
        assert_eq!(lines.push(b"[DONE]\ntail"), vec!["data: [DONE]"]);
        assert_eq!(lines.remainder(), Some("tail".to_string()));
    }

    #[test]
    fn unterminated_final_data_line_is_not_lost() {
        // Stream close without a trailing newline: the buffered line still
        // reaches the consumer.
        let mut lines = LineBuffer::new();
        assert!(lines.push(delta_line("It is noon.").as_bytes()).is_empty());

        let mut emitted = Vec::new();
        let cancel = TurnCancellation::new();
        let mut consumer = TurnConsumer::new(cancel, |s: &str| emitted.push(s.to_string()));
        if let Some(line) = lines.remainder() {
            consumer.feed_line(&line);
        }
        let reply = consumer.finish();
        assert_eq!(emitted, vec!["It is noon."]);
        assert_eq!(reply, "It is noon.");
    }

    #[test]
    fn request_body_shape() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "assistant:main",
            messages: &messages,
            stream: true,
            user: CALLER_ID,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "assistant:main");
        assert_eq!(json["stream"], true);
        assert_eq!(json["user"], "voice-node");
        assert_eq!(json["messages"][1]["role"], "user");
    }
}
