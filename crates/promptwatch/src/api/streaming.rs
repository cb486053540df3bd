//! Server-Sent Events streaming for OpenAI-compatible chat completions.
//!
//! [`ChatClient::chat_stream`] returns a pull-based [`FragmentStream`]: the
//! response body is only read when the consumer asks for the next fragment,
//! so a consumer that stops polling (for example on a timeout) stops the
//! download too.

use std::collections::VecDeque;

use futures::stream;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::model::FragmentStream;
use crate::{ApiErrorResponse, ChatClient, ChatRequest, UsageInfo};

/// A single decoded SSE event.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    /// Token usage (usually in the final chunk).
    Usage(UsageInfo),
    Done,
    Error(String),
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageInfo>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

// ── Line decoding ──────────────────────────────────────────────────

/// Splits raw body bytes into SSE lines. Bytes are buffered until a full
/// line arrives, so multi-byte characters split across chunks survive.
#[derive(Default)]
pub struct SseDecoder {
    bytes: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8], events: &mut VecDeque<StreamEvent>) {
        self.bytes.extend_from_slice(chunk);
        while let Some(pos) = self.bytes.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.bytes.drain(..=pos).collect();
            parse_sse_line(&String::from_utf8_lossy(&line), events);
        }
    }

    /// Decode whatever is left once the body ends.
    pub fn finish(&mut self, events: &mut VecDeque<StreamEvent>) {
        let rest = std::mem::take(&mut self.bytes);
        parse_sse_line(&String::from_utf8_lossy(&rest), events);
    }
}

fn parse_sse_line(line: &str, events: &mut VecDeque<StreamEvent>) {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return;
    }
    if line == "data: [DONE]" {
        events.push_back(StreamEvent::Done);
        return;
    }
    if let Some(data) = line.strip_prefix("data:") {
        parse_sse_data(data.trim_start(), events);
    }
}

/// Parse a single SSE `data:` payload.
fn parse_sse_data(data: &str, events: &mut VecDeque<StreamEvent>) {
    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} (data: {data})");
            return;
        }
    };

    if let Some(err) = chunk.error {
        events.push_back(StreamEvent::Error(format!("Model API error: {}", err.message)));
        return;
    }
    if let Some(usage) = chunk.usage {
        events.push_back(StreamEvent::Usage(usage));
    }
    for choice in chunk.choices.unwrap_or_default() {
        if let Some(content) = choice.delta.and_then(|d| d.content)
            && !content.is_empty()
        {
            events.push_back(StreamEvent::TextDelta(content));
        }
        if choice.finish_reason.is_some() {
            trace!("Stream finish_reason: {:?}", choice.finish_reason);
        }
    }
}

// ── Fragment stream ────────────────────────────────────────────────

struct SseState {
    resp: Option<reqwest::Response>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

/// Turn a streaming response into text fragments. Usage events are logged;
/// an error event ends the stream after yielding the error.
fn fragments(resp: reqwest::Response) -> FragmentStream {
    let state = SseState {
        resp: Some(resp),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if let Some(event) = state.pending.pop_front() {
                match event {
                    StreamEvent::TextDelta(text) => return Some((Ok(text), state)),
                    StreamEvent::Usage(usage) => {
                        debug!(
                            "Token usage: prompt={}, completion={}, total={}",
                            usage.prompt_tokens.unwrap_or(0),
                            usage.completion_tokens.unwrap_or(0),
                            usage.total_tokens.unwrap_or(0),
                        );
                    }
                    StreamEvent::Done => state.finished = true,
                    StreamEvent::Error(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
                continue;
            }

            let Some(resp) = state.resp.as_mut() else {
                return None;
            };
            match resp.chunk().await {
                Ok(Some(chunk)) => state.decoder.push(&chunk, &mut state.pending),
                Ok(None) => {
                    state.decoder.finish(&mut state.pending);
                    state.resp = None;
                }
                Err(e) => {
                    state.finished = true;
                    return Some((Err(format!("failed to read streaming chunk: {e}")), state));
                }
            }
        }
    }))
}

impl ChatClient {
    /// Open a streaming chat completion.
    pub async fn chat_stream(&self, body: &ChatRequest) -> Result<FragmentStream, String> {
        let mut stream_body =
            serde_json::to_value(body).map_err(|e| format!("failed to serialize request: {e}"))?;
        stream_body["stream"] = serde_json::Value::Bool(true);

        debug!("Sending streaming chat request to {}", self.endpoint());

        let resp = self
            .authorize(self.client.post(self.endpoint()))
            .json(&stream_body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("Model API HTTP {status}: {text}"));
        }

        Ok(fragments(resp))
    }
}
