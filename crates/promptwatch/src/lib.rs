//! File-driven LLM chat pipeline.
//!
//! `promptwatch` watches a single prompt file. Every time the file is saved,
//! its contents become the next human turn of a conversation: inline tags
//! are expanded (web pages, files, searches, command output, answers from a
//! secondary model), the prompt is recorded, sent to a chat model together
//! with recent history and a rolling summary, and the reply is rendered to
//! the terminal as it streams in.
//!
//! # Pipeline
//!
//! Stages communicate only through the [`EventBus`](bus::EventBus). Each
//! saved prompt travels one path:
//!
//! ```text
//! save ─▶ record ─▶ print, chain ─▶ record ─▶ ask ─▶ record ─▶ summarize ─▶ record
//!        (raw)      (echo, enrich)  (bundle)  (LLM)  (reply)   (every N)    (summary)
//! ```
//!
//! A [`FlowGate`](gate::FlowGate) admits one prompt at a time: it closes when
//! a prompt is triggered and reopens once the reply (and, when due, the new
//! summary) has been recorded.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bus`] | [`Event`](bus::Event), [`Topic`](bus::Topic), listener dispatch with per-topic dedup |
//! | [`gate`] | [`FlowGate`](gate::FlowGate) and save debouncing |
//! | [`watcher`] | Prompt-file change notifications |
//! | [`enrich`] | Tag expansion chain and its [`Sources`](enrich::Sources) |
//! | [`history`] | Append-only [`ConversationLog`](history::ConversationLog) and stores |
//! | [`model`] | [`LanguageModel`](model::LanguageModel) seam |
//! | [`api`] | SSE streaming and retry for [`ChatClient`] |
//! | [`render`] | Incremental markdown [`StreamRenderer`](render::StreamRenderer) |
//! | [`stages`] | Printer, processor, chat engine, recorder, summarizer listeners |
//! | [`orchestrator`] | Wiring, gating, and the watch loop |
//! | [`config`] | [`PipelineConfig`](config::PipelineConfig) |
//! | [`logging`] | Console `tracing` layer |

pub mod api;
pub mod bus;
pub mod config;
pub mod enrich;
pub mod gate;
pub mod history;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod prelude;
pub mod render;
pub mod stages;
pub mod watcher;

#[cfg(test)]
mod testing;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use api::retry::{RetryConfig, retry};

/// Local Ollama's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message sent to the model.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ApiErrorResponse {
    pub(crate) message: String,
}

/// Result of [`ChatClient::chat`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async client for any OpenAI-compatible `/chat/completions` endpoint
/// (Ollama, OpenAI, Perplexity, OpenRouter, ...).
pub struct ChatClient {
    pub(crate) client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    retry: RetryConfig,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("promptwatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
            retry: RetryConfig::default(),
        })
    }

    /// Bearer token. Local servers usually need none.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }

    /// Single-turn request for `prompt`, preceded by the system prompt if set.
    pub fn request_for(&self, prompt: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={:?}, temp={:?}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .authorize(self.client.post(self.endpoint()))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("Model API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;
        if let Some(err) = parsed.error {
            return Err(format!("Model API error: {}", err.message));
        }
        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        Ok(match choice {
            Some(c) => ChatCompletion {
                content: c.message.content,
                usage: parsed.usage,
                finish_reason: c.finish_reason,
            },
            None => ChatCompletion {
                content: None,
                usage: parsed.usage,
                finish_reason: None,
            },
        })
    }

    /// One-shot completion with retry on transient failures.
    pub async fn complete(&self, prompt: &str) -> Result<String, String> {
        let body = self.request_for(prompt);
        let completion = retry(&self.retry, "chat completion", || self.chat(&body)).await?;
        completion
            .content
            .ok_or_else(|| format!("{} returned an empty response", self.model))
    }

    /// Streaming completion. Only opening the stream is retried.
    pub async fn complete_stream(&self, prompt: &str) -> Result<model::FragmentStream, String> {
        let body = self.request_for(prompt);
        retry(&self.retry, "streaming chat completion", || {
            self.chat_stream(&body)
        })
        .await
    }
}
