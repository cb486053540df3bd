//! Immutable pipeline events and the closed [`Content`] union they carry.
//!
//! Every [`Event`] receives a process-wide monotonic sequence number when it
//! is constructed. The bus deduplicates deliveries on `(topic, seq)`, so two
//! distinct events built within the same clock tick never collapse into one,
//! while a clone of an event (same `seq`) is still recognised as the same
//! instance.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};

use crate::history::Record;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

// ── Kinds and topics ───────────────────────────────────────────────

/// What an event means to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The watched file changed; body is the raw file content.
    HumanRawMessage,
    /// The prompt after tag substitution.
    HumanProcessedMessage,
    /// A request for the chat engine, carrying history and summary.
    Chat,
    /// A model reply (or a synthetic reply describing a model failure).
    AiMessage,
    /// A summarization request (bundle) or its result (plain text).
    ChatSummary,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::HumanRawMessage => "human_raw_message",
            EventKind::HumanProcessedMessage => "human_processed_message",
            EventKind::Chat => "chat",
            EventKind::AiMessage => "ai_message",
            EventKind::ChatSummary => "chat_summary",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named channel on the [`EventBus`](super::EventBus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Ask,
    Chain,
    Print,
    Record,
    Summarize,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Ask,
        Topic::Chain,
        Topic::Print,
        Topic::Record,
        Topic::Summarize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Ask => "ask",
            Topic::Chain => "chain",
            Topic::Print => "print",
            Topic::Record => "record",
            Topic::Summarize => "summarize",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Content ────────────────────────────────────────────────────────

/// A prompt together with everything the model needs to answer it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptBundle {
    pub prompt: String,
    pub context: Option<String>,
    /// Prior turns, oldest first. Empty when there is no history.
    pub history: Vec<Record>,
    pub summarized_history: Option<String>,
}

impl PromptBundle {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_history(mut self, history: Vec<Record>) -> Self {
        self.history = history;
        self
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summarized_history = summary;
        self
    }
}

/// Event payload. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    PlainText(String),
    PromptBundle(PromptBundle),
}

impl Content {
    /// The human-readable text of the payload: the text itself, or the
    /// bundle's prompt.
    pub fn text(&self) -> &str {
        match self {
            Content::PlainText(text) => text,
            Content::PromptBundle(bundle) => &bundle.prompt,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Content::PlainText(_) => "plain text",
            Content::PromptBundle(_) => "prompt bundle",
        }
    }
}

// ── Event ──────────────────────────────────────────────────────────

/// An immutable message travelling through the bus.
#[derive(Debug, Clone)]
pub struct Event {
    seq: u64,
    kind: EventKind,
    author: String,
    contents: Content,
    created_at: DateTime<Local>,
}

impl Event {
    pub fn new(kind: EventKind, author: impl Into<String>, contents: Content) -> Self {
        Self {
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            kind,
            author: author.into(),
            contents,
            created_at: Local::now(),
        }
    }

    /// Shorthand for an event carrying [`Content::PlainText`].
    pub fn plain(kind: EventKind, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(kind, author, Content::PlainText(text.into()))
    }

    /// Shorthand for an event carrying [`Content::PromptBundle`].
    pub fn bundle(kind: EventKind, author: impl Into<String>, bundle: PromptBundle) -> Self {
        Self::new(kind, author, Content::PromptBundle(bundle))
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn contents(&self) -> &Content {
        &self.contents
    }

    pub fn created_at(&self) -> &DateTime<Local> {
        &self.created_at
    }

    pub fn dedup_key(&self, topic: Topic) -> DedupKey {
        DedupKey {
            topic,
            seq: self.seq,
        }
    }
}

/// Identifies one delivery of one event instance to one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub topic: Topic,
    pub seq: u64,
}
