//! Convenience re-exports for wiring a pipeline.
//!
//! ```ignore
//! use promptwatch::prelude::*;
//! ```

// ── Core types ──────────────────────────────────────────────────────
pub use crate::api::retry::RetryConfig;
pub use crate::bus::{Content, Event, EventBus, EventKind, Listener, PromptBundle, Topic};
pub use crate::config::PipelineConfig;
pub use crate::gate::FlowGate;
pub use crate::model::{FragmentStream, LanguageModel};
pub use crate::{ChatClient, Message};

// ── Pipeline ────────────────────────────────────────────────────────
pub use crate::enrich::{LiveSources, Sources};
pub use crate::history::{ConversationLog, JsonlStore, LogStream, MemoryStore, MessageStore, Record, Role};
pub use crate::orchestrator::Orchestrator;
pub use crate::render::{Block, Console, RenderSink, StreamRenderer};
pub use crate::stages::{ChatEngine, PromptProcessor, Recorder, Summarizer};

// ── Logging ─────────────────────────────────────────────────────────
pub use crate::logging::{ConsoleLogLayer, parse_level};
