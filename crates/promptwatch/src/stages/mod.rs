//! Pipeline stages. Each one is a [`Listener`](crate::bus::Listener) bound to
//! a single topic by the orchestrator.
//!
//! | Stage | Topic | Accepts | Publishes |
//! |-------|-------|---------|-----------|
//! | [`Printer`] | `print` | `human_raw_message` | nothing |
//! | [`PromptProcessor`] | `chain` | `human_raw_message` | `human_processed_message` → `record` |
//! | [`Recorder`] | `record` | every kind except `chat` | `print`/`chain`, `ask`, `summarize` |
//! | [`ChatEngine`] | `ask` | `chat` | `ai_message` → `record` |
//! | [`Summarizer`] | `summarize` | `chat_summary` (bundle) | `chat_summary` → `record` |

pub mod chat;
pub mod printer;
pub mod processor;
pub mod recorder;
pub mod summarizer;

pub use chat::{ChatEngine, Reply};
pub use printer::Printer;
pub use processor::PromptProcessor;
pub use recorder::Recorder;
pub use summarizer::Summarizer;

use crate::bus::{Content, EventKind};
use crate::history::Record;

/// Render turns as `[role] author: text` lines.
pub fn format_history(records: &[Record]) -> String {
    records
        .iter()
        .map(|r| format!("[{}] {}: {}", r.role, r.author, r.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Error for an event a stage cannot handle.
pub(crate) fn unexpected(stage: &str, kind: EventKind, contents: &Content) -> String {
    format!("{stage} cannot handle {kind} with {}", contents.variant_name())
}
