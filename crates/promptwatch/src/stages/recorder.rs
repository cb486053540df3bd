//! History bookkeeping and the hub of the pipeline.
//!
//! | Event | Appended to | Then |
//! |-------|-------------|------|
//! | `human_raw_message` | `unprocessed` | same event → `print`, `chain` |
//! | `human_processed_message` | `processed` | `chat` → `ask` |
//! | `ai_message` | `unprocessed`, `processed` | `chat_summary` → `summarize` every N AI turns, else release the gate |
//! | `chat_summary` | `summarized` | release the gate |

use std::sync::Arc;

use tracing::{debug, info};

use crate::bus::{Content, Event, EventBus, EventKind, Listener, ListenerFuture, PromptBundle, Topic};
use crate::gate::FlowGate;
use crate::history::{ConversationLog, LogStream, Record, Role};

use super::unexpected;

pub const DEFAULT_SUMMARIZE_EVERY: usize = 16;

pub struct Recorder {
    log: Arc<ConversationLog>,
    gate: Arc<FlowGate>,
    summarize_every: usize,
}

impl Recorder {
    pub fn new(log: Arc<ConversationLog>, gate: Arc<FlowGate>) -> Self {
        Self {
            log,
            gate,
            summarize_every: DEFAULT_SUMMARIZE_EVERY,
        }
    }

    /// Summarize after every `n` AI turns (at least 1).
    pub fn with_summarize_every(mut self, n: usize) -> Self {
        self.summarize_every = n.max(1);
        self
    }

    fn latest_summary(&self) -> Option<String> {
        self.log
            .latest(LogStream::Summarized)
            .map(|r| r.text.clone())
    }

    async fn record_processed(&self, event: &Event, bundle: &PromptBundle, bus: &EventBus) {
        let history = self
            .log
            .last_n(LogStream::Processed, self.summarize_every);
        self.log.append(
            &[LogStream::Processed],
            Record::new(Role::Human, event.author(), &bundle.prompt),
        );

        let request = PromptBundle::new(bundle.prompt.clone())
            .with_context(bundle.context.clone())
            .with_history(history)
            .with_summary(self.latest_summary());
        let chat = Event::bundle(EventKind::Chat, event.author(), request);
        bus.publish(&[Topic::Ask], &chat).await;
    }

    async fn record_reply(&self, event: &Event, text: &str, bus: &EventBus) {
        self.log.append(
            &[LogStream::Unprocessed, LogStream::Processed],
            Record::new(Role::Ai, event.author(), text),
        );

        let turns = self.log.count_role(LogStream::Processed, Role::Ai);
        if turns % self.summarize_every != 0 {
            debug!("AI turn {turns}; next summary at {}", turns.next_multiple_of(self.summarize_every));
            self.gate.unblock();
            return;
        }

        info!("AI turn {turns}: summarizing the last {} turns", self.summarize_every);
        let window = PromptBundle::new(String::new())
            .with_history(self.log.last_n(LogStream::Processed, self.summarize_every))
            .with_summary(self.latest_summary());
        let request = Event::bundle(EventKind::ChatSummary, event.author(), window);
        bus.publish(&[Topic::Summarize], &request).await;
    }
}

impl Listener for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn listen<'a>(&'a self, event: &'a Event, bus: &'a EventBus) -> ListenerFuture<'a> {
        Box::pin(async move {
            match (event.kind(), event.contents()) {
                (EventKind::HumanRawMessage, Content::PlainText(text)) => {
                    self.log.append(
                        &[LogStream::Unprocessed],
                        Record::new(Role::Human, event.author(), text),
                    );
                    bus.publish(&[Topic::Print, Topic::Chain], event).await;
                }
                (EventKind::HumanProcessedMessage, Content::PromptBundle(bundle)) => {
                    self.record_processed(event, bundle, bus).await;
                }
                (EventKind::AiMessage, Content::PlainText(text)) => {
                    self.record_reply(event, text, bus).await;
                }
                (EventKind::ChatSummary, Content::PlainText(text)) => {
                    self.log.append(
                        &[LogStream::Summarized],
                        Record::new(Role::Summary, event.author(), text),
                    );
                    self.gate.unblock();
                }
                (kind, contents) => return Err(unexpected(self.name(), kind, contents)),
            }
            Ok(())
        })
    }
}
