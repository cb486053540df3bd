//! Runs the enrichment chain over a raw human turn.

use std::sync::Arc;

use tracing::debug;

use crate::bus::{Content, Event, EventBus, EventKind, Listener, ListenerFuture, PromptBundle, Topic};
use crate::enrich::{self, Sources};

use super::unexpected;

pub struct PromptProcessor {
    sources: Arc<dyn Sources>,
}

impl PromptProcessor {
    pub fn new(sources: Arc<dyn Sources>) -> Self {
        Self { sources }
    }
}

impl Listener for PromptProcessor {
    fn name(&self) -> &str {
        "prompt_processor"
    }

    fn listen<'a>(&'a self, event: &'a Event, bus: &'a EventBus) -> ListenerFuture<'a> {
        Box::pin(async move {
            let raw = match (event.kind(), event.contents()) {
                (EventKind::HumanRawMessage, Content::PlainText(text)) => text,
                (kind, contents) => return Err(unexpected(self.name(), kind, contents)),
            };

            let processed = enrich::process(raw, self.sources.as_ref()).await;
            debug!(
                "Processed prompt: {} -> {} chars, context: {}",
                raw.len(),
                processed.prompt.len(),
                processed.context.as_deref().unwrap_or("none")
            );

            let bundle = PromptBundle::new(processed.prompt).with_context(processed.context);
            let next = Event::bundle(EventKind::HumanProcessedMessage, event.author(), bundle);
            bus.publish(&[Topic::Record], &next).await;
            Ok(())
        })
    }
}
