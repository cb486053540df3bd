//! Rolling conversation summary.
//!
//! Each run folds a window of recent turns into the previous summary with a
//! single non-streaming model call. The summarizer keeps no state: the
//! window and the prior summary arrive in the request bundle.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::{Content, Event, EventBus, EventKind, Listener, ListenerFuture, Topic};
use crate::history::Record;
use crate::model::LanguageModel;

use super::{format_history, unexpected};

const SUMMARIZATION_PROMPT: &str = "\
Distill the chat messages below into a single summary message.
Include as many specific details as you can, and avoid adding details.";

const MERGE_PROMPT: &str = "\
An existing summary is included. Merge the new messages into it and do not drop \
concepts from the existing summary. The result replaces the existing summary.";

/// Build the model input for one summarization run.
pub fn build_summarization_prompt(window: &[Record], prior: Option<&str>) -> String {
    let mut prompt = String::from(SUMMARIZATION_PROMPT);
    if let Some(existing) = prior {
        prompt.push('\n');
        prompt.push_str(MERGE_PROMPT);
        prompt.push_str("\n\n=== EXISTING SUMMARY ===\n");
        prompt.push_str(existing);
    }
    prompt.push_str("\n\n=== NEW MESSAGES TO SUMMARIZE ===\n");
    prompt.push_str(&format_history(window));
    prompt
}

pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn summarize(&self, window: &[Record], prior: Option<&str>) -> Result<String, String> {
        let prompt = build_summarization_prompt(window, prior);
        debug!("Summarization input: {} turns, {} chars", window.len(), prompt.len());
        let summary = self.model.invoke(&prompt).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(format!("{} returned an empty summary", self.model.name()));
        }
        Ok(summary.to_string())
    }
}

impl Listener for Summarizer {
    fn name(&self) -> &str {
        "summarizer"
    }

    fn listen<'a>(&'a self, event: &'a Event, bus: &'a EventBus) -> ListenerFuture<'a> {
        Box::pin(async move {
            let request = match (event.kind(), event.contents()) {
                (EventKind::ChatSummary, Content::PromptBundle(bundle)) => bundle,
                (kind, contents) => return Err(unexpected(self.name(), kind, contents)),
            };

            info!("Summarizing {} turns", request.history.len());
            let prior = request.summarized_history.as_deref();
            let summary = match self.summarize(&request.history, prior).await {
                Ok(summary) => summary,
                Err(e) => match prior {
                    Some(existing) => {
                        warn!("Summarization failed, keeping the previous summary: {e}");
                        existing.to_string()
                    }
                    None => return Err(format!("summarization failed: {e}")),
                },
            };

            let result = Event::plain(EventKind::ChatSummary, self.model.name(), summary);
            bus.publish(&[Topic::Record], &result).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::PromptBundle;
    use crate::history::Role;
    use crate::testing::{RecordingListener, ScriptedModel};

    fn window() -> Vec<Record> {
        vec![
            Record::new(Role::Human, "ana", "I use neovim"),
            Record::new(Role::Ai, "llama", "Noted."),
        ]
    }

    #[test]
    fn prompt_without_a_prior_summary() {
        let prompt = build_summarization_prompt(&window(), None);
        assert!(prompt.starts_with("Distill the chat messages"));
        assert!(!prompt.contains("EXISTING SUMMARY"));
        assert!(prompt.ends_with("[human] ana: I use neovim\n[ai] llama: Noted."));
    }

    #[test]
    fn prompt_with_a_prior_summary_asks_to_merge() {
        let prompt = build_summarization_prompt(&window(), Some("ana likes vim"));
        assert!(prompt.contains("do not drop concepts"));
        assert!(prompt.contains("=== EXISTING SUMMARY ===\nana likes vim"));
        let existing = prompt.find("EXISTING").unwrap();
        let new = prompt.find("NEW MESSAGES").unwrap();
        assert!(existing < new);
    }

    fn bus_with_record() -> (EventBus, Arc<RecordingListener>) {
        let record = RecordingListener::new("record");
        let bus = EventBus::builder()
            .subscribe(Topic::Record, record.clone())
            .build();
        (bus, record)
    }

    fn request(prior: Option<&str>) -> Event {
        let bundle = PromptBundle::new("")
            .with_history(window())
            .with_summary(prior.map(str::to_string));
        Event::bundle(EventKind::ChatSummary, "ana", bundle)
    }

    #[tokio::test]
    async fn publishes_the_new_summary() {
        let model = Arc::new(ScriptedModel::answering("llama", "  ana uses neovim.\n"));
        let summarizer = Summarizer::new(model.clone());
        let (bus, record) = bus_with_record();

        summarizer.listen(&request(None), &bus).await.unwrap();

        assert_eq!(
            record.seen(),
            vec![(EventKind::ChatSummary, "ana uses neovim.".to_string())]
        );
        assert_eq!(record.events()[0].author(), "llama");
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_the_prior_summary() {
        let model = Arc::new(ScriptedModel::new("llama", |_| Err("HTTP 500".into())));
        let summarizer = Summarizer::new(model);
        let (bus, record) = bus_with_record();

        summarizer
            .listen(&request(Some("ana likes vim")), &bus)
            .await
            .unwrap();
        assert_eq!(
            record.seen(),
            vec![(EventKind::ChatSummary, "ana likes vim".to_string())]
        );
    }

    #[tokio::test]
    async fn failure_without_a_prior_summary_is_reported() {
        let model = Arc::new(ScriptedModel::answering("llama", "   "));
        let summarizer = Summarizer::new(model);
        let (bus, record) = bus_with_record();

        let err = summarizer.listen(&request(None), &bus).await.unwrap_err();
        assert!(err.contains("empty summary"));
        assert!(record.events().is_empty());
    }
}
