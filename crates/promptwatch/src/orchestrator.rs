//! Wires the stages to their topics and runs the watch loop.
//!
//! | Topic | Listener |
//! |-------|----------|
//! | `print` | [`Printer`] |
//! | `chain` | [`PromptProcessor`] |
//! | `record` | [`Recorder`] |
//! | `ask` | [`ChatEngine`] |
//! | `summarize` | [`Summarizer`] |
//!
//! Each admitted change runs as its own task so the loop keeps draining
//! file notifications (and the gate keeps dropping them) while a cycle is in
//! flight.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus, EventKind, Topic};
use crate::config::PipelineConfig;
use crate::enrich::Sources;
use crate::gate::{FlowGate, debounce};
use crate::history::ConversationLog;
use crate::model::LanguageModel;
use crate::render::Console;
use crate::stages::{ChatEngine, Printer, PromptProcessor, Recorder, Summarizer};
use crate::watcher::{FileWatcher, read_prompt};

pub struct Orchestrator {
    config: PipelineConfig,
    bus: Arc<EventBus>,
    gate: Arc<FlowGate>,
    log: Arc<ConversationLog>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        model: Arc<dyn LanguageModel>,
        sources: Arc<dyn Sources>,
        log: Arc<ConversationLog>,
        console: Arc<Console>,
    ) -> Self {
        let gate = Arc::new(FlowGate::new(config.filter_duplicates));

        let mut engine = ChatEngine::new(Arc::clone(&model), Arc::clone(&console))
            .with_username(config.username.clone())
            .with_examples(config.examples.clone())
            .with_streaming(config.enable_stream)
            .with_response_timeout(config.response_timeout);
        if let Some(template) = &config.template {
            engine = engine.with_template(template.clone());
        }
        let recorder = Recorder::new(Arc::clone(&log), Arc::clone(&gate))
            .with_summarize_every(config.summarize_every);

        let bus = EventBus::builder()
            .subscribe(Topic::Print, Arc::new(Printer::new(console)))
            .subscribe(Topic::Chain, Arc::new(PromptProcessor::new(sources)))
            .subscribe(Topic::Record, Arc::new(recorder))
            .subscribe(Topic::Ask, Arc::new(engine))
            .subscribe(Topic::Summarize, Arc::new(Summarizer::new(model)))
            .build();
        for topic in Topic::ALL {
            debug!("Topic {topic}: {} listener(s)", bus.listener_count(topic));
        }

        Self {
            config,
            bus: Arc::new(bus),
            gate,
            log,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn gate(&self) -> &FlowGate {
        &self.gate
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Start a cycle for `content` if the gate admits it. The returned task
    /// finishes when every stage of the cycle has run.
    pub fn trigger(&self, content: String) -> Option<JoinHandle<()>> {
        if !self.gate.try_admit(&content) {
            return None;
        }
        self.gate.block();

        let bus = Arc::clone(&self.bus);
        let gate = Arc::clone(&self.gate);
        let event = Event::plain(EventKind::HumanRawMessage, self.config.username.clone(), content);
        info!("New prompt #{} ({} chars)", event.seq(), event.contents().text().len());

        Some(tokio::spawn(async move {
            bus.publish(&[Topic::Record], &event).await;
            if gate.is_blocked() {
                warn!(
                    "Cycle for prompt #{} ended without releasing the gate; releasing it",
                    event.seq()
                );
                gate.unblock();
            }
        }))
    }

    /// Watch the prompt file until the watcher stops.
    pub async fn run(&self) -> Result<(), String> {
        let (watcher, mut changes) = FileWatcher::start(&self.config.prompt_file)?;
        info!(
            "Watching {} (session {})",
            watcher.path().display(),
            self.log.session_id()
        );

        while debounce(&mut changes, self.config.debounce).await.is_some() {
            let body = match read_prompt(watcher.path()).await {
                Ok(body) => body,
                Err(e) => {
                    warn!("{e}");
                    continue;
                }
            };
            if body.trim().is_empty() {
                debug!("Prompt file is blank; ignored");
                continue;
            }
            if self.trigger(body).is_none() {
                debug!("Change not admitted");
            }
        }
        Err(format!(
            "Watcher for {} stopped",
            self.config.prompt_file.display()
        ))
    }
}
