//! In-crate fakes for listener, model, source, and render sink tests.

use std::sync::{Arc, Mutex};

use futures::stream;

use crate::bus::{Event, EventBus, EventKind, Listener, ListenerFuture};
use crate::enrich::{SearchHit, SourceFuture, Sources};
use crate::model::{FragmentStream, LanguageModel, ModelFuture};
use crate::render::{Block, RenderSink};

// ── Listener ───────────────────────────────────────────────────────

pub(crate) type SharedLog = Arc<Mutex<Vec<String>>>;

/// Records every event it receives; optionally fails each delivery.
pub(crate) struct RecordingListener {
    name: String,
    order: SharedLog,
    seen: Mutex<Vec<(EventKind, String)>>,
    events: Mutex<Vec<Event>>,
    fail: bool,
}

impl RecordingListener {
    pub(crate) fn shared_log() -> SharedLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub(crate) fn new(name: &str) -> Arc<Self> {
        Self::build(name, &Self::shared_log(), false)
    }

    pub(crate) fn with_log(name: &str, order: &SharedLog) -> Arc<Self> {
        Self::build(name, order, false)
    }

    pub(crate) fn failing(name: &str) -> Arc<Self> {
        Self::build(name, &Self::shared_log(), true)
    }

    fn build(name: &str, order: &SharedLog, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            order: Arc::clone(order),
            seen: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            fail,
        })
    }

    pub(crate) fn seen(&self) -> Vec<(EventKind, String)> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Listener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn listen<'a>(&'a self, event: &'a Event, _bus: &'a EventBus) -> ListenerFuture<'a> {
        Box::pin(async move {
            self.order.lock().unwrap().push(self.name.clone());
            self.seen
                .lock()
                .unwrap()
                .push((event.kind(), event.contents().text().to_string()));
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                Err(format!("{} refused the event", self.name))
            } else {
                Ok(())
            }
        })
    }
}

// ── Model ──────────────────────────────────────────────────────────

type Reply = Box<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

/// A model whose answer is computed from the prompt. Streams split the
/// answer into fixed-size character chunks.
pub(crate) struct ScriptedModel {
    name: String,
    reply: Reply,
    chunk: usize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub(crate) fn new(
        name: &str,
        reply: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            reply: Box::new(reply),
            chunk: 4,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn answering(name: &str, answer: &str) -> Self {
        let answer = answer.to_string();
        Self::new(name, move |_| Ok(answer.clone()))
    }

    pub(crate) fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&'a self, prompt: &'a str) -> ModelFuture<'a, String> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(prompt.to_string());
            (self.reply)(prompt)
        })
    }

    fn stream<'a>(&'a self, prompt: &'a str) -> ModelFuture<'a, FragmentStream> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let answer = (self.reply)(prompt)?;
            let chars: Vec<char> = answer.chars().collect();
            let fragments: Vec<Result<String, String>> = chars
                .chunks(self.chunk)
                .map(|c| Ok(c.iter().collect()))
                .collect();
            Ok(Box::pin(stream::iter(fragments)) as FragmentStream)
        })
    }
}

// ── Sources ────────────────────────────────────────────────────────

/// Deterministic enrichment sources.
#[derive(Default)]
pub(crate) struct FakeSources {
    pub(crate) pages: Vec<(String, String)>,
    pub(crate) files: Vec<(String, String)>,
    pub(crate) hits: Vec<SearchHit>,
    pub(crate) answer: Option<String>,
}

impl Sources for FakeSources {
    fn fetch_url<'a>(&'a self, url: &'a str) -> SourceFuture<'a, String> {
        Box::pin(async move {
            self.pages
                .iter()
                .find(|(u, _)| u == url)
                .map(|(_, html)| html.clone())
                .ok_or_else(|| format!("HTTP 404 for {url}"))
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> SourceFuture<'a, String> {
        Box::pin(async move {
            self.files
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, body)| body.clone())
                .ok_or_else(|| format!("No such file: {path}"))
        })
    }

    fn search<'a>(&'a self, _query: &'a str) -> SourceFuture<'a, Vec<SearchHit>> {
        Box::pin(async move { Ok(self.hits.clone()) })
    }

    fn run<'a>(&'a self, argv: &'a [String]) -> SourceFuture<'a, String> {
        Box::pin(async move {
            match argv.first().map(String::as_str) {
                Some("echo") => Ok(format!("{}\n", argv.get(1..).unwrap_or(&[]).join(" "))),
                Some(other) => Err(format!("{other}: command not found")),
                None => Err("empty command".to_string()),
            }
        })
    }

    fn ask<'a>(&'a self, question: &'a str) -> SourceFuture<'a, String> {
        Box::pin(async move {
            self.answer
                .clone()
                .ok_or_else(|| format!("no answer for {question}"))
        })
    }

    fn ask_label(&self) -> &str {
        "oracle"
    }
}

// ── Render sink ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RenderEvent {
    Flush(Block),
    Continuation(char),
    Spinner(String),
}

/// Sink that stores every call. Clones share the same event list.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingSink {
    events: Arc<Mutex<Vec<RenderEvent>>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<RenderEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Only the flushed blocks, in order.
    pub(crate) fn blocks(&self) -> Vec<Block> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RenderEvent::Flush(block) => Some(block),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: RenderEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl RenderSink for RecordingSink {
    fn flush(&mut self, block: &Block) {
        self.push(RenderEvent::Flush(block.clone()));
    }

    fn continuation(&mut self, ch: char) {
        self.push(RenderEvent::Continuation(ch));
    }

    fn spinner(&mut self, frame: &str) {
        self.push(RenderEvent::Spinner(frame.to_string()));
    }
}
