//! Chat engine: renders the model input from a template, queries the model,
//! and streams the reply through the shared console.
//!
//! Some local models repeat their input before answering. In streaming mode
//! the reply is passed through an [`EchoStripper`] that swallows a verbatim
//! copy of the rendered prompt at the start of the stream. Text that only
//! looks like the start of the prompt is held back, and released unchanged
//! as soon as the reply diverges from it.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::Local;
use futures::{StreamExt, stream};
use regex::{Captures, Regex};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::bus::{Content, Event, EventBus, EventKind, Listener, ListenerFuture, PromptBundle, Topic};
use crate::model::{FragmentStream, LanguageModel};
use crate::render::Console;

use super::{format_history, unexpected};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_TEMPLATE: &str = "\
You are {{model_name}}, a helpful assistant talking with {{username}}.
{{examples}}
Summary of the conversation so far:
{{summarized_history}}

Most recent messages:
{{history}}

Sources gathered for this message:
{{context}}

{{username}}: {{query}}";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("hardcoded regex"));

/// Substitute `{{name}}` placeholders in one pass. Unknown names render
/// empty and substituted values are never expanded again.
pub fn render_template(template: &str, values: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

// ── Echo stripping ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EchoState {
    /// Every fragment so far is a prefix of the prompt.
    Matching,
    /// The whole prompt was echoed; nothing has been shown yet.
    Echoed,
    Passing,
}

/// Drop one artifact newline at the start of a reply.
fn trim_artifact(text: &str) -> &str {
    text.strip_prefix('\n').unwrap_or(text)
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

/// Removes a leading verbatim echo of the prompt from a fragment sequence.
#[derive(Debug)]
pub struct EchoStripper {
    remaining: String,
    /// Fragments matched so far, as received.
    held: String,
    state: EchoState,
}

impl EchoStripper {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            remaining: prompt.into(),
            held: String::new(),
            state: EchoState::Matching,
        }
    }

    /// The part of `fragment` to show, if any.
    pub fn feed(&mut self, fragment: &str) -> Option<String> {
        match self.state {
            EchoState::Passing => non_empty(fragment),
            EchoState::Echoed if fragment.is_empty() => None,
            EchoState::Echoed => {
                self.state = EchoState::Passing;
                non_empty(trim_artifact(fragment))
            }
            EchoState::Matching => self.match_fragment(fragment),
        }
    }

    fn match_fragment(&mut self, fragment: &str) -> Option<String> {
        let candidate = if self.held.is_empty() {
            trim_artifact(fragment)
        } else {
            fragment
        };

        if self.remaining.starts_with(candidate) {
            self.remaining.drain(..candidate.len());
            self.held.push_str(fragment);
            if self.remaining.is_empty() {
                debug!("Echo of the prompt stripped ({} bytes)", self.held.len());
                self.held.clear();
                self.state = EchoState::Echoed;
            }
            return None;
        }

        self.state = EchoState::Passing;
        if let Some(rest) = candidate.strip_prefix(self.remaining.as_str()) {
            debug!("Echo of the prompt stripped; reply follows in the same fragment");
            self.held.clear();
            self.remaining.clear();
            return non_empty(trim_artifact(rest));
        }

        let mut out = std::mem::take(&mut self.held);
        out.push_str(fragment);
        non_empty(trim_artifact(&out))
    }

    /// Release text still held back when the stream ends. A reply that is
    /// a strict prefix of the prompt is shown as is.
    pub fn finish(&mut self) -> Option<String> {
        if self.state != EchoState::Matching {
            return None;
        }
        self.state = EchoState::Passing;
        let held = std::mem::take(&mut self.held);
        non_empty(trim_artifact(&held))
    }
}

/// Wrap `fragments` so a leading echo of `prompt` is dropped.
pub fn strip_echo(fragments: FragmentStream, prompt: String) -> FragmentStream {
    let mut stripper = EchoStripper::new(prompt);
    Box::pin(
        fragments
            .map(Some)
            .chain(stream::iter([None]))
            .flat_map(move |item| {
                let out: Vec<Result<String, String>> = match item {
                    Some(Ok(fragment)) => stripper.feed(&fragment).map(Ok).into_iter().collect(),
                    Some(Err(e)) => stripper.finish().map(Ok).into_iter().chain([Err(e)]).collect(),
                    None => stripper.finish().map(Ok).into_iter().collect(),
                };
                stream::iter(out)
            }),
    )
}

// ── Engine ─────────────────────────────────────────────────────────

/// A model reply, streamed or whole.
pub enum Reply {
    Stream(FragmentStream),
    Text(String),
}

pub struct ChatEngine {
    model: Arc<dyn LanguageModel>,
    console: Arc<Console>,
    template: String,
    username: String,
    examples: Option<String>,
    enable_stream: bool,
    response_timeout: Duration,
}

impl ChatEngine {
    pub fn new(model: Arc<dyn LanguageModel>, console: Arc<Console>) -> Self {
        Self {
            model,
            console,
            template: DEFAULT_TEMPLATE.to_string(),
            username: "human".to_string(),
            examples: None,
            enable_stream: false,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Example exchanges inserted at `{{examples}}`.
    pub fn with_examples(mut self, examples: Option<String>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.enable_stream = enabled;
        self
    }

    /// Budget for draining a streamed reply.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn render_prompt(&self, bundle: &PromptBundle) -> String {
        let values = HashMap::from([
            ("username", self.username.clone()),
            ("model_name", self.model.name().to_string()),
            ("query", bundle.prompt.clone()),
            ("context", bundle.context.clone().unwrap_or_default()),
            ("examples", self.examples.clone().unwrap_or_default()),
            ("history", format_history(&bundle.history)),
            (
                "summarized_history",
                bundle.summarized_history.clone().unwrap_or_default(),
            ),
        ]);
        render_template(&self.template, &values)
    }

    /// Query the model for `bundle`.
    pub async fn respond(&self, bundle: &PromptBundle) -> Result<Reply, String> {
        let prompt = self.render_prompt(bundle);
        debug!("Model input ({} chars):\n{prompt}", prompt.len());
        if self.enable_stream {
            let stream = self.model.stream(&prompt).await?;
            Ok(Reply::Stream(strip_echo(stream, prompt)))
        } else {
            Ok(Reply::Text(self.model.invoke(&prompt).await?))
        }
    }

    /// Print a titled reply and return its full text. Failures become the
    /// reply text.
    pub async fn converse(&self, bundle: &PromptBundle) -> String {
        self.console.title(self.model.name(), &Local::now());
        let text = match self.respond(bundle).await {
            Ok(Reply::Text(text)) => {
                self.console.write(&text);
                text
            }
            Ok(Reply::Stream(stream)) => self.drain(stream).await,
            Err(e) => {
                warn!("Model {} failed: {e}", self.model.name());
                let text = format!("**Error:** the model call failed: {e}");
                self.console.write(&text);
                text
            }
        };
        self.console.finish();
        text
    }

    async fn drain(&self, mut stream: FragmentStream) -> String {
        let deadline = Instant::now() + self.response_timeout;
        let mut reply = String::new();
        loop {
            match timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(fragment))) => {
                    self.console.write(&fragment);
                    reply.push_str(&fragment);
                }
                Ok(Some(Err(e))) => {
                    warn!("Stream from {} failed: {e}", self.model.name());
                    let note = format!("\n\n**Error:** {e}");
                    self.console.write(&note);
                    reply.push_str(&note);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    let secs = self.response_timeout.as_secs();
                    warn!(
                        "Reply from {} exceeded {secs}s; keeping {} chars",
                        self.model.name(),
                        reply.len()
                    );
                    let note = format!("\n\n**Error:** the reply timed out after {secs}s");
                    self.console.write(&note);
                    reply.push_str(&note);
                    break;
                }
            }
        }
        reply
    }
}

impl Listener for ChatEngine {
    fn name(&self) -> &str {
        "chat_engine"
    }

    fn listen<'a>(&'a self, event: &'a Event, bus: &'a EventBus) -> ListenerFuture<'a> {
        Box::pin(async move {
            let bundle = match (event.kind(), event.contents()) {
                (EventKind::Chat, Content::PromptBundle(bundle)) => bundle,
                (kind, contents) => return Err(unexpected(self.name(), kind, contents)),
            };

            info!("Chatting with {}", self.model.name());
            let reply = self.converse(bundle).await;
            let answer = Event::plain(EventKind::AiMessage, self.model.name(), reply);
            bus.publish(&[Topic::Record], &answer).await;
            Ok(())
        })
    }
}
