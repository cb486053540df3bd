//! Watch a prompt file and chat with a language model from the terminal.
//!
//! Every save of the prompt file sends its contents (after tag expansion) to
//! the model; the reply streams to stdout and the exchange is stored under
//! the sessions directory. API keys come from `LLM_API_KEY`, `ASK_API_KEY`
//! and `BRAVE_SEARCH_KEY`.
//!
//! ```sh
//! # Local Ollama, streaming replies
//! promptwatch notes.md --model llama3.1 --stream
//!
//! # Resume an earlier session against a hosted endpoint
//! LLM_API_KEY=... promptwatch --base-url https://api.openai.com/v1 \
//!     --model gpt-4o-mini --session pw-18f2c3a4b5d-0000
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use promptwatch::config::load_text_file;
use promptwatch::enrich::ask::ASK_SYSTEM_PROMPT;
use promptwatch::history::generate_session_id;
use promptwatch::prelude::*;
use promptwatch_term::TerminalSink;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Watch a prompt file and chat with a language model.
#[derive(Parser, Debug)]
#[command(name = "promptwatch", version)]
struct Cli {
    /// File to watch; each save sends its contents.
    #[arg(default_value = "input.md")]
    prompt_file: PathBuf,

    /// Chat model name.
    #[arg(long, default_value = promptwatch::config::DEFAULT_MODEL)]
    model: String,

    /// OpenAI-compatible API base URL.
    #[arg(long, default_value = promptwatch::DEFAULT_BASE_URL)]
    base_url: String,

    /// Stream replies as they are generated.
    #[arg(long)]
    stream: bool,

    /// Log level on stderr (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Summarize the conversation every N model replies.
    #[arg(long, default_value_t = 16)]
    summarize_every: usize,

    /// Send a save even if the file did not change since the last one.
    #[arg(long)]
    allow_duplicates: bool,

    /// Seconds to wait for a streamed reply.
    #[arg(long, default_value_t = 300)]
    response_timeout: u64,

    /// Milliseconds of quiet before a burst of saves is sent.
    #[arg(long, default_value_t = 250)]
    debounce_ms: u64,

    /// Prompt template file with {{placeholders}}.
    #[arg(long)]
    template: Option<PathBuf>,

    /// File with example exchanges for the template.
    #[arg(long)]
    examples: Option<PathBuf>,

    /// Name shown for your turns (default: $USER).
    #[arg(long)]
    username: Option<String>,

    /// Directory holding stored sessions.
    #[arg(long, default_value = ".promptwatch/sessions")]
    sessions_dir: PathBuf,

    /// Resume an existing session.
    #[arg(long)]
    session: Option<String>,

    /// List stored sessions and exit.
    #[arg(long)]
    list_sessions: bool,

    /// Base URL of the model answering `ask` tags.
    #[arg(long, default_value = promptwatch::config::DEFAULT_ASK_BASE_URL)]
    ask_base_url: String,

    /// Model answering `ask` tags.
    #[arg(long, default_value = promptwatch::config::DEFAULT_ASK_MODEL)]
    ask_model: String,

    /// Results per `search` tag.
    #[arg(long, default_value_t = 7)]
    search_results: usize,

    /// Retries for transient model API failures.
    #[arg(long, default_value_t = 2)]
    max_retries: u32,
}

impl Cli {
    fn into_config(self) -> Result<PipelineConfig, String> {
        let template = self.template.as_deref().map(load_text_file).transpose()?;
        let examples = self.examples.as_deref().map(load_text_file).transpose()?;

        let mut config = PipelineConfig::from_env()
            .with_prompt_file(self.prompt_file)
            .with_model(self.model)
            .with_streaming(self.stream)
            .with_summarize_every(self.summarize_every)
            .with_filter_duplicates(!self.allow_duplicates)
            .with_response_timeout(Duration::from_secs(self.response_timeout))
            .with_debounce(Duration::from_millis(self.debounce_ms))
            .with_template(template)
            .with_examples(examples);
        if let Some(username) = self.username {
            config = config.with_username(username);
        }
        config.base_url = self.base_url;
        config.sessions_dir = self.sessions_dir;
        config.session_id = self.session;
        config.ask_base_url = self.ask_base_url;
        config.ask_model = self.ask_model;
        config.search_results = self.search_results;
        config.max_retries = self.max_retries;
        Ok(config)
    }
}

fn open_log(config: &PipelineConfig) -> Result<ConversationLog, String> {
    let store = JsonlStore::new(&config.sessions_dir)?;
    match &config.session_id {
        Some(id) => {
            if !store.has_session(id) {
                return Err(format!(
                    "No session {id} in {}",
                    config.sessions_dir.display()
                ));
            }
            ConversationLog::resume(id.clone(), Arc::new(store))
        }
        None => Ok(ConversationLog::new(generate_session_id(), Arc::new(store))),
    }
}

fn build(config: PipelineConfig) -> Result<Orchestrator, String> {
    let retry = RetryConfig::with_retries(config.max_retries);
    let model = ChatClient::new(config.base_url.clone(), config.model.clone())?
        .with_api_key(config.api_key.clone())
        .with_retry(retry.clone());
    let asker = ChatClient::new(config.ask_base_url.clone(), config.ask_model.clone())?
        .with_api_key(config.ask_api_key.clone())
        .with_system_prompt(ASK_SYSTEM_PROMPT)
        .with_retry(retry);
    let sources = LiveSources::new()?
        .with_search_key(config.search_api_key.clone())
        .with_search_results(config.search_results)
        .with_asker(Arc::new(asker));

    let log = open_log(&config)?;
    let sink = TerminalSink::stdout().with_color(std::io::stdout().is_terminal());
    let console = Console::new(StreamRenderer::new(promptwatch_term::width()), Box::new(sink));

    Ok(Orchestrator::new(
        config,
        Arc::new(model),
        Arc::new(sources),
        Arc::new(log),
        Arc::new(console),
    ))
}

async fn run(cli: Cli) -> Result<(), String> {
    if cli.list_sessions {
        let store = JsonlStore::new(&cli.sessions_dir)?;
        for session in store.sessions()? {
            println!("{session}");
        }
        return Ok(());
    }

    let config = cli.into_config()?;
    if !config.prompt_file.is_file() {
        return Err(format!(
            "Prompt file {} does not exist",
            config.prompt_file.display()
        ));
    }

    let orchestrator = build(config)?;
    info!("Session {}", orchestrator.log().session_id());
    tokio::select! {
        result = orchestrator.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; session {} saved", orchestrator.log().session_id());
            Ok(())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let level = match parse_level(&cli.log_level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };
    tracing_subscriber::registry()
        .with(ConsoleLogLayer::stderr(level))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_library() {
        let cli = Cli::try_parse_from(["promptwatch"]).unwrap();
        assert_eq!(cli.prompt_file, PathBuf::from("input.md"));
        assert_eq!(cli.log_level, "warn");

        let config = cli.into_config().unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(config.model, defaults.model);
        assert_eq!(config.base_url, defaults.base_url);
        assert_eq!(config.summarize_every, defaults.summarize_every);
        assert_eq!(config.debounce, defaults.debounce);
        assert_eq!(config.response_timeout, defaults.response_timeout);
        assert_eq!(config.sessions_dir, defaults.sessions_dir);
        assert!(config.filter_duplicates);
        assert!(!config.enable_stream);
    }

    #[test]
    fn flags_reach_the_config() {
        let cli = Cli::try_parse_from([
            "promptwatch",
            "notes.md",
            "--stream",
            "--allow-duplicates",
            "--summarize-every",
            "4",
            "--username",
            "ana",
            "--session",
            "pw-1-0000",
            "--response-timeout",
            "30",
        ])
        .unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.prompt_file, PathBuf::from("notes.md"));
        assert!(config.enable_stream);
        assert!(!config.filter_duplicates);
        assert_eq!(config.summarize_every, 4);
        assert_eq!(config.username, "ana");
        assert_eq!(config.session_id.as_deref(), Some("pw-1-0000"));
        assert_eq!(config.response_timeout, Duration::from_secs(30));
    }

    #[test]
    fn template_files_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.md");
        std::fs::write(&template, "{{username}}: {{query}}").unwrap();

        let cli = Cli::try_parse_from([
            "promptwatch".into(),
            "--template".into(),
            template.into_os_string(),
        ])
        .unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.template.as_deref(), Some("{{username}}: {{query}}"));

        let cli = Cli::try_parse_from(["promptwatch", "--examples", "/no/such/file"]).unwrap();
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn unknown_sessions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            sessions_dir: dir.path().to_path_buf(),
            session_id: Some("pw-missing".into()),
            ..PipelineConfig::default()
        };
        let err = open_log(&config).err().unwrap();
        assert!(err.contains("pw-missing"));

        let fresh = PipelineConfig {
            sessions_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        assert!(open_log(&fresh).unwrap().session_id().starts_with("pw-"));
    }
}
