//! Pipeline configuration.
//!
//! [`PipelineConfig::default()`] carries every default; the binary overrides
//! fields from its command line. Secrets are read from the environment by
//! [`PipelineConfig::from_env`]:
//!
//! | Variable | Used for |
//! |----------|----------|
//! | `LLM_API_KEY` | main chat model (optional for local servers) |
//! | `ASK_API_KEY` | secondary model answering `ask` tags |
//! | `BRAVE_SEARCH_KEY` | `search` tags |

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::DEFAULT_BASE_URL;
use crate::gate::DEFAULT_DEBOUNCE;
use crate::stages::chat::DEFAULT_RESPONSE_TIMEOUT;
use crate::stages::recorder::DEFAULT_SUMMARIZE_EVERY;

pub const DEFAULT_MODEL: &str = "llama3.1";
pub const DEFAULT_ASK_BASE_URL: &str = "https://api.perplexity.ai";
pub const DEFAULT_ASK_MODEL: &str = "sonar";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// File whose saves trigger a turn.
    pub prompt_file: PathBuf,
    pub username: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub enable_stream: bool,
    pub summarize_every: usize,
    pub debounce: Duration,
    /// Ignore saves whose body equals the last admitted one.
    pub filter_duplicates: bool,
    /// Budget for a streamed reply.
    pub response_timeout: Duration,
    /// Template text replacing the built-in prompt template.
    pub template: Option<String>,
    pub examples: Option<String>,
    pub sessions_dir: PathBuf,
    /// Session to resume; a new one is generated when unset.
    pub session_id: Option<String>,
    pub ask_base_url: String,
    pub ask_model: String,
    pub ask_api_key: Option<String>,
    pub search_results: usize,
    pub search_api_key: Option<String>,
    pub max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prompt_file: PathBuf::from("input.md"),
            username: std::env::var("USER")
                .ok()
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| "human".to_string()),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            enable_stream: false,
            summarize_every: DEFAULT_SUMMARIZE_EVERY,
            debounce: DEFAULT_DEBOUNCE,
            filter_duplicates: true,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            template: None,
            examples: None,
            sessions_dir: PathBuf::from(".promptwatch/sessions"),
            session_id: None,
            ask_base_url: DEFAULT_ASK_BASE_URL.to_string(),
            ask_model: DEFAULT_ASK_MODEL.to_string(),
            ask_api_key: None,
            search_results: 7,
            search_api_key: None,
            max_retries: 2,
        }
    }
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl PipelineConfig {
    /// Defaults plus the API keys found in the environment.
    pub fn from_env() -> Self {
        Self {
            api_key: env_secret("LLM_API_KEY"),
            ask_api_key: env_secret("ASK_API_KEY"),
            search_api_key: env_secret("BRAVE_SEARCH_KEY"),
            ..Self::default()
        }
    }

    pub fn with_prompt_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompt_file = path.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.enable_stream = enabled;
        self
    }

    pub fn with_summarize_every(mut self, n: usize) -> Self {
        self.summarize_every = n.max(1);
        self
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn with_filter_duplicates(mut self, enabled: bool) -> Self {
        self.filter_duplicates = enabled;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_template(mut self, template: Option<String>) -> Self {
        self.template = template;
        self
    }

    pub fn with_examples(mut self, examples: Option<String>) -> Self {
        self.examples = examples;
        self
    }
}

/// Read a template or examples file.
pub fn load_text_file(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.prompt_file, PathBuf::from("input.md"));
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.summarize_every, 16);
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert!(config.filter_duplicates);
        assert!(!config.enable_stream);
        assert_eq!(config.response_timeout, Duration::from_secs(300));
        assert_eq!(config.search_results, 7);
        assert_eq!(config.sessions_dir, PathBuf::from(".promptwatch/sessions"));
        assert!(!config.username.is_empty());
    }

    #[test]
    fn builders_override_defaults() {
        let config = PipelineConfig::default()
            .with_prompt_file("notes.md")
            .with_streaming(true)
            .with_summarize_every(0)
            .with_filter_duplicates(false)
            .with_template(Some("{{query}}".into()));
        assert_eq!(config.prompt_file, PathBuf::from("notes.md"));
        assert!(config.enable_stream);
        assert_eq!(config.summarize_every, 1);
        assert!(!config.filter_duplicates);
        assert_eq!(config.template.as_deref(), Some("{{query}}"));
    }

    #[test]
    fn text_files_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.md");
        std::fs::write(&path, "{{query}}").unwrap();
        assert_eq!(load_text_file(&path).unwrap(), "{{query}}");
        assert!(load_text_file(&dir.path().join("missing.md")).is_err());
    }
}
