//! Network, filesystem and process backed [`Sources`].

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::file::expand_home;
use super::{SearchHit, SourceFuture, Sources};
use crate::model::LanguageModel;

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

pub struct LiveSources {
    http: reqwest::Client,
    search_key: Option<String>,
    search_results: usize,
    asker: Option<Arc<dyn LanguageModel>>,
}

impl LiveSources {
    pub fn new() -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        Ok(Self {
            http,
            search_key: None,
            search_results: 7,
            asker: None,
        })
    }

    /// Brave Search subscription token.
    pub fn with_search_key(mut self, key: Option<String>) -> Self {
        self.search_key = key;
        self
    }

    pub fn with_search_results(mut self, count: usize) -> Self {
        self.search_results = count;
        self
    }

    /// Model answering `ask` tags.
    pub fn with_asker(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.asker = Some(model);
        self
    }

    async fn brave_search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
        let key = self.search_key.as_deref().ok_or_else(|| {
            "BRAVE_SEARCH_KEY env var not set. \
             Get a free API key at https://brave.com/search/api/"
                .to_string()
        })?;

        let url = format!(
            "{BRAVE_ENDPOINT}?q={}&count={}",
            urlencoded(query),
            self.search_results
        );
        let resp = self
            .http
            .get(&url)
            .header("X-Subscription-Token", key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {body}"));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e: reqwest::Error| e.to_string())?;
        let hits = parse_brave_results(&body, self.search_results);
        debug!("Search {query:?}: {} result(s)", hits.len());
        Ok(hits)
    }
}

impl Sources for LiveSources {
    fn fetch_url<'a>(&'a self, url: &'a str) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let resp = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| format!("Request to {url} failed: {e}"))?;
            if !resp.status().is_success() {
                return Err(format!("HTTP {} for {url}", resp.status()));
            }
            resp.text()
                .await
                .map_err(|e| format!("Failed to read {url}: {e}"))
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let full = expand_home(path);
            tokio::fs::read_to_string(&full)
                .await
                .map_err(|e| format!("Failed to read {}: {e}", full.display()))
        })
    }

    fn search<'a>(&'a self, query: &'a str) -> SourceFuture<'a, Vec<SearchHit>> {
        Box::pin(self.brave_search(query))
    }

    fn run<'a>(&'a self, argv: &'a [String]) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let (program, args) = argv
                .split_first()
                .ok_or_else(|| "empty command".to_string())?;
            let output = Command::new(program)
                .args(args)
                .output()
                .await
                .map_err(|e| format!("Error running {program}: {e}"))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(format!(
                    "Command failed ({}): {}",
                    output.status,
                    stderr.trim()
                ));
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }

    fn ask<'a>(&'a self, question: &'a str) -> SourceFuture<'a, String> {
        Box::pin(async move {
            let model = self
                .asker
                .as_ref()
                .ok_or_else(|| "No model configured for ask tags".to_string())?;
            model.invoke(question).await
        })
    }

    fn ask_label(&self) -> &str {
        self.asker.as_ref().map_or("unconfigured", |m| m.name())
    }
}

/// Minimal percent-encoding for URL query parameters.
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push_str(&format!("{b:02X}"));
            }
        }
    }
    out
}

/// Extract `(title, url, snippet)` from a Brave Search response.
fn parse_brave_results(body: &serde_json::Value, limit: usize) -> Vec<SearchHit> {
    let Some(results) = body["web"]["results"].as_array() else {
        return Vec::new();
    };
    results
        .iter()
        .take(limit)
        .map(|r| SearchHit {
            title: r["title"].as_str().unwrap_or("").to_string(),
            url: r["url"].as_str().unwrap_or("").to_string(),
            snippet: r["description"].as_str().unwrap_or("").to_string(),
        })
        .collect()
}
