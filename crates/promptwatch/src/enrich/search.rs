//! `<-- search: QUERY -->`: inline web search results as bullets.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::{Document, SearchHit, Sources, Substitution, substitute};

static SEARCH_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<--\s*search:\s*(\S.*?)\s*-->").expect("hardcoded regex"));

fn bullet(hit: &SearchHit) -> String {
    format!("- [{}]({}). {}", hit.title, hit.url, hit.snippet)
}

pub async fn search_web(
    document: impl Into<Document>,
    sources: &dyn Sources,
) -> Substitution {
    substitute(document.into(), &SEARCH_TAG, "search", |query| {
        Box::pin(async move {
            let mut block = vec![
                format!("**Web search \"{query}\" results**:"),
                String::new(),
            ];
            match sources.search(&query).await {
                Ok(hits) if hits.is_empty() => block.push("No results.".to_string()),
                Ok(hits) => block.extend(hits.iter().map(bullet)),
                Err(e) => {
                    warn!("Web search failed for {query:?}: {e}");
                    block.push(format!("<-- web search failed: {e} -->"));
                }
            }
            block
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::SourceFuture;
    use crate::testing::FakeSources;

    #[tokio::test]
    async fn hits_render_as_bullets() {
        let sources = FakeSources {
            hits: vec![
                SearchHit {
                    title: "Rust".into(),
                    url: "https://rust-lang.org".into(),
                    snippet: "A language.".into(),
                },
                SearchHit {
                    title: "Tokio".into(),
                    url: "https://tokio.rs".into(),
                    snippet: "A runtime.".into(),
                },
            ],
            ..Default::default()
        };
        let out = search_web(" <-- search: rust async -->", &sources).await;
        assert_eq!(
            out.text(),
            " **Web search \"rust async\" results**:\n\n - [Rust](https://rust-lang.org). A language.\n - [Tokio](https://tokio.rs). A runtime."
        );
        assert_eq!(out.fired, vec!["search: rust async"]);
    }

    /// Search backend that always fails.
    struct Offline;

    impl Sources for Offline {
        fn fetch_url<'a>(&'a self, _: &'a str) -> SourceFuture<'a, String> {
            Box::pin(async { Err("offline".to_string()) })
        }
        fn read_file<'a>(&'a self, _: &'a str) -> SourceFuture<'a, String> {
            Box::pin(async { Err("offline".to_string()) })
        }
        fn search<'a>(&'a self, _: &'a str) -> SourceFuture<'a, Vec<SearchHit>> {
            Box::pin(async { Err("HTTP 401 Unauthorized".to_string()) })
        }
        fn run<'a>(&'a self, _: &'a [String]) -> SourceFuture<'a, String> {
            Box::pin(async { Err("offline".to_string()) })
        }
        fn ask<'a>(&'a self, _: &'a str) -> SourceFuture<'a, String> {
            Box::pin(async { Err("offline".to_string()) })
        }
        fn ask_label(&self) -> &str {
            "offline"
        }
    }

    #[tokio::test]
    async fn failure_is_contained_to_its_line() {
        let out = search_web("keep me\n<-- search: anything -->\nand me", &Offline).await;
        let text = out.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.first(), Some(&"keep me"));
        assert_eq!(lines.last(), Some(&"and me"));
        assert!(out.text().contains("<-- web search failed: HTTP 401 Unauthorized -->"));
    }

    #[tokio::test]
    async fn no_hits_is_stated() {
        let out = search_web("<-- search: nothing -->", &FakeSources::default()).await;
        assert!(out.text().ends_with("No results."));
    }

    #[tokio::test]
    async fn tag_free_text_is_unchanged() {
        let text = "what is <-- search -->";
        assert_eq!(search_web(text, &FakeSources::default()).await.text(), text);
    }
}
