//! `<!-- include: https://URL -->`: inline the visible text of a web page.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::{Document, Sources, Substitution, body_lines, substitute};

pub const NOT_FOUND: &str = "<!-- include website not found -->";

/// Column width used when converting HTML to text.
const TEXT_WIDTH: usize = 100;

static WEBSITE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!?--\s*include:\s*(https?://\S+?)\s*-->").expect("hardcoded regex")
});

static NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n+").expect("hardcoded regex"));

/// Visible text of an HTML document with runs of newlines collapsed.
pub fn visible_text(html: &str) -> Result<String, String> {
    let text = html2text::from_read(html.as_bytes(), TEXT_WIDTH)
        .map_err(|e| format!("Failed to convert HTML: {e}"))?;
    Ok(NEWLINES.replace_all(text.trim(), "\n").into_owned())
}

pub async fn include_websites(
    document: impl Into<Document>,
    sources: &dyn Sources,
) -> Substitution {
    substitute(document.into(), &WEBSITE_TAG, "website", |url| {
        Box::pin(async move {
            let page = match sources.fetch_url(&url).await {
                Ok(html) => visible_text(&html),
                Err(e) => Err(e),
            };
            let body = match page {
                Ok(text) => body_lines(&text),
                Err(e) => {
                    warn!("Website include failed for {url}: {e}");
                    vec![NOT_FOUND.to_string()]
                }
            };

            let mut block = vec![format!("**{url}**:"), String::new(), "```".to_string()];
            block.extend(body);
            block.push("```".to_string());
            block
        })
    })
    .await
}
