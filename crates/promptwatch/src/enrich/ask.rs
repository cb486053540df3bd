//! `<-- ask: QUESTION -->`: inline an answer from a secondary model.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::{Document, Sources, Substitution, body_lines, substitute};

/// System prompt for the secondary model.
pub const ASK_SYSTEM_PROMPT: &str = "You are an artificial intelligence assistant and you need to \
engage in a precise, concise, focused conversation with another artificial intelligence assistant.";

static ASK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<--\s*ask:\s*(\S.*?)\s*-->").expect("hardcoded regex"));

pub async fn ask_model(
    document: impl Into<Document>,
    sources: &dyn Sources,
) -> Substitution {
    substitute(document.into(), &ASK_TAG, "ask", |question| {
        Box::pin(async move {
            let mut block = vec![
                format!("**Asking __{}__ \"{question}\"**:", sources.ask_label()),
                String::new(),
            ];
            match sources.ask(&question).await {
                Ok(answer) => block.extend(body_lines(answer.trim())),
                Err(e) => {
                    warn!("Ask failed for {question:?}: {e}");
                    block.push(format!("<-- ask failed: {e} -->"));
                }
            }
            block
        })
    })
    .await
}
