//! `<-- include: file://PATH -->`: inline a local file in a code fence.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::{Document, Sources, Substitution, body_lines, substitute};

pub const NOT_FOUND: &str = "<-- include file not found -->";

static FILE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<--\s*include:\s*file://(\S+?)\s*-->").expect("hardcoded regex")
});

/// Fence language for a file extension. Unknown extensions get a bare fence.
pub fn fence_language(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext {
        "py" => "python",
        "js" => "javascript",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "java" => "java",
        "c" => "c",
        "cpp" => "cpp",
        "go" => "go",
        "rs" => "rust",
        "php" => "php",
        "rb" => "ruby",
        "swift" => "swift",
        "sh" => "bash",
        "sql" => "sql",
        "yml" => "yaml",
        "xml" => "xml",
        _ => "",
    }
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(p.get(2..).unwrap_or("")),
        (p, _) => PathBuf::from(p),
    }
}

pub async fn include_files(
    document: impl Into<Document>,
    sources: &dyn Sources,
) -> Substitution {
    substitute(document.into(), &FILE_TAG, "file", |path| {
        Box::pin(async move {
            let (language, body) = match sources.read_file(&path).await {
                Ok(content) => (fence_language(&path), body_lines(&content)),
                Err(e) => {
                    warn!("File include failed for {path}: {e}");
                    ("", vec![NOT_FOUND.to_string()])
                }
            };

            let mut block = vec![
                format!("**{path}**:"),
                String::new(),
                format!("```{language}"),
            ];
            block.extend(body);
            block.push("```".to_string());
            block
        })
    })
    .await
}
