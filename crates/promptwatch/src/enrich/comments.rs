//! HTML comment removal.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--(.*?)-->\n?").expect("hardcoded regex"));

/// Remove `<!-- ... -->` comments (multi-line included) with one trailing
/// newline each. `<!-- include: ... -->` directives are kept for the website
/// stage. The result is trimmed only when something was removed.
pub fn strip_comments(text: &str) -> String {
    let mut removed = false;
    let out = COMMENT_RE.replace_all(text, |caps: &Captures<'_>| {
        if caps[1].trim_start().starts_with("include:") {
            caps[0].to_string()
        } else {
            removed = true;
            String::new()
        }
    });
    if removed {
        out.trim().to_string()
    } else {
        out.into_owned()
    }
}
