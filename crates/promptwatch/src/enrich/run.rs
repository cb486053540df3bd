//! `` <-- run: `CMD` --> ``: inline the stdout of a command.
//!
//! The command is split with shell-word rules and executed directly; there
//! is no `sh -c`, so pipes and globs are passed through literally.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::{Document, Sources, Substitution, substitute};

pub const RUN_ERROR: &str = "<-- An error occurred while running the command. -->";

static RUN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<--\s*run:\s*`(.+)`\s*-->").expect("hardcoded regex"));

/// Non-blank output lines with trailing spaces removed.
fn output_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.trim_end_matches(' '))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn run_commands(
    document: impl Into<Document>,
    sources: &dyn Sources,
) -> Substitution {
    substitute(document.into(), &RUN_TAG, "run", |command| {
        Box::pin(async move {
            let (label, body) = match shell_words::split(&command) {
                Ok(argv) if !argv.is_empty() => {
                    let label = argv.join(" ");
                    match sources.run(&argv).await {
                        Ok(stdout) => (label, output_lines(&stdout)),
                        Err(e) => {
                            warn!("Command `{label}` failed: {e}");
                            (label, vec![RUN_ERROR.to_string(), e])
                        }
                    }
                }
                Ok(_) => (
                    command.clone(),
                    vec![RUN_ERROR.to_string(), "empty command".to_string()],
                ),
                Err(e) => {
                    warn!("Could not parse command `{command}`: {e}");
                    (
                        command.clone(),
                        vec![RUN_ERROR.to_string(), format!("invalid command line: {e}")],
                    )
                }
            };

            let mut block = vec![format!("**{label}**:"), String::new(), "```bash".to_string()];
            block.extend(body);
            block.push("```".to_string());
            block
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSources;

    #[tokio::test]
    async fn stdout_is_fenced_as_bash() {
        let out = run_commands(
            "Here is the output:\n <-- run: `echo example.py` -->",
            &FakeSources::default(),
        )
        .await;
        assert_eq!(
            out.text(),
            "Here is the output:\n **echo example.py**:\n\n ```bash\n example.py\n ```"
        );
        assert_eq!(out.fired, vec!["run: echo example.py"]);
    }

    #[tokio::test]
    async fn quoted_arguments_stay_together() {
        let out = run_commands("<-- run: `echo 'a  b'` -->", &FakeSources::default()).await;
        assert!(out.text().contains("\na  b\n"));
    }

    #[tokio::test]
    async fn failing_command_reports_inline() {
        let out = run_commands("<-- run: `nosuchcmd -x` -->", &FakeSources::default()).await;
        assert_eq!(
            out.text(),
            format!("**nosuchcmd -x**:\n\n```bash\n{RUN_ERROR}\nnosuchcmd: command not found\n```")
        );
    }

    #[tokio::test]
    async fn unbalanced_quotes_report_inline() {
        let out = run_commands("<-- run: `echo 'oops` -->", &FakeSources::default()).await;
        assert!(out.text().contains(RUN_ERROR));
        assert!(out.text().contains("invalid command line"));
    }

    #[test]
    fn blank_lines_and_trailing_spaces_are_dropped() {
        assert_eq!(output_lines("a  \n\n b\n"), vec!["a", " b"]);
    }

    #[tokio::test]
    async fn tag_free_text_is_unchanged() {
        let text = "run: `ls` without the arrow";
        assert_eq!(run_commands(text, &FakeSources::default()).await.text(), text);
    }
}
