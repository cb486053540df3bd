//! Crossterm [`RenderSink`] for promptwatch.
//!
//! The sink keeps one live preview line at the bottom of the output. Each
//! previewed character is printed as it arrives; when the renderer flushes a
//! block, the preview line is cleared and the block is printed in its final,
//! styled form.
//!
//! | Block / line | Style |
//! |--------------|-------|
//! | title header | `── author · date ───` rule, bold cyan |
//! | `# heading` | bold magenta |
//! | code fence | dark grey |
//! | fenced code | yellow |
//! | list item | green marker |
//! | `> quote` | italic dark grey |

use std::io::{self, Write};
use std::sync::LazyLock;

use crossterm::cursor::{MoveLeft, MoveToColumn};
use crossterm::queue;
use crossterm::style::{Print, PrintStyledContent, Stylize};
use crossterm::terminal::{Clear, ClearType};
use promptwatch::render::{Block, RenderSink};
use regex::Regex;

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*(?:[-*+]|\d+\.)\s)(.*)$").expect("hardcoded regex"));

/// Terminal width, or 80 when it cannot be queried.
pub fn width() -> usize {
    crossterm::terminal::size().map_or(80, |(cols, _)| usize::from(cols))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Heading,
    Fence,
    Code,
    Bullet,
    Quote,
    Plain,
}

/// Style every line of a markdown block. Fence state is local to the block.
pub fn classify_lines(text: &str) -> Vec<(LineStyle, &str)> {
    let mut in_fence = false;
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let style = if trimmed.starts_with("```") {
                in_fence = !in_fence;
                LineStyle::Fence
            } else if in_fence {
                LineStyle::Code
            } else if trimmed.starts_with('#') {
                LineStyle::Heading
            } else if trimmed.starts_with('>') {
                LineStyle::Quote
            } else if BULLET.is_match(line) {
                LineStyle::Bullet
            } else {
                LineStyle::Plain
            };
            (style, line)
        })
        .collect()
}

pub struct TerminalSink<W: Write + Send> {
    out: W,
    width: usize,
    color: bool,
}

impl TerminalSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), width())
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W, width: usize) -> Self {
        Self {
            out,
            width,
            color: true,
        }
    }

    /// Disable ANSI styling (for pipes and dumb terminals).
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn rule(&self, author: &str, date: &str) -> String {
        let head = format!("── {author} · {date} ");
        let used = head.chars().count();
        format!("{head}{}", "─".repeat(self.width.saturating_sub(used).max(3)))
    }

    fn print_line(&mut self, style: LineStyle, line: &str) -> io::Result<()> {
        if !self.color {
            return queue!(self.out, Print(line), Print("\n"));
        }
        match style {
            LineStyle::Heading => queue!(self.out, PrintStyledContent(line.bold().magenta()))?,
            LineStyle::Fence => queue!(self.out, PrintStyledContent(line.dark_grey()))?,
            LineStyle::Code => queue!(self.out, PrintStyledContent(line.yellow()))?,
            LineStyle::Quote => queue!(self.out, PrintStyledContent(line.italic().dark_grey()))?,
            LineStyle::Bullet => match BULLET.captures(line) {
                Some(caps) => queue!(
                    self.out,
                    PrintStyledContent(caps[1].to_string().green()),
                    Print(&caps[2])
                )?,
                None => queue!(self.out, Print(line))?,
            },
            LineStyle::Plain => queue!(self.out, Print(line))?,
        }
        queue!(self.out, Print("\n"))
    }

    fn write_block(&mut self, block: &Block) -> io::Result<()> {
        queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
        match block {
            Block::Rule { author, date } => {
                let rule = self.rule(author, date);
                if self.color {
                    queue!(self.out, PrintStyledContent(rule.bold().cyan()), Print("\n"))?;
                } else {
                    queue!(self.out, Print(rule), Print("\n"))?;
                }
            }
            Block::Markdown(text) => {
                // the leading newline ended the previous block
                let text = text.strip_prefix('\n').unwrap_or(text);
                for (style, line) in classify_lines(text) {
                    self.print_line(style, line)?;
                }
            }
        }
        self.out.flush()
    }
}

impl<W: Write + Send> RenderSink for TerminalSink<W> {
    fn flush(&mut self, block: &Block) {
        let _ = self.write_block(block);
    }

    fn continuation(&mut self, ch: char) {
        let _ = queue!(self.out, Print(ch)).and_then(|()| self.out.flush());
    }

    fn spinner(&mut self, frame: &str) {
        let cols = u16::try_from(frame.chars().count()).unwrap_or(1);
        let _ = queue!(self.out, Print(frame), MoveLeft(cols)).and_then(|()| self.out.flush());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptwatch::render::StreamRenderer;

    fn plain(width: usize) -> TerminalSink<Vec<u8>> {
        TerminalSink::new(Vec::new(), width).with_color(false)
    }

    fn output(sink: TerminalSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn lines_are_classified() {
        let styles: Vec<_> = classify_lines("# Title\n- item\n2. next\n> said\n```rust\nlet x;\n```\ntext")
            .into_iter()
            .map(|(style, _)| style)
            .collect();
        assert_eq!(
            styles,
            vec![
                LineStyle::Heading,
                LineStyle::Bullet,
                LineStyle::Bullet,
                LineStyle::Quote,
                LineStyle::Fence,
                LineStyle::Code,
                LineStyle::Fence,
                LineStyle::Plain,
            ]
        );
    }

    #[test]
    fn code_lines_that_look_like_markdown_stay_code() {
        let styles: Vec<_> = classify_lines("```\n# not a heading\n- not a bullet\n```")
            .into_iter()
            .map(|(style, _)| style)
            .collect();
        assert_eq!(styles[1], LineStyle::Code);
        assert_eq!(styles[2], LineStyle::Code);
    }

    #[test]
    fn rule_fills_the_width() {
        let mut sink = plain(30);
        sink.flush(&Block::Rule {
            author: "llama".into(),
            date: "Mon, 04 Mar 09:05 - 2024".into(),
        });
        let out = output(sink);
        assert!(out.contains("── llama · Mon, 04 Mar 09:05 - 2024 ───"));
        assert!(out.ends_with("\n"));
    }

    #[test]
    fn markdown_drops_one_leading_newline() {
        let mut sink = plain(80);
        sink.flush(&Block::Markdown("\nSecond line".into()));
        let out = output(sink);
        assert!(out.ends_with("Second line\n"));
        assert!(!out.ends_with("\nSecond line\n\n"));
    }

    #[test]
    fn renderer_drives_the_sink() {
        let mut renderer = StreamRenderer::new(80);
        let mut sink = plain(80);
        renderer.feed("Hello\n```sh\nls\n```\n", &mut sink);
        renderer.finish(&mut sink);
        let out = output(sink);
        assert!(out.contains("Hello\n"));
        assert!(out.contains("```sh\nls\n```\n"));
    }

    #[test]
    fn styled_output_keeps_the_text() {
        let mut sink = TerminalSink::new(Vec::new(), 80);
        sink.flush(&Block::Markdown("# Heading\n- item".into()));
        let out = output(sink);
        assert!(out.contains("Heading"));
        assert!(out.contains("item"));
    }
}
