//! Incremental markdown presentation of streamed text.
//!
//! [`StreamRenderer`] buffers characters and hands complete blocks to a
//! [`RenderSink`] only when the buffer can be rendered without breaking
//! markdown structure. While a line is still growing it emits cheap
//! per-character previews; once the preview budget (terminal width) is used
//! up it shows a spinner instead.
//!
//! A block counts as open, and is kept buffered across newlines, when:
//!
//! | Construct | Open while |
//! |-----------|------------|
//! | fenced code | an odd number of fence lines has been seen |
//! | list | first line is `N. ` or `- ` and no blank line yet |
//! | title header | `[comment]: # "--- (` seen but not `)"` |

use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, Local};
use regex::Regex;

pub const SPINNER_FRAMES: [&str; 12] = [
    "     ", " •   ", " ••  ", " ••• ", " ••  ", " •   ", "     ", "   • ", "  •• ", " ••• ",
    "  •• ", "   • ",
];

const HEADER_PREFIX: &str = "[comment]: # \"--- (";
const HEADER_CLOSE: &str = ")\"";

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\[comment\]: # "--- \(\*\*(?P<author>.+?)\*\* \((?P<date>.+?)\)\)"$"#)
        .expect("hardcoded regex")
});

/// Title header line announcing a new turn.
pub fn title_line(author: &str, at: &DateTime<Local>) -> String {
    format!(
        "{HEADER_PREFIX}**{author}** ({}))\"\n\n",
        at.format("%a, %d %b %H:%M - %Y")
    )
}

// ── Sink ───────────────────────────────────────────────────────────

/// A complete unit handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Markdown(String),
    Rule { author: String, date: String },
}

/// Display target for the renderer.
pub trait RenderSink: Send {
    /// Replace the current preview line with a rendered block.
    fn flush(&mut self, block: &Block);
    /// Preview one character of the growing line.
    fn continuation(&mut self, ch: char);
    /// Show one spinner frame in place.
    fn spinner(&mut self, frame: &str);
}

// ── Renderer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Accumulating,
    Flushed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum LineHead {
    /// Only whitespace so far on this line.
    #[default]
    Leading,
    Ticks(u8),
    Done,
}

/// Progress of the first non-blank line towards a `N. ` or `- ` marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ListMarker {
    #[default]
    Pending,
    Dash,
    Digits,
    Dot,
    Yes,
    No,
}

/// Open-construct state of the buffer, updated one character at a time so
/// deciding whether to flush never rescans the buffer.
#[derive(Debug, Default)]
struct BlockScan {
    fences: usize,
    blank_line: bool,
    header_open: bool,
    ends_with_newline: bool,
    head: LineHead,
    line_len: usize,
    list: ListMarker,
}

impl BlockScan {
    /// Account for `ch`, which `buffer` now ends with.
    fn push(&mut self, ch: char, buffer: &str) {
        if ch == '\n' {
            self.blank_line |= self.ends_with_newline;
            self.ends_with_newline = true;
            self.head = LineHead::Leading;
            self.line_len = 0;
            if matches!(self.list, ListMarker::Dash | ListMarker::Digits | ListMarker::Dot) {
                self.list = ListMarker::No;
            }
            return;
        }
        self.ends_with_newline = false;

        self.head = match self.head {
            LineHead::Leading if ch.is_whitespace() => LineHead::Leading,
            LineHead::Leading if ch == '`' => LineHead::Ticks(1),
            LineHead::Ticks(2) if ch == '`' => {
                self.fences += 1;
                LineHead::Done
            }
            LineHead::Ticks(n) if ch == '`' => LineHead::Ticks(n + 1),
            _ => LineHead::Done,
        };

        self.list = match self.list {
            ListMarker::Pending if ch.is_whitespace() => ListMarker::Pending,
            // the marker must start the line
            ListMarker::Pending if self.line_len > 0 => ListMarker::No,
            ListMarker::Pending if ch == '-' => ListMarker::Dash,
            ListMarker::Pending | ListMarker::Digits if ch.is_ascii_digit() => ListMarker::Digits,
            ListMarker::Digits if ch == '.' => ListMarker::Dot,
            ListMarker::Dash | ListMarker::Dot if ch.is_whitespace() => ListMarker::Yes,
            ListMarker::Yes => ListMarker::Yes,
            _ => ListMarker::No,
        };
        self.line_len += 1;

        if buffer.ends_with(HEADER_PREFIX) {
            self.header_open = true;
        } else if self.header_open && buffer.ends_with(HEADER_CLOSE) {
            self.header_open = false;
        }
    }

    /// Whether the buffer ends inside a construct that must not be split.
    fn is_open(&self) -> bool {
        if self.fences > 0 {
            return self.fences % 2 == 1;
        }
        if self.blank_line {
            return false;
        }
        if self.header_open {
            return true;
        }
        !self.ends_with_newline && self.list == ListMarker::Yes
    }
}

pub struct StreamRenderer {
    width: usize,
    column: usize,
    buffer: String,
    scan: BlockScan,
    spin: usize,
    state: RenderState,
}

impl StreamRenderer {
    /// `width` is the preview budget per line, normally the terminal width.
    pub fn new(width: usize) -> Self {
        Self {
            width,
            column: width,
            buffer: String::new(),
            scan: BlockScan::default(),
            spin: 0,
            state: RenderState::Flushed,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn feed(&mut self, fragment: &str, sink: &mut dyn RenderSink) {
        for ch in fragment.chars() {
            self.push_char(ch, sink);
        }
    }

    /// Flush whatever is buffered, open block or not.
    pub fn finish(&mut self, sink: &mut dyn RenderSink) {
        self.flush(sink);
    }

    fn push(&mut self, ch: char) {
        self.buffer.push(ch);
        self.scan.push(ch, &self.buffer);
    }

    fn push_char(&mut self, ch: char, sink: &mut dyn RenderSink) {
        if ch == '\n' {
            if self.scan.is_open() {
                if self.column > 0 {
                    sink.continuation(' ');
                    self.column -= 1;
                }
            } else {
                self.flush(sink);
            }
            self.push('\n');
            return;
        }

        self.push(ch);
        self.state = RenderState::Accumulating;
        if self.column > 0 {
            sink.continuation(ch);
            self.column -= 1;
        } else if !self.scan.is_open() {
            sink.spinner(SPINNER_FRAMES[self.spin % SPINNER_FRAMES.len()]);
            self.spin = self.spin.wrapping_add(1);
        }
    }

    fn flush(&mut self, sink: &mut dyn RenderSink) {
        if !self.buffer.trim().is_empty() {
            sink.flush(&classify(&self.buffer));
        }
        self.buffer.clear();
        self.scan = BlockScan::default();
        self.column = self.width;
        self.state = RenderState::Flushed;
    }
}

fn classify(buffer: &str) -> Block {
    match HEADER_RE.captures(buffer.trim()) {
        Some(caps) => Block::Rule {
            author: caps["author"].to_string(),
            date: caps["date"].to_string(),
        },
        None => Block::Markdown(buffer.to_string()),
    }
}

// ── Shared console ─────────────────────────────────────────────────

struct ConsoleInner {
    renderer: StreamRenderer,
    sink: Box<dyn RenderSink>,
}

/// One renderer and sink shared by every stage that prints.
pub struct Console {
    inner: Mutex<ConsoleInner>,
}

impl Console {
    pub fn new(renderer: StreamRenderer, sink: Box<dyn RenderSink>) -> Self {
        Self {
            inner: Mutex::new(ConsoleInner { renderer, sink }),
        }
    }

    pub fn write(&self, text: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let ConsoleInner { renderer, sink } = &mut *guard;
        renderer.feed(text, sink.as_mut());
    }

    pub fn title(&self, author: &str, at: &DateTime<Local>) {
        self.write(&title_line(author, at));
    }

    pub fn finish(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let ConsoleInner { renderer, sink } = &mut *guard;
        renderer.finish(sink.as_mut());
    }
}
