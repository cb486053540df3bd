//! Console log layer.
//!
//! Log lines go to stderr (or any writer) as `HH:MM:SS LEVEL message`, so
//! they never interleave with the reply rendered on stdout. Events from
//! dependencies (HTTP stack, file watcher) are only shown at `WARN` and
//! above.

use std::io::Write;
use std::sync::Mutex;

use chrono::Local;
use tracing::{Level, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

pub struct ConsoleLogLayer {
    max_level: Level,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleLogLayer {
    pub fn stderr(max_level: Level) -> Self {
        Self::with_writer(max_level, Box::new(std::io::stderr()))
    }

    pub fn with_writer(max_level: Level, writer: Box<dyn Write + Send>) -> Self {
        Self {
            max_level,
            writer: Mutex::new(writer),
        }
    }

    fn wants(&self, metadata: &Metadata<'_>) -> bool {
        let level = metadata.level();
        if metadata.target().starts_with(env!("CARGO_CRATE_NAME")) {
            level <= &self.max_level
        } else {
            level <= &Level::WARN && level <= &self.max_level
        }
    }
}

/// Parse a `--log-level` value.
pub fn parse_level(name: &str) -> Result<Level, String> {
    name.trim()
        .parse::<Level>()
        .map_err(|_| format!("unknown log level {name:?} (expected trace, debug, info, warn or error)"))
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for ConsoleLogLayer {
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        self.wants(metadata)
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if !self.wants(event.metadata()) {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message;
        if !visitor.fields.is_empty() {
            let extras: Vec<String> = visitor
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            if message.is_empty() {
                message = extras.join(" ");
            } else {
                message = format!("{message} {{{}}}", extras.join(", "));
            }
        }

        let line = format!(
            "{} {:>5} {message}\n",
            Local::now().format("%H:%M:%S"),
            event.metadata().level()
        );
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }
}

/// Extracts the message and extra fields from an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let raw = format!("{value:?}");
        if field.name() == "message" {
            self.message = raw
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .map_or_else(|| raw.clone(), str::to_string);
        } else {
            self.fields.push((field.name().to_string(), raw));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }
}
