//! Persistence backends for the conversation log.
//!
//! [`JsonlStore`] directory layout:
//! ```text
//! sessions_dir/
//!   pw-18c2f4a9e1b-0000/
//!     unprocessed.jsonl
//!     processed.jsonl
//!     summarized.jsonl
//! ```

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tracing::warn;

use super::{LogStream, Record};

/// Generate a unique, time-ordered session ID.
pub fn generate_session_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("pw-{ts:x}-{count:04x}")
}

/// Write-through target for [`ConversationLog`](super::ConversationLog).
pub trait MessageStore: Send + Sync {
    fn add_message(&self, session_id: &str, stream: LogStream, record: &Record)
    -> Result<(), String>;

    /// The last `n` records of a stream, oldest first.
    fn last_n(&self, session_id: &str, stream: LogStream, n: usize) -> Result<Vec<Record>, String>;
}

// ── MemoryStore ────────────────────────────────────────────────────

/// Keeps everything in process memory. Used when persistence is off and in
/// tests.
#[derive(Default)]
pub struct MemoryStore {
    streams: Mutex<HashMap<(String, LogStream), Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryStore {
    fn add_message(
        &self,
        session_id: &str,
        stream: LogStream,
        record: &Record,
    ) -> Result<(), String> {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((session_id.to_string(), stream))
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn last_n(&self, session_id: &str, stream: LogStream, n: usize) -> Result<Vec<Record>, String> {
        let streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        let records = streams
            .get(&(session_id.to_string(), stream))
            .map_or(&[][..], Vec::as_slice);
        Ok(records[records.len().saturating_sub(n)..].to_vec())
    }
}

// ── JsonlStore ─────────────────────────────────────────────────────

/// One append-only JSON-lines file per stream, one directory per session.
pub struct JsonlStore {
    sessions_dir: PathBuf,
}

impl JsonlStore {
    /// Create the store, ensuring the root sessions directory exists.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Result<Self, String> {
        let sessions_dir = sessions_dir.into();
        std::fs::create_dir_all(&sessions_dir).map_err(|e| {
            format!(
                "Failed to create sessions dir {}: {e}",
                sessions_dir.display()
            )
        })?;
        Ok(Self { sessions_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn stream_path(&self, session_id: &str, stream: LogStream) -> PathBuf {
        self.sessions_dir
            .join(session_id)
            .join(format!("{}.jsonl", stream.as_str()))
    }

    /// Whether any stream file exists for `session_id`.
    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions_dir.join(session_id).is_dir()
    }

    /// Session IDs found on disk, sorted (IDs are time-ordered).
    pub fn sessions(&self) -> Result<Vec<String>, String> {
        let entries = std::fs::read_dir(&self.sessions_dir)
            .map_err(|e| format!("Failed to read sessions dir: {e}"))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| format!("Failed to read entry: {e}"))?;
            if entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl MessageStore for JsonlStore {
    fn add_message(
        &self,
        session_id: &str,
        stream: LogStream,
        record: &Record,
    ) -> Result<(), String> {
        let path = self.stream_path(session_id, stream);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create session dir: {e}"))?;
        }

        let mut line = serde_json::to_string(record)
            .map_err(|e| format!("Failed to serialize record: {e}"))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| format!("Failed to append to {}: {e}", path.display()))
    }

    fn last_n(&self, session_id: &str, stream: LogStream, n: usize) -> Result<Vec<Record>, String> {
        let path = self.stream_path(session_id, stream);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;

        let mut records = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping malformed record at {}:{}: {e}",
                    path.display(),
                    i + 1
                ),
            }
        }
        let start = records.len().saturating_sub(n);
        Ok(records.split_off(start))
    }
}
