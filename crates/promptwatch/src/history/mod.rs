//! Append-only conversation log.
//!
//! Each session keeps three logical streams:
//!
//! | Stream | Holds |
//! |--------|-------|
//! | `unprocessed` | raw human turns and AI replies |
//! | `processed` | enriched human turns and AI replies (the model's view) |
//! | `summarized` | rolling summaries |
//!
//! Records are immutable and live in one arena; a record appended to two
//! streams is shared, not copied. Readers get snapshots. Every append is
//! written through to a [`MessageStore`].

pub mod store;

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use store::{JsonlStore, MemoryStore, MessageStore, generate_session_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Ai,
    Summary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Human => "human",
            Role::Ai => "ai",
            Role::Summary => "summary",
        })
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub role: Role,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Local>,
}

impl Record {
    pub fn new(role: Role, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role,
            author: author.into(),
            text: text.into(),
            created_at: Local::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    Unprocessed,
    Processed,
    Summarized,
}

impl LogStream {
    pub const ALL: [LogStream; 3] = [
        LogStream::Unprocessed,
        LogStream::Processed,
        LogStream::Summarized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Unprocessed => "unprocessed",
            LogStream::Processed => "processed",
            LogStream::Summarized => "summarized",
        }
    }

    fn index(self) -> usize {
        match self {
            LogStream::Unprocessed => 0,
            LogStream::Processed => 1,
            LogStream::Summarized => 2,
        }
    }
}

#[derive(Default)]
struct Arena {
    records: Vec<Arc<Record>>,
    streams: [Vec<usize>; 3],
}

impl Arena {
    fn stream(&self, stream: LogStream) -> impl DoubleEndedIterator<Item = &Arc<Record>> + '_ {
        self.streams[stream.index()]
            .iter()
            .map(|&i| &self.records[i])
    }
}

pub struct ConversationLog {
    session_id: String,
    store: Arc<dyn MessageStore>,
    arena: Mutex<Arena>,
}

impl ConversationLog {
    pub fn new(session_id: impl Into<String>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            session_id: session_id.into(),
            store,
            arena: Mutex::new(Arena::default()),
        }
    }

    /// Reload every stream of an existing session from the store.
    pub fn resume(session_id: impl Into<String>, store: Arc<dyn MessageStore>) -> Result<Self, String> {
        let log = Self::new(session_id, store);
        {
            let mut arena = log.arena.lock().unwrap_or_else(|e| e.into_inner());
            for stream in LogStream::ALL {
                let records = log.store.last_n(&log.session_id, stream, usize::MAX)?;
                debug!(
                    "Resumed {} {} record(s) for {}",
                    records.len(),
                    stream.as_str(),
                    log.session_id
                );
                for record in records {
                    let i = arena.records.len();
                    arena.records.push(Arc::new(record));
                    arena.streams[stream.index()].push(i);
                }
            }
        }
        Ok(log)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append one record to each stream in `streams`. Store failures are
    /// logged; the in-memory log is appended regardless.
    pub fn append(&self, streams: &[LogStream], record: Record) -> Arc<Record> {
        for &stream in streams {
            if let Err(e) = self.store.add_message(&self.session_id, stream, &record) {
                warn!("Failed to persist {} record: {e}", stream.as_str());
            }
        }

        let record = Arc::new(record);
        let mut arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
        let i = arena.records.len();
        arena.records.push(Arc::clone(&record));
        for &stream in streams {
            arena.streams[stream.index()].push(i);
        }
        record
    }

    /// Snapshot of the last `n` records of a stream, oldest first.
    pub fn last_n(&self, stream: LogStream, n: usize) -> Vec<Record> {
        let arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
        let mut tail: Vec<Record> = arena
            .stream(stream)
            .rev()
            .take(n)
            .map(|r| Record::clone(r))
            .collect();
        tail.reverse();
        tail
    }

    pub fn latest(&self, stream: LogStream) -> Option<Arc<Record>> {
        let arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
        arena.stream(stream).next_back().cloned()
    }

    pub fn count(&self, stream: LogStream) -> usize {
        let arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
        arena.streams[stream.index()].len()
    }

    pub fn count_role(&self, stream: LogStream, role: Role) -> usize {
        let arena = self.arena.lock().unwrap_or_else(|e| e.into_inner());
        arena.stream(stream).filter(|r| r.role == role).count()
    }
}
