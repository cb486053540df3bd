//! Watched-file notifications.
//!
//! The `notify` backend runs on its own OS thread. Its callback only
//! filters events and forwards a unit notification over an unbounded
//! channel; everything else happens on the async side.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, warn};

/// Keeps the OS watcher alive. Dropping it stops notifications and closes
/// the channel.
pub struct FileWatcher {
    _inner: RecommendedWatcher,
    path: PathBuf,
}

impl FileWatcher {
    /// Watch `path` for writes. The parent directory is watched
    /// non-recursively so editors that replace the file on save are seen.
    pub fn start(path: &Path) -> Result<(Self, UnboundedReceiver<()>), String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| format!("Not a file path: {}", path.display()))?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if is_relevant(&event, &file_name) => {
                    // Receiver gone means the pipeline is shutting down.
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!("File watch error: {e}"),
            }
        })
        .map_err(|e| format!("Failed to create file watcher: {e}"))?;

        inner
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| format!("Failed to watch {}: {e}", dir.display()))?;
        debug!("Watching {} for changes to {}", dir.display(), path.display());

        Ok((
            Self {
                _inner: inner,
                path: path.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A create or modify event touching a file named `file_name`.
pub fn is_relevant(event: &notify::Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

/// Read the whole watched file.
pub async fn read_prompt(path: &Path) -> Result<String, String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind};

    fn name(s: &str) -> OsString {
        OsString::from(s)
    }

    #[test]
    fn modify_of_watched_file_is_relevant() {
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/tmp/work/input.md"));
        assert!(is_relevant(&event, &name("input.md")));
    }

    #[test]
    fn create_counts_as_a_write() {
        let event = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("input.md"));
        assert!(is_relevant(&event, &name("input.md")));
    }

    #[test]
    fn other_files_and_kinds_are_ignored() {
        let sibling = notify::Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/tmp/work/notes.md"));
        assert!(!is_relevant(&sibling, &name("input.md")));

        let access = notify::Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/tmp/work/input.md"));
        assert!(!is_relevant(&access, &name("input.md")));
    }

    #[tokio::test]
    async fn read_prompt_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.md");
        let err = read_prompt(&path).await.unwrap_err();
        assert!(err.contains("input.md"));

        std::fs::write(&path, "hello").unwrap();
        assert_eq!(read_prompt(&path).await.unwrap(), "hello");
    }

    #[test]
    fn start_rejects_paths_without_a_file_name() {
        assert!(FileWatcher::start(Path::new("/")).is_err());
    }
}
