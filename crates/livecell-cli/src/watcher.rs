//! File watcher for a notebook directory.
//!
//! Reports changes to `.cell` files; everything else is ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;

use crate::notebook::is_cell_file;

/// File change event.
#[derive(Debug, Clone)]
pub enum FileEvent {
    /// File was created or modified.
    Modified(PathBuf),
    /// File was removed.
    Removed(PathBuf),
}

/// File watcher handle.
pub struct FileWatcher {
    /// Debouncer handle (kept alive to maintain watcher).
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl FileWatcher {
    /// Watch `dir`, coalescing bursts of file system events within `delay`.
    pub fn new(dir: impl AsRef<Path>, delay: Duration) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(delay, move |result: DebounceEventResult| {
            let events = match result {
                Ok(events) => events,
                Err(error) => {
                    tracing::warn!(%error, "file watch error");
                    return;
                }
            };
            for event in events {
                if !is_cell_file(&event.path) {
                    continue;
                }
                let file_event = if event.path.exists() {
                    FileEvent::Modified(event.path)
                } else {
                    FileEvent::Removed(event.path)
                };
                let _ = tx.send(file_event);
            }
        })
        .context("Failed to create file watcher")?;

        debouncer
            .watcher()
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Receive the next file event.
    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.rx.recv().await
    }
}
