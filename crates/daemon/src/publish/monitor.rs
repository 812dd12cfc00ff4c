use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind, Debouncer};
use parking_lot::Mutex;
use uuid::Uuid;

/// Raw events arriving faster than this collapse into one signal.
const DEBOUNCE_LATENCY: Duration = Duration::from_secs(1);

/// Folder-level change signal. Carries no path detail: the consumer only
/// records that the folder needs a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub folder_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// Watches one published folder's subtree and raises a debounced
/// "changed" signal per burst of raw filesystem events. It never
/// publishes anything itself; the signal consumer records a pending
/// marker on a queue of its own, so callbacks cannot block on an
/// in-progress publish.
pub struct DirectoryChangeMonitor {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl DirectoryChangeMonitor {
    /// Start watching `root` recursively on behalf of `folder_id`.
    /// Dropping the monitor releases the underlying watch.
    pub fn start(
        folder_id: Uuid,
        root: &Path,
        events: flume::Sender<ChangeEvent>,
    ) -> Result<Self, MonitorError> {
        // Resolve symlinks up front; the platform backends report real paths.
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

        let last_seen: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));

        let mut debouncer = new_debouncer(
            DEBOUNCE_LATENCY,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(batch) => {
                    if batch.is_empty() {
                        return;
                    }
                    let mut last = last_seen.lock();
                    // A batch of nothing but continuous repeats of the
                    // path we already signalled is the tail of the same
                    // burst; skip it.
                    let fresh = batch.iter().any(|event| {
                        event.kind == DebouncedEventKind::Any
                            || last.as_ref() != Some(&event.path)
                    });
                    if !fresh {
                        return;
                    }
                    *last = batch.last().map(|event| event.path.clone());
                    if events.send(ChangeEvent { folder_id }).is_err() {
                        tracing::debug!(%folder_id, "change channel closed");
                    }
                }
                Err(e) => {
                    tracing::error!(%folder_id, "watch error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)?;

        tracing::debug!(%folder_id, root = %root.display(), "watching folder");

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}
