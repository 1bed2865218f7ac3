use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use esb_types::ProjectId;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer};
use tokio::sync::broadcast;

use crate::WatchSet;

/// Batches of changed paths are buffered up to this many before slow listeners lag.
const CHANGES_CAPACITY: usize = 64;

/// A file watcher for a single project.
///
/// Watches the parent directory of every input, so editors that save by replacing a file
/// don't make us lose track of it, and only reports changes to paths in the current
/// [`WatchSet`].
pub struct ProjectWatcher {
    id: ProjectId,
    state: Mutex<WatcherState>,
    /// Current watch set, shared with the notify event handler.
    files: Arc<RwLock<WatchSet>>,
    /// Debounced batches of changed input files.
    changes: broadcast::Sender<Arc<[PathBuf]>>,
}

struct WatcherState {
    debouncer: Debouncer<RecommendedWatcher>,
    /// Directories currently registered with the OS watcher.
    directories: BTreeSet<PathBuf>,
}

impl ProjectWatcher {
    pub fn new(id: ProjectId, debounce: Duration) -> Result<Self, crate::Error> {
        let (changes, _rx) = broadcast::channel(CHANGES_CAPACITY);
        let files = Arc::new(RwLock::new(WatchSet::default()));

        let changes_ = changes.clone();
        let files_ = Arc::clone(&files);
        let id_ = id.clone();
        let debouncer = notify_debouncer_mini::new_debouncer(
            debounce,
            move |result: DebounceEventResult| {
                let events = match result {
                    Ok(events) => events,
                    Err(err) => {
                        tracing::warn!(project = %id_, ?err, "file watcher error");
                        return;
                    }
                };

                let changed: BTreeSet<PathBuf> = {
                    let files = files_.read().expect("WatchSet lock poisoned");
                    events
                        .into_iter()
                        .map(|event| event.path)
                        // Writes to our own outputs are never interesting.
                        .filter(|path| files.inputs.contains(path))
                        .filter(|path| !files.outputs.contains(path))
                        .collect()
                };
                if changed.is_empty() {
                    return;
                }
                tracing::debug!(project = %id_, ?changed, "files changed");
                // No receivers just means no build is listening right now.
                let _ = changes_.send(changed.into_iter().collect());
            },
        )?;

        Ok(ProjectWatcher {
            id,
            state: Mutex::new(WatcherState {
                debouncer,
                directories: BTreeSet::new(),
            }),
            files,
            changes,
        })
    }

    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    /// Replace the files this watcher observes with `set`.
    pub fn install(&self, set: WatchSet) -> Result<(), crate::Error> {
        let wanted = set.directories();
        let mut state = self.state.lock().expect("WatcherState lock poisoned");

        let stale: Vec<_> = state.directories.difference(&wanted).cloned().collect();
        for dir in stale {
            if let Err(err) = state.debouncer.watcher().unwatch(&dir) {
                tracing::debug!(?dir, ?err, "failed to unwatch directory");
            }
            state.directories.remove(&dir);
        }

        let fresh: Vec<_> = wanted.difference(&state.directories).cloned().collect();
        for dir in fresh {
            match state
                .debouncer
                .watcher()
                .watch(&dir, RecursiveMode::NonRecursive)
            {
                Ok(()) => {
                    state.directories.insert(dir);
                }
                // A directory can disappear between the build and now, the next cycle will
                // try again.
                Err(err) => tracing::warn!(project = %self.id, ?dir, ?err, "failed to watch"),
            }
        }

        tracing::debug!(
            project = %self.id,
            files = set.len(),
            directories = state.directories.len(),
            "installed watch set"
        );
        *self.files.write().expect("WatchSet lock poisoned") = set;
        Ok(())
    }

    /// Subscribe to debounced batches of changed files.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[PathBuf]>> {
        self.changes.subscribe()
    }

    /// The current [`WatchSet`].
    pub fn watch_set(&self) -> WatchSet {
        self.files.read().expect("WatchSet lock poisoned").clone()
    }
}

impl std::fmt::Debug for ProjectWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectWatcher")
            .field("id", &self.id)
            .field("files", &self.files.read().map(|set| set.len()).unwrap_or(0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_changes_to_watched_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let watched = root.join("a.ts");
        let unwatched = root.join("b.ts");
        std::fs::write(&watched, "1").unwrap();
        std::fs::write(&unwatched, "1").unwrap();

        let watcher =
            ProjectWatcher::new(ProjectId::new("test".into()), Duration::from_millis(20)).unwrap();
        let mut set = WatchSet::default();
        set.inputs.insert(watched.clone());
        watcher.install(set).unwrap();
        let mut rx = watcher.subscribe();

        // Give the OS watcher a moment to arm.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&unwatched, "2").unwrap();
        std::fs::write(&watched, "2").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for change")
            .unwrap();
        assert_eq!(&batch[..], &[watched]);
    }
}
