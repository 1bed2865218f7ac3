use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use esb_cfg::ConfigSet;
use esb_types::ProjectId;

use crate::{ProjectWatcher, WATCH_DEBOUNCE};

/// Process-wide set of [`ProjectWatcher`]s, at most one per [`ProjectId`].
///
/// Watchers are reference counted by the builds using them. The last
/// [`WatcherRegistry::release`] drops the watcher, which stops the OS level watches.
#[derive(Debug)]
pub struct WatcherRegistry {
    watchers: Mutex<BTreeMap<ProjectId, RegistryEntry>>,
    configs: ConfigSet,
}

#[derive(Debug)]
struct RegistryEntry {
    watcher: Arc<ProjectWatcher>,
    users: usize,
}

impl WatcherRegistry {
    pub fn new(configs: ConfigSet) -> Self {
        WatcherRegistry {
            watchers: Mutex::new(BTreeMap::new()),
            configs,
        }
    }

    pub fn configs(&self) -> &ConfigSet {
        &self.configs
    }

    /// Get the watcher for `id`, creating one if none exists.
    ///
    /// Returns `true` alongside the watcher if it already existed.
    pub fn acquire(&self, id: &ProjectId) -> Result<(Arc<ProjectWatcher>, bool), crate::Error> {
        let mut watchers = self.lock();
        if let Some(entry) = watchers.get_mut(id) {
            entry.users += 1;
            tracing::debug!(project = %id, users = entry.users, "reusing file watcher");
            return Ok((Arc::clone(&entry.watcher), true));
        }

        let debounce = WATCH_DEBOUNCE.read(&self.configs);
        let watcher = Arc::new(ProjectWatcher::new(id.clone(), debounce)?);
        watchers.insert(
            id.clone(),
            RegistryEntry {
                watcher: Arc::clone(&watcher),
                users: 1,
            },
        );
        tracing::debug!(project = %id, "created file watcher");
        Ok((watcher, false))
    }

    /// Release one use of the watcher for `id`.
    pub fn release(&self, id: &ProjectId) {
        let mut watchers = self.lock();
        let Some(entry) = watchers.get_mut(id) else {
            tracing::warn!(project = %id, "released unknown file watcher");
            return;
        };
        entry.users -= 1;
        if entry.users == 0 {
            watchers.remove(id);
            tracing::debug!(project = %id, "dropped file watcher");
        }
    }

    pub fn get(&self, id: &ProjectId) -> Option<Arc<ProjectWatcher>> {
        self.lock().get(id).map(|entry| Arc::clone(&entry.watcher))
    }

    /// Number of outstanding uses of the watcher for `id`.
    pub fn users(&self, id: &ProjectId) -> usize {
        self.lock().get(id).map_or(0, |entry| entry.users)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ProjectId, RegistryEntry>> {
        self.watchers.lock().expect("WatcherRegistry lock poisoned")
    }
}
