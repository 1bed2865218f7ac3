use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use esb_ore::path::absolutize;
use esb_types::{BuildConfig, TypeCheckMode};

use crate::{TypeCheckHandle, TypeCheckOptions, TypeChecker, find_tsconfig};

/// Options that come from the command line rather than the build config.
#[derive(Debug, Clone, Default)]
pub struct TypeCheckCli {
    pub color: bool,
    pub quiet: bool,
}

/// A type check that [`TypeCheckRegistry::start`] handed out.
#[derive(Debug, Clone)]
pub struct TypeCheckStart {
    pub handle: TypeCheckHandle,
    /// Registry key, pass this back to [`TypeCheckRegistry::release`].
    pub key: PathBuf,
    /// Whether an already running process got reused.
    pub reused: bool,
}

#[derive(Debug)]
struct RegistryEntry {
    handle: TypeCheckHandle,
    users: usize,
}

/// Type checker processes keyed by the `tsconfig.json` (or project directory) they check.
pub struct TypeCheckRegistry {
    checker: Arc<dyn TypeChecker>,
    entries: Mutex<BTreeMap<PathBuf, RegistryEntry>>,
    /// Set once some process owns clearing the terminal.
    clear_claimed: AtomicBool,
}

impl std::fmt::Debug for TypeCheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().expect("type check registry lock poisoned");
        f.debug_struct("TypeCheckRegistry")
            .field("entries", &*entries)
            .field("clear_claimed", &self.clear_claimed)
            .finish()
    }
}

impl TypeCheckRegistry {
    pub fn new(checker: Arc<dyn TypeChecker>) -> Self {
        TypeCheckRegistry {
            checker,
            entries: Mutex::new(BTreeMap::new()),
            clear_claimed: AtomicBool::new(false),
        }
    }

    /// Start, or join, the type checker for `config`.
    ///
    /// Returns `None` when type checking is off, or when it's [`TypeCheckMode::Auto`] and the
    /// project has no `tsconfig.json`. Every `Some` takes a use that has to be given back with
    /// [`TypeCheckRegistry::release`].
    pub fn start(
        &self,
        mode: &TypeCheckMode,
        cli: &TypeCheckCli,
        config: &BuildConfig,
    ) -> Option<TypeCheckStart> {
        let (tsconfig, args, migrations) = match mode {
            TypeCheckMode::Off => return None,
            TypeCheckMode::Auto => {
                let Some(tsconfig) = self.discover(config) else {
                    tracing::debug!(cwd = %config.cwd.display(), "no tsconfig, skipping type check");
                    return None;
                };
                (Some(tsconfig), Vec::new(), Vec::new())
            }
            TypeCheckMode::On => (self.discover(config), Vec::new(), Vec::new()),
            TypeCheckMode::Custom(settings) => {
                let tsconfig = match &settings.tsconfig {
                    Some(path) => Some(absolutize(path, &config.cwd)),
                    None => self.discover(config),
                };
                if tsconfig.is_none() && !settings.required {
                    tracing::debug!(cwd = %config.cwd.display(), "no tsconfig, skipping type check");
                    return None;
                }
                (tsconfig, settings.args.clone(), settings.migrations.clone())
            }
        };

        let key = tsconfig.clone().unwrap_or_else(|| config.cwd.clone());
        let mut entries = self.entries.lock().expect("type check registry lock poisoned");

        if let Some(entry) = entries.get_mut(&key) {
            if !entry.handle.is_cancelled() && !entry.handle.is_finished() {
                entry.users += 1;
                tracing::debug!(key = %key.display(), users = entry.users, "reusing type checker");
                return Some(TypeCheckStart {
                    handle: entry.handle.clone(),
                    key,
                    reused: true,
                });
            }
        }

        let watch = config.is_watch();
        let clear_screen = watch
            && config.clear
            && self
                .clear_claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();

        let options = TypeCheckOptions {
            mode: mode.clone(),
            color: cli.color,
            quiet: cli.quiet,
            watch,
            cwd: config.cwd.clone(),
            clear_screen,
            src_dir: source_dir(config),
            tsconfig,
            args,
            migrations,
        };
        tracing::debug!(key = %key.display(), ?options, "starting type checker");
        let handle = self.checker.start(options);

        // A finished or canceled process with the same key gets replaced.
        entries.insert(
            key.clone(),
            RegistryEntry {
                handle: handle.clone(),
                users: 1,
            },
        );

        Some(TypeCheckStart {
            handle,
            key,
            reused: false,
        })
    }

    /// Give back a use of the process at `key`, the last use stops it.
    pub fn release(&self, key: &Path) {
        let mut entries = self.entries.lock().expect("type check registry lock poisoned");
        let Some(entry) = entries.get_mut(key) else {
            return;
        };

        entry.users = entry.users.saturating_sub(1);
        if entry.users == 0 {
            if let Some(entry) = entries.remove(key) {
                tracing::debug!(key = %key.display(), "stopping type checker");
                entry.handle.cancel();
            }
        }
    }

    /// Number of outstanding uses of the process at `key`.
    pub fn users(&self, key: &Path) -> usize {
        self.entries
            .lock()
            .expect("type check registry lock poisoned")
            .get(key)
            .map_or(0, |entry| entry.users)
    }

    /// Number of processes currently tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("type check registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn discover(&self, config: &BuildConfig) -> Option<PathBuf> {
        find_tsconfig(&source_dir(config), &config.cwd)
    }
}

fn source_dir(config: &BuildConfig) -> PathBuf {
    config
        .entry_points
        .first()
        .map(|entry| absolutize(entry, &config.cwd))
        .and_then(|entry| entry.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| config.cwd.clone())
}
