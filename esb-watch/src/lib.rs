//! Watch mode: one file watcher per project, fed by the metadata the bundler writes after
//! every build cycle.
//!
//! We never figure out the file set ourselves. Whatever the bundler reports as inputs of the
//! last build is what gets watched, minus the build's own outputs.

use std::time::Duration;

use esb_cfg::{Config, ConfigSetBuilder};

mod registry;
mod watch;
mod watch_set;
mod watcher;

pub use registry::WatcherRegistry;
pub use watch::watch_files;
pub use watch_set::WatchSet;
pub use watcher::ProjectWatcher;

pub static WATCH_DEBOUNCE: Config<Duration> = Config::new(
    "watch_debounce",
    "How long file system events are batched before triggering a rebuild.",
    Duration::from_millis(50),
);

pub static WATCH_VENDOR_THRESHOLD: Config<u64> = Config::new(
    "watch_vendor_threshold",
    "Above this many input files, files in dependency directories are not watched.",
    100,
);

pub fn register_configs(builder: &mut ConfigSetBuilder) {
    builder
        .register(&WATCH_DEBOUNCE)
        .register(&WATCH_VENDOR_THRESHOLD);
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Metafile(#[from] esb_types::metafile::MetafileError),
    #[error("file watcher: {0}")]
    Notify(#[from] notify::Error),
    #[error("invalid watch ignore glob: {0}")]
    Glob(#[from] globset::Error),
}
