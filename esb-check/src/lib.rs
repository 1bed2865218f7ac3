//! Type checking that runs alongside the build.
//!
//! The type checker is a long-lived subprocess per project. Overlapping builds of the same
//! project share one process through the [`TypeCheckRegistry`] so their diagnostics don't
//! interleave and the terminal only gets cleared by one of them.

use std::path::PathBuf;
use std::time::Duration;

use esb_cfg::{Config, ConfigSetBuilder};
use esb_types::TypeCheckMode;

mod discover;
mod handle;
mod notice;
mod registry;
mod tsc;

pub use discover::{TSCONFIG_FILENAME, find_tsconfig};
pub use handle::{TypeCheckHandle, TypeCheckReporter};
pub use notice::wait_with_notice;
pub use registry::{TypeCheckCli, TypeCheckRegistry, TypeCheckStart};
pub use tsc::TscChecker;

pub static TSC_BIN: Config<&'static str> = Config::new(
    "tsc_bin",
    "Type checker executable, looked up in node_modules/.bin and then $PATH.",
    "tsc",
);

pub static TYPECHECK_NOTICE_DELAY: Config<Duration> = Config::new(
    "typecheck_notice_delay",
    "How long to wait on the type checker before telling the user we're waiting.",
    Duration::from_secs(1),
);

pub fn register_configs(builder: &mut ConfigSetBuilder) {
    builder.register(&TSC_BIN).register(&TYPECHECK_NOTICE_DELAY);
}

/// Starts type checker processes.
pub trait TypeChecker: Send + Sync + 'static {
    /// Start checking the project described by `options`.
    ///
    /// Failing to start is not an error here, the returned handle resolves to `false`.
    fn start(&self, options: TypeCheckOptions) -> TypeCheckHandle;
}

/// Everything a [`TypeChecker`] needs to start a process.
#[derive(Debug, Clone)]
pub struct TypeCheckOptions {
    pub mode: TypeCheckMode,
    pub color: bool,
    pub quiet: bool,
    pub watch: bool,
    /// Project directory, the process runs here.
    pub cwd: PathBuf,
    /// Whether this process is the one allowed to clear the terminal.
    pub clear_screen: bool,
    /// Directory of the first entry point.
    pub src_dir: PathBuf,
    pub tsconfig: Option<PathBuf>,
    pub args: Vec<String>,
    /// Deprecated settings that got migrated, reported as warnings on start.
    pub migrations: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("type checker {bin:?} not found: {source}")]
    NotFound { bin: String, source: which::Error },
    #[error("failed to run type checker: {0}")]
    Spawn(#[from] std::io::Error),
}
