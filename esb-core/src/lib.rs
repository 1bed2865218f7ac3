//! Build orchestration around an external bundler.
//!
//! An [`Orchestrator`] turns a user's [`RawBuildConfig`] into a [`BuildHandle`]: the config is
//! normalized, the bundler runs once, and in watch mode it runs again for every change to the
//! project's inputs. A type checker runs next to it and gates the final result.
//!
//! [`RawBuildConfig`]: esb_types::RawBuildConfig

use std::path::PathBuf;

use esb_cfg::{Config, ConfigSet, ConfigSetBuilder};

pub mod bundler;
pub mod cfgs;
pub mod error;
pub mod executor;
pub mod gate;
pub mod handle;
pub mod identity;
pub mod normalize;
pub mod orchestrator;
pub mod outmode;
pub mod report;
pub mod sourcemap;

pub use bundler::{Bundler, BundlerFailure, BundlerOptions, BundlerResult, EsbuildCli};
pub use error::Error;
pub use executor::{BuildExecutor, CycleContext};
pub use gate::StartGate;
pub use handle::{BuildHandle, BuildId, CycleLocks};
pub use identity::project_id;
pub use normalize::{CliOverrides, ConfigWarning, normalize};
pub use orchestrator::Orchestrator;

pub static METADATA_DIR: Config<&'static str> = Config::new(
    "metadata_dir",
    "Where build metadata for watch mode is written, defaults to the system temp directory.",
    "",
);

pub static ESBUILD_BIN: Config<&'static str> = Config::new(
    "esbuild_bin",
    "Bundler executable, looked up in node_modules/.bin and then $PATH.",
    "esbuild",
);

pub fn register_configs(builder: &mut ConfigSetBuilder) {
    builder.register(&METADATA_DIR).register(&ESBUILD_BIN);
}

/// Resolved value of [`METADATA_DIR`].
pub fn metadata_dir(configs: &ConfigSet) -> PathBuf {
    let dir = METADATA_DIR.read(configs);
    if dir.is_empty() {
        std::env::temp_dir()
    } else {
        PathBuf::from(dir.as_str())
    }
}
