//! Types used throughout `esb`.
//!
//! The goal of this crate is to stay lightweight, so take care with adding dependencies.

pub mod config;
pub mod hooks;
pub mod message;
pub mod metafile;
pub mod mode;

pub use config::{
    BuildConfig, EntryPoints, OutputTarget, ProjectId, RawBuildConfig, RawTypeCheck,
    RawWatch, SourceMapMode, TypeCheckMode, TypeCheckSettings, WatchOptions,
};
pub use hooks::{BuildHooks, EndEvent, HookOutcome, StartEvent};
pub use message::{BuildOutcome, Location, Message};
pub use metafile::Metafile;
pub use mode::FileModeSpec;
