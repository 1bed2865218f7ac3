//! Build configuration, both as written by the user ([`RawBuildConfig`]) and after
//! normalization ([`BuildConfig`]).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use derivative::Derivative;
use serde::{Deserialize, Deserializer};

use crate::hooks::BuildHooks;
use crate::mode::FileModeSpec;

/// Build configuration as provided by the user, before any normalization.
///
/// Keys the tool doesn't know about are collected into [`RawBuildConfig::extra`] and passed
/// straight through to the bundler.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBuildConfig {
    #[serde(default, alias = "entry")]
    pub entry_points: Option<EntryPoints>,
    #[serde(default)]
    pub outfile: Option<PathBuf>,
    #[serde(default)]
    pub outdir: Option<PathBuf>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub watch: Option<RawWatch>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub quiet: Option<bool>,
    #[serde(default)]
    pub clear: Option<bool>,
    #[serde(default)]
    pub color: Option<bool>,
    #[serde(default)]
    pub bundle: Option<bool>,
    #[serde(default)]
    pub minify: Option<bool>,
    #[serde(default)]
    pub write: Option<bool>,
    #[serde(default)]
    pub sourcemap: Option<SourceMapMode>,
    #[serde(default, alias = "tsc")]
    pub typecheck: Option<RawTypeCheck>,
    #[serde(default)]
    pub outfile_mode: Option<FileModeSpec>,
    #[serde(default)]
    pub define: BTreeMap<String, serde_json::Value>,

    /// Options for the bundler that we don't interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    #[serde(skip)]
    pub hooks: BuildHooks,
}

/// Keys of [`RawBuildConfig`] that belong to this tool, as spelled in config files.
pub static TOOL_OPTION_KEYS: &[&str] = &[
    "entryPoints",
    "entry",
    "outfile",
    "outdir",
    "cwd",
    "watch",
    "debug",
    "quiet",
    "clear",
    "color",
    "bundle",
    "minify",
    "write",
    "sourcemap",
    "typecheck",
    "tsc",
    "outfileMode",
    "define",
];

#[derive(Debug, thiserror::Error)]
pub enum RawConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RawBuildConfig {
    pub fn from_json(raw: &str) -> Result<Self, RawConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_toml(raw: &str) -> Result<Self, RawConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read a config file, picking the format from the file extension (JSON by default).
    pub fn from_path(path: &Path) -> Result<Self, RawConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RawConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => RawBuildConfig::from_toml(&raw),
            _ => RawBuildConfig::from_json(&raw),
        }
    }
}

/// One or many entry points.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EntryPoints {
    One(String),
    Many(Vec<String>),
}

impl EntryPoints {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            EntryPoints::One(entry) => vec![entry],
            EntryPoints::Many(entries) => entries,
        }
    }
}

/// `watch: true` or `watch: { ignore: [...] }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawWatch {
    Enabled(bool),
    Options(WatchOptions),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WatchOptions {
    /// Globs, relative to the project directory, of files never to watch.
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl RawWatch {
    pub fn into_options(self) -> Option<WatchOptions> {
        match self {
            RawWatch::Enabled(true) => Some(WatchOptions::default()),
            RawWatch::Enabled(false) => None,
            RawWatch::Options(options) => Some(options),
        }
    }
}

/// How source maps get emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMapMode {
    #[default]
    Off,
    /// A separate `.map` file, linked from the output with a comment.
    Linked,
    /// Embedded in the output file.
    Inline,
    /// A separate `.map` file that isn't linked from the output.
    External,
}

impl SourceMapMode {
    /// Whether the bundler writes a separate `.map` file that we post-process.
    pub fn writes_map_file(&self) -> bool {
        matches!(self, SourceMapMode::Linked | SourceMapMode::External)
    }

    /// The value the bundler expects for its `sourcemap` option.
    pub fn bundler_value(&self) -> serde_json::Value {
        match self {
            SourceMapMode::Off => serde_json::Value::Bool(false),
            SourceMapMode::Linked => serde_json::Value::Bool(true),
            SourceMapMode::Inline => "inline".into(),
            SourceMapMode::External => "external".into(),
        }
    }
}

impl<'de> Deserialize<'de> for SourceMapMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bool(bool),
            Str(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bool(false) => Ok(SourceMapMode::Off),
            Repr::Bool(true) => Ok(SourceMapMode::Linked),
            Repr::Str(s) => match s.as_str() {
                "false" | "off" | "" => Ok(SourceMapMode::Off),
                "true" | "linked" => Ok(SourceMapMode::Linked),
                "inline" => Ok(SourceMapMode::Inline),
                "external" => Ok(SourceMapMode::External),
                other => Err(serde::de::Error::custom(format!(
                    "invalid sourcemap mode {other:?}, expected one of false, true, \"inline\", \"external\""
                ))),
            },
        }
    }
}

/// `typecheck` as written by the user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawTypeCheck {
    Enabled(bool),
    Mode(String),
    Settings(RawTypeCheckSettings),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawTypeCheckSettings {
    /// `"auto"` (the default) or `"on"`.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub tsconfig: Option<PathBuf>,
    /// Deprecated spelling of `tsconfig`.
    #[serde(default)]
    pub project: Option<PathBuf>,
    /// Extra arguments for the type checker.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Whether, and how, to run the type checker alongside the build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypeCheckMode {
    Off,
    /// Run only if a `tsconfig.json` can be found.
    #[default]
    Auto,
    On,
    Custom(TypeCheckSettings),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeCheckSettings {
    /// Fail when no `tsconfig.json` can be found, instead of skipping.
    pub required: bool,
    pub tsconfig: Option<PathBuf>,
    pub args: Vec<String>,
    /// Deprecated keys that were migrated, reported to the user as warnings.
    pub migrations: Vec<String>,
}

/// Where the bundler writes its output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputTarget {
    #[default]
    None,
    File(PathBuf),
    Dir(PathBuf),
}

impl OutputTarget {
    pub fn path(&self) -> Option<&Path> {
        match self {
            OutputTarget::None => None,
            OutputTarget::File(path) | OutputTarget::Dir(path) => Some(path),
        }
    }
}

/// Deterministic identifier of a project, derived from its directory, output, and entry
/// points.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(hex: String) -> Self {
        ProjectId(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical build configuration, produced by normalizing a [`RawBuildConfig`].
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct BuildConfig {
    /// Always non-empty.
    pub entry_points: Vec<String>,
    pub output: OutputTarget,
    /// Absolute project directory.
    pub cwd: PathBuf,
    pub watch: Option<WatchOptions>,
    pub debug: bool,
    pub quiet: bool,
    pub clear: bool,
    pub color: bool,
    pub bundle: Option<bool>,
    pub minify: Option<bool>,
    pub write: Option<bool>,
    pub sourcemap: SourceMapMode,
    pub typecheck: TypeCheckMode,
    pub outfile_mode: Option<FileModeSpec>,
    pub define: BTreeMap<String, String>,
    /// Opaque bundler options we pass through untouched.
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub hooks: BuildHooks,

    /// Memoized [`ProjectId`], see `esb_core::identity`.
    #[derivative(Debug = "ignore")]
    pub identity: OnceLock<ProjectId>,
}

impl BuildConfig {
    /// A config with defaults for everything but the entry points and project directory.
    pub fn new(entry_points: Vec<String>, cwd: PathBuf) -> Self {
        BuildConfig {
            entry_points,
            output: OutputTarget::None,
            cwd,
            watch: None,
            debug: false,
            quiet: false,
            clear: true,
            color: false,
            bundle: None,
            minify: None,
            write: None,
            sourcemap: SourceMapMode::Off,
            typecheck: TypeCheckMode::Auto,
            outfile_mode: None,
            define: BTreeMap::new(),
            extra: serde_json::Map::new(),
            hooks: BuildHooks::default(),
            identity: OnceLock::new(),
        }
    }

    pub fn is_watch(&self) -> bool {
        self.watch.is_some()
    }

    /// Absolute path of the output file, if the output is a single file.
    pub fn outfile(&self) -> Option<PathBuf> {
        match &self.output {
            OutputTarget::File(path) => Some(self.cwd.join(path)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_with_extras() {
        let raw = RawBuildConfig::from_json(
            r#"{
                "entry": "src/main.ts",
                "outfile": "dist/out.js",
                "sourcemap": "external",
                "tsc": "off",
                "platform": "node",
                "define": { "VERSION": "\"1\"" }
            }"#,
        )
        .unwrap();

        assert_eq!(raw.entry_points, Some(EntryPoints::One("src/main.ts".into())));
        assert_eq!(raw.sourcemap, Some(SourceMapMode::External));
        assert_eq!(raw.typecheck, Some(RawTypeCheck::Mode("off".into())));
        assert_eq!(raw.extra.get("platform"), Some(&serde_json::json!("node")));
        assert!(!raw.extra.contains_key("outfile"));
    }

    #[test]
    fn parse_toml() {
        let raw = RawBuildConfig::from_toml(
            r#"
            entryPoints = ["a.ts", "b.ts"]
            outdir = "dist"
            watch = { ignore = ["**/*.test.ts"] }
            sourcemap = true
            "#,
        )
        .unwrap();
        assert_eq!(
            raw.entry_points.map(EntryPoints::into_vec),
            Some(vec!["a.ts".to_string(), "b.ts".to_string()])
        );
        assert_eq!(raw.sourcemap, Some(SourceMapMode::Linked));
        assert_eq!(
            raw.watch.and_then(RawWatch::into_options).map(|w| w.ignore),
            Some(vec!["**/*.test.ts".to_string()])
        );
    }

    #[test]
    fn sourcemap_rejects_unknown() {
        let err = RawBuildConfig::from_json(r#"{ "sourcemap": "both" }"#).unwrap_err();
        assert!(err.to_string().contains("sourcemap"), "{err}");
    }
}
