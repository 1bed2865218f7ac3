//! Turning what the user wrote into a [`BuildConfig`].

use std::fmt;
use std::path::{Path, PathBuf};

use esb_ore::path::{DEPENDENCY_DIR_NAME, absolutize};
use esb_types::config::TOOL_OPTION_KEYS;
use esb_types::{
    BuildConfig, OutputTarget, RawBuildConfig, RawTypeCheck, SourceMapMode, TypeCheckMode,
    TypeCheckSettings,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use serde_json::Value;

use crate::Error;

/// Options of the bundler we know about. Anything else still gets passed through, but the
/// user gets a warning in case it's a typo.
pub static BUNDLER_OPTION_KEYS: &[&str] = &[
    "absWorkingDir",
    "alias",
    "allowOverwrite",
    "assetNames",
    "banner",
    "bundle",
    "charset",
    "chunkNames",
    "color",
    "conditions",
    "define",
    "drop",
    "dropLabels",
    "entryNames",
    "entryPoints",
    "external",
    "footer",
    "format",
    "globalName",
    "ignoreAnnotations",
    "inject",
    "jsx",
    "jsxDev",
    "jsxFactory",
    "jsxFragment",
    "jsxImportSource",
    "jsxSideEffects",
    "keepNames",
    "legalComments",
    "lineLimit",
    "loader",
    "logLevel",
    "logLimit",
    "logOverride",
    "mainFields",
    "mangleCache",
    "mangleProps",
    "mangleQuoted",
    "metafile",
    "minify",
    "minifyIdentifiers",
    "minifySyntax",
    "minifyWhitespace",
    "nodePaths",
    "outbase",
    "outdir",
    "outExtension",
    "outfile",
    "packages",
    "platform",
    "plugins",
    "preserveSymlinks",
    "publicPath",
    "pure",
    "reserveProps",
    "resolveExtensions",
    "sourceRoot",
    "sourcefile",
    "sourcemap",
    "sourcesContent",
    "splitting",
    "stdin",
    "supported",
    "target",
    "treeShaking",
    "tsconfig",
    "tsconfigRaw",
    "write",
];

/// Values from the command line, these win over the config.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub entry_points: Vec<String>,
    pub watch: Option<bool>,
    pub debug: Option<bool>,
    pub quiet: Option<bool>,
    pub clear: Option<bool>,
    pub color: Option<bool>,
    pub outfile: Option<PathBuf>,
    pub outdir: Option<PathBuf>,
    pub bundle: Option<bool>,
    pub minify: Option<bool>,
    pub sourcemap: Option<SourceMapMode>,
    /// `--diag` / `--no-diag`.
    pub diag: Option<bool>,
    /// `--esbuild <json>`, passed through to the bundler.
    pub bundler: serde_json::Map<String, Value>,
}

/// Something about the config that's worth telling the user, but not fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub message: String,
    /// The key isn't one we know, as opposed to a known key that moved.
    pub unknown: bool,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.key, self.message)
    }
}

/// Normalize `raw` with `cli` applied on top of it.
pub fn normalize(
    raw: RawBuildConfig,
    cli: &CliOverrides,
) -> Result<(BuildConfig, Vec<ConfigWarning>), Error> {
    let mut warnings = Vec::new();

    let process_cwd = std::env::current_dir().map_err(|err| Error::io(".", err))?;
    let cwd = match &raw.cwd {
        Some(cwd) => absolutize(cwd, &process_cwd),
        None => process_cwd,
    };
    // File watchers report resolved paths, so everything derived from `cwd` has to be too.
    let cwd = std::fs::canonicalize(&cwd).unwrap_or(cwd);

    let mut entry_points = if !cli.entry_points.is_empty() {
        cli.entry_points.clone()
    } else {
        raw.entry_points
            .map(|entries| entries.into_vec())
            .unwrap_or_default()
    };
    entry_points.retain(|entry| !entry.trim().is_empty());
    if entry_points.is_empty() {
        entry_points = infer_entry_points(&cwd)?;
    }
    if entry_points.is_empty() {
        return Err(Error::config("no entry points"));
    }

    let outfile = cli.outfile.clone().or(raw.outfile);
    let outdir = cli.outdir.clone().or(raw.outdir);
    let output = match (outfile, outdir) {
        (Some(_), Some(_)) => {
            return Err(Error::config("outfile and outdir can't both be set"));
        }
        (Some(file), None) => OutputTarget::File(file),
        (None, Some(dir)) => OutputTarget::Dir(dir),
        (None, None) => OutputTarget::None,
    };

    let watch = match (cli.watch, raw.watch) {
        (Some(false), _) => None,
        (Some(true), watch) => Some(watch.and_then(|w| w.into_options()).unwrap_or_default()),
        (None, watch) => watch.and_then(|w| w.into_options()),
    };

    let mut typecheck = match raw.typecheck {
        Some(raw) => typecheck_mode(raw, &mut warnings)?,
        None => TypeCheckMode::Auto,
    };
    match cli.diag {
        Some(false) => typecheck = TypeCheckMode::Off,
        Some(true) if matches!(typecheck, TypeCheckMode::Off | TypeCheckMode::Auto) => {
            typecheck = TypeCheckMode::On;
        }
        _ => {}
    }

    let define = raw
        .define
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect();

    let mut extra = raw.extra;
    extra.extend(cli.bundler.clone());
    if let Some(limit) = extra.remove("errorLimit") {
        warnings.push(ConfigWarning {
            key: "errorLimit".to_string(),
            message: "renamed to \"logLimit\"".to_string(),
            unknown: false,
        });
        extra.entry("logLimit").or_insert(limit);
    }
    for key in extra.keys() {
        if !BUNDLER_OPTION_KEYS.contains(&key.as_str()) && !TOOL_OPTION_KEYS.contains(&key.as_str()) {
            warnings.push(ConfigWarning {
                key: key.clone(),
                message: "unknown option, passing it to the bundler as is".to_string(),
                unknown: true,
            });
        }
    }

    let config = BuildConfig {
        entry_points,
        output,
        watch,
        debug: cli.debug.or(raw.debug).unwrap_or(false),
        quiet: cli.quiet.or(raw.quiet).unwrap_or(false),
        clear: cli.clear.or(raw.clear).unwrap_or(true),
        color: cli
            .color
            .or(raw.color)
            .unwrap_or_else(esb_ore::env::stderr_supports_color),
        bundle: cli.bundle.or(raw.bundle),
        minify: cli.minify.or(raw.minify),
        write: raw.write,
        sourcemap: cli.sourcemap.or(raw.sourcemap).unwrap_or_default(),
        typecheck,
        outfile_mode: raw.outfile_mode,
        define,
        extra,
        hooks: raw.hooks,
        ..BuildConfig::new(Vec::new(), cwd)
    };

    Ok((config, warnings))
}

fn typecheck_mode(
    raw: RawTypeCheck,
    warnings: &mut Vec<ConfigWarning>,
) -> Result<TypeCheckMode, Error> {
    let named = |mode: &str| match mode {
        "off" | "false" => Ok(TypeCheckMode::Off),
        "auto" => Ok(TypeCheckMode::Auto),
        "on" | "true" => Ok(TypeCheckMode::On),
        other => Err(Error::config(format!(
            "invalid typecheck mode {other:?}, expected \"off\", \"auto\", or \"on\""
        ))),
    };

    match raw {
        RawTypeCheck::Enabled(false) => Ok(TypeCheckMode::Off),
        RawTypeCheck::Enabled(true) => Ok(TypeCheckMode::On),
        RawTypeCheck::Mode(mode) => named(&mode),
        RawTypeCheck::Settings(settings) => {
            let mode = named(settings.mode.as_deref().unwrap_or("auto"))?;
            if mode == TypeCheckMode::Off {
                return Ok(TypeCheckMode::Off);
            }

            let mut migrations = Vec::new();
            let mut tsconfig = settings.tsconfig;
            if let Some(project) = settings.project {
                let message = "\"typecheck.project\" is deprecated, use \"typecheck.tsconfig\"";
                warnings.push(ConfigWarning {
                    key: "typecheck.project".to_string(),
                    message: message.to_string(),
                    unknown: false,
                });
                migrations.push(message.to_string());
                tsconfig.get_or_insert(project);
            }

            Ok(TypeCheckMode::Custom(TypeCheckSettings {
                required: mode == TypeCheckMode::On,
                tsconfig,
                args: settings.args,
                migrations,
            }))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TsConfig {
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

/// Extensions we consider an entry point when expanding `include` globs.
static SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"];

/// Entry points from the `tsconfig.json` in `cwd`: its `files`, or else the first file matched
/// by `include` and not by `exclude`.
fn infer_entry_points(cwd: &Path) -> Result<Vec<String>, Error> {
    let path = cwd.join("tsconfig.json");
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::io(path, err)),
    };
    let tsconfig: TsConfig = match serde_json::from_str(&raw) {
        Ok(tsconfig) => tsconfig,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "can't infer entry points from tsconfig");
            return Ok(Vec::new());
        }
    };

    if !tsconfig.files.is_empty() {
        return Ok(tsconfig.files);
    }
    if tsconfig.include.is_empty() {
        return Ok(Vec::new());
    }

    let include = tsconfig_globs(&tsconfig.include)?;
    let exclude = tsconfig_globs(&tsconfig.exclude)?;

    let walker = walkdir::WalkDir::new(cwd)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name();
            entry.depth() == 0
                || !(name == DEPENDENCY_DIR_NAME || name.to_string_lossy().starts_with('.'))
        });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(%err, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let is_source = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
        if !is_source {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(cwd) else {
            continue;
        };
        if include.is_match(relative) && !exclude.is_match(relative) {
            let entry = relative.to_string_lossy().replace('\\', "/");
            tracing::debug!(%entry, "inferred entry point from tsconfig");
            return Ok(vec![entry]);
        }
    }

    Ok(Vec::new())
}

/// `tsconfig.json` patterns without a wildcard or extension name a directory.
fn tsconfig_globs(patterns: &[String]) -> Result<GlobSet, Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
        let is_dir = !pattern.contains(['*', '?']) && Path::new(pattern).extension().is_none();
        let pattern = if is_dir {
            format!("{pattern}/**")
        } else {
            pattern.to_string()
        };
        let glob = Glob::new(&pattern)
            .map_err(|err| Error::config(format!("invalid tsconfig pattern {pattern:?}: {err}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|err| Error::config(format!("invalid tsconfig patterns: {err}")))
}

#[cfg(test)]
mod tests {
    use esb_types::WatchOptions;

    use super::*;

    fn raw(json: &str, cwd: &Path) -> RawBuildConfig {
        let mut raw = RawBuildConfig::from_json(json).unwrap();
        raw.cwd = Some(cwd.to_path_buf());
        raw
    }

    #[test]
    fn entry_points_string_or_list() {
        let dir = tempfile::tempdir().unwrap();

        let (config, _) =
            normalize(raw(r#"{"entry": "src/a.ts"}"#, dir.path()), &CliOverrides::default()).unwrap();
        assert_eq!(config.entry_points, vec!["src/a.ts".to_string()]);
        assert_eq!(config.cwd, dir.path().canonicalize().unwrap());

        let (config, _) = normalize(
            raw(r#"{"entryPoints": ["b.ts", "a.ts"]}"#, dir.path()),
            &CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.entry_points, vec!["b.ts".to_string(), "a.ts".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn cwd_is_resolved_through_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let (config, _) =
            normalize(raw(r#"{"entry": "a.ts"}"#, &link), &CliOverrides::default()).unwrap();
        assert_eq!(config.cwd, real.canonicalize().unwrap());

        // Directories that don't exist yet keep their lexical form.
        let missing = dir.path().join("missing");
        let (config, _) =
            normalize(raw(r#"{"entry": "a.ts"}"#, &missing), &CliOverrides::default()).unwrap();
        assert_eq!(config.cwd, missing);
    }

    #[test]
    fn no_entry_points() {
        let dir = tempfile::tempdir().unwrap();
        let err = normalize(raw("{}", dir.path()), &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg == "no entry points"));
    }

    #[test]
    fn infers_from_tsconfig_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tsconfig.json"),
            r#"{"files": ["src/main.ts", "src/other.ts"]}"#,
        )
        .unwrap();

        let (config, _) = normalize(raw("{}", dir.path()), &CliOverrides::default()).unwrap();
        assert_eq!(config.entry_points, vec!["src/main.ts".to_string(), "src/other.ts".to_string()]);
    }

    #[test]
    fn infers_from_tsconfig_include() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("gen")).unwrap();
        std::fs::write(src.join("gen/a.ts"), "").unwrap();
        std::fs::write(src.join("index.ts"), "").unwrap();
        std::fs::write(src.join("README.md"), "").unwrap();
        std::fs::write(
            dir.path().join("tsconfig.json"),
            r#"{"include": ["src"], "exclude": ["src/gen"]}"#,
        )
        .unwrap();

        let (config, _) = normalize(raw("{}", dir.path()), &CliOverrides::default()).unwrap();
        assert_eq!(config.entry_points, vec!["src/index.ts".to_string()]);
    }

    #[test]
    fn cli_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            entry_points: vec!["cli.ts".to_string()],
            watch: Some(true),
            debug: Some(true),
            outdir: Some("build".into()),
            sourcemap: Some(SourceMapMode::Inline),
            diag: Some(false),
            ..Default::default()
        };
        let (config, _) = normalize(
            raw(
                r#"{"entry": "a.ts", "debug": false, "sourcemap": "external", "tsc": "on"}"#,
                dir.path(),
            ),
            &cli,
        )
        .unwrap();

        assert_eq!(config.entry_points, vec!["cli.ts".to_string()]);
        assert_eq!(config.watch, Some(WatchOptions::default()));
        assert!(config.debug);
        assert_eq!(config.output, OutputTarget::Dir("build".into()));
        assert_eq!(config.sourcemap, SourceMapMode::Inline);
        assert_eq!(config.typecheck, TypeCheckMode::Off);
    }

    #[test]
    fn output_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            outdir: Some("build".into()),
            ..Default::default()
        };
        let err = normalize(raw(r#"{"entry": "a.ts", "outfile": "out.js"}"#, dir.path()), &cli)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_keys_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let (config, warnings) = normalize(
            raw(
                r#"{
                    "entry": "a.ts",
                    "errorLimit": 3,
                    "platform": "node",
                    "frobnicate": true,
                    "typecheck": { "project": "tsconfig.app.json", "args": ["--strict"] },
                    "define": { "VERSION": "\"1.0\"", "ENABLED": true }
                }"#,
                dir.path(),
            ),
            &CliOverrides::default(),
        )
        .unwrap();

        assert_eq!(config.extra.get("logLimit"), Some(&Value::from(3)));
        assert!(config.extra.get("errorLimit").is_none());
        assert_eq!(config.extra.get("frobnicate"), Some(&Value::Bool(true)));
        assert_eq!(config.define.get("VERSION").map(String::as_str), Some("\"1.0\""));
        assert_eq!(config.define.get("ENABLED").map(String::as_str), Some("true"));

        let keys: Vec<_> = warnings.iter().map(|w| w.key.as_str()).collect();
        assert!(keys.contains(&"errorLimit"));
        assert!(keys.contains(&"frobnicate"));
        assert!(keys.contains(&"typecheck.project"));
        assert!(!keys.contains(&"platform"));
        let unknown: Vec<_> = warnings
            .iter()
            .filter(|w| w.unknown)
            .map(|w| w.key.as_str())
            .collect();
        assert_eq!(unknown, vec!["frobnicate"]);

        let TypeCheckMode::Custom(settings) = &config.typecheck else {
            panic!("expected custom typecheck settings, got {:?}", config.typecheck);
        };
        assert_eq!(settings.tsconfig, Some(PathBuf::from("tsconfig.app.json")));
        assert_eq!(settings.args, vec!["--strict".to_string()]);
        assert!(!settings.required);
        assert_eq!(settings.migrations.len(), 1);
    }

    #[test]
    fn typecheck_modes() {
        let mut warnings = Vec::new();
        let mode = |json: &str, warnings: &mut Vec<ConfigWarning>| {
            typecheck_mode(serde_json::from_str(json).unwrap(), warnings)
        };
        assert_eq!(mode("false", &mut warnings).unwrap(), TypeCheckMode::Off);
        assert_eq!(mode("true", &mut warnings).unwrap(), TypeCheckMode::On);
        assert_eq!(mode(r#""auto""#, &mut warnings).unwrap(), TypeCheckMode::Auto);
        assert_eq!(mode(r#"{"mode": "off"}"#, &mut warnings).unwrap(), TypeCheckMode::Off);
        assert!(mode(r#""sometimes""#, &mut warnings).is_err());
        assert!(warnings.is_empty());
    }
}
