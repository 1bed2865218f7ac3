//! A single build cycle: hooks, the bundler, and everything we do with its output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use esb_ore::cancel::CancelToken;
use esb_types::{
    BuildConfig, BuildOutcome, EndEvent, HookOutcome, Message, OutputTarget, ProjectId, StartEvent,
};
use serde_json::Value;

use crate::bundler::{Bundler, BundlerFailure, BundlerOptions};
use crate::outmode::apply_output_mode;
use crate::report::Reporter;
use crate::sourcemap::patch_source_map;
use crate::Error;

/// Keys that may show up in the pass-through options but only mean something to us.
static PRIVATE_KEYS: &[&str] = &[
    "entry",
    "cwd",
    "watch",
    "debug",
    "quiet",
    "clear",
    "color",
    "typecheck",
    "tsc",
    "outfileMode",
];

/// Where the bundler writes build metadata for the project `id`.
pub fn metafile_path(metadata_dir: &Path, id: &ProjectId) -> PathBuf {
    metadata_dir.join(format!("esb-{id}.meta.json"))
}

/// Everything a cycle needs to know about the build it's part of.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub config: Arc<BuildConfig>,
    pub id: ProjectId,
    pub token: CancelToken,
    /// Number of cycles that completed before this one.
    pub completed: u64,
    pub metadata_dir: PathBuf,
}

impl CycleContext {
    pub fn is_initial(&self) -> bool {
        self.completed == 0
    }
}

/// Runs build cycles against a [`Bundler`].
pub struct BuildExecutor {
    bundler: Arc<dyn Bundler>,
}

impl std::fmt::Debug for BuildExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildExecutor").finish_non_exhaustive()
    }
}

impl BuildExecutor {
    pub fn new(bundler: Arc<dyn Bundler>) -> Self {
        BuildExecutor { bundler }
    }

    /// Run one cycle. `changed` holds the files that triggered it, empty for the first one.
    ///
    /// Only config and hook errors are returned as `Err`, a failing bundler is a failed
    /// [`BuildOutcome`].
    pub async fn execute(
        &self,
        cycle: &CycleContext,
        changed: &[PathBuf],
    ) -> Result<BuildOutcome, Error> {
        if cycle.token.is_cancelled() {
            tracing::debug!(project = %cycle.id, "build canceled, skipping cycle");
            return Ok(BuildOutcome::noop());
        }

        let config = &cycle.config;
        let reporter = Reporter::new(config.color, config.quiet);
        if config.is_watch() && config.clear && !cycle.is_initial() {
            reporter.clear_screen();
        }

        config
            .hooks
            .on_start(StartEvent {
                config: Arc::clone(config),
                changed: changed.to_vec(),
            })
            .await
            .map_err(Error::Hook)?;

        let options = bundler_options(cycle);
        if cycle.token.is_cancelled() {
            tracing::debug!(project = %cycle.id, "build canceled, not starting the bundler");
            return Ok(BuildOutcome::noop());
        }

        let started = Instant::now();
        let result = self.bundler.build(options, &config.cwd).await;
        let elapsed = started.elapsed();
        tracing::debug!(project = %cycle.id, ok = result.is_ok(), ?elapsed, "bundler finished");

        let mut outcome = match result {
            Ok(result) => {
                for warning in &result.warnings {
                    reporter.warning(warning);
                }
                if config.write != Some(false) {
                    let outputs = written_files(config);
                    let bytes = outputs
                        .iter()
                        .filter_map(|path| std::fs::metadata(path).ok())
                        .map(|metadata| metadata.len())
                        .sum();
                    if let Some(output) = config.output.path() {
                        reporter.summary(&output.display().to_string(), bytes, elapsed);
                    }
                    if config.sourcemap.writes_map_file() {
                        patch_source_maps(config, &outputs).await;
                    }
                }
                BuildOutcome::success(result.warnings)
            }
            Err(mut failure) => {
                let warnings = std::mem::take(&mut failure.warnings);
                let errors = failure_messages(failure, config.debug);
                for error in &errors {
                    reporter.error(error);
                }
                BuildOutcome::failure(warnings, errors)
            }
        };

        let hook = config
            .hooks
            .on_end(EndEvent {
                config: Arc::clone(config),
                outcome: outcome.clone(),
                changed: changed.to_vec(),
            })
            .await
            .map_err(Error::Hook)?;
        if let HookOutcome::Override(ok) = hook {
            if ok != outcome.ok {
                tracing::debug!(project = %cycle.id, ok, "on_end hook overrode the build result");
            }
            outcome.ok = ok;
        }

        if outcome.ok {
            if let (Some(spec), Some(outfile)) = (&config.outfile_mode, config.outfile()) {
                if let Err(err) = apply_output_mode(&outfile, spec).await {
                    reporter.error(&Message::new(err.to_string()));
                    outcome.ok = false;
                }
            }
        }

        Ok(outcome)
    }
}

/// The options we hand to the bundler for `cycle`.
pub fn bundler_options(cycle: &CycleContext) -> BundlerOptions {
    let config = &cycle.config;
    let mut options = BundlerOptions::new();

    options.insert(
        "entryPoints".to_string(),
        Value::from(config.entry_points.clone()),
    );
    match &config.output {
        OutputTarget::File(path) => {
            options.insert("outfile".to_string(), path_value(path));
        }
        OutputTarget::Dir(path) => {
            options.insert("outdir".to_string(), path_value(path));
        }
        OutputTarget::None => {}
    }
    if let Some(bundle) = config.bundle {
        options.insert("bundle".to_string(), Value::Bool(bundle));
    }
    options.insert(
        "minify".to_string(),
        Value::Bool(config.minify.unwrap_or(!config.debug)),
    );
    options.insert("sourcemap".to_string(), config.sourcemap.bundler_value());
    if let Some(write) = config.write {
        options.insert("write".to_string(), Value::Bool(write));
    }

    let mut define: serde_json::Map<String, Value> = config
        .define
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    define
        .entry("DEBUG")
        .or_insert_with(|| Value::String(config.debug.to_string()));

    for (key, value) in &config.extra {
        if PRIVATE_KEYS.contains(&key.as_str()) {
            continue;
        }
        match (key.as_str(), value) {
            ("define", Value::Object(extra)) => define.extend(extra.clone()),
            _ => {
                options.insert(key.clone(), value.clone());
            }
        }
    }
    options.insert("define".to_string(), Value::Object(define));

    if config.is_watch() {
        let metafile = metafile_path(&cycle.metadata_dir, &cycle.id);
        options.insert("metafile".to_string(), path_value(&metafile));
        if config.output == OutputTarget::None && config.write == Some(false) {
            let scratch = cycle.metadata_dir.join(format!("esb-{}.out.js", cycle.id));
            options.insert("outfile".to_string(), path_value(&scratch));
        }
    }

    options
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

/// Messages for a failed bundler run, synthesizing one if the bundler didn't give us any.
fn failure_messages(failure: BundlerFailure, debug: bool) -> Vec<Message> {
    match failure.errors {
        Some(errors) if !errors.is_empty() => errors,
        _ => {
            let mut message = Message::new(failure.message);
            if debug {
                message.detail = failure.trace;
            }
            vec![message]
        }
    }
}

/// Files the last cycle wrote, as far as we can tell from the config.
fn written_files(config: &BuildConfig) -> Vec<PathBuf> {
    match &config.output {
        OutputTarget::None => Vec::new(),
        OutputTarget::File(path) => {
            let file = config.cwd.join(path);
            let map = map_path(&file);
            [file, map].into_iter().filter(|path| path.is_file()).collect()
        }
        OutputTarget::Dir(path) => walkdir::WalkDir::new(config.cwd.join(path))
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect(),
    }
}

fn map_path(file: &Path) -> PathBuf {
    let mut map = file.as_os_str().to_owned();
    map.push(".map");
    PathBuf::from(map)
}

/// Patch every source map among `outputs`. Failures are logged, they don't fail the build.
async fn patch_source_maps(config: &BuildConfig, outputs: &[PathBuf]) {
    let maps = outputs
        .iter()
        .filter(|path| path.extension().is_some_and(|ext| ext == "map"));
    for map in maps {
        if let Err(err) = patch_source_map(map, &config.cwd).await {
            tracing::warn!(map = %map.display(), %err, "failed to patch source map");
        }
    }
}

#[cfg(test)]
mod tests {
    use esb_types::WatchOptions;

    use super::*;

    fn cycle(config: BuildConfig) -> CycleContext {
        let id = crate::project_id(&config).clone();
        CycleContext {
            config: Arc::new(config),
            id,
            token: CancelToken::new(),
            completed: 0,
            metadata_dir: PathBuf::from("/tmp/meta"),
        }
    }

    #[test]
    fn options_defaults() {
        let mut config = BuildConfig::new(vec!["a.ts".to_string()], PathBuf::from("/proj"));
        config.output = OutputTarget::File("out.js".into());
        config.define.insert("VERSION".to_string(), "\"1\"".to_string());
        config.extra.insert("platform".to_string(), Value::from("node"));
        config.extra.insert("watch".to_string(), Value::Bool(true));

        let options = bundler_options(&cycle(config));
        assert_eq!(options["entryPoints"], serde_json::json!(["a.ts"]));
        assert_eq!(options["outfile"], "out.js");
        assert_eq!(options["minify"], true);
        assert_eq!(options["sourcemap"], false);
        assert_eq!(options["platform"], "node");
        assert_eq!(options["define"]["DEBUG"], "false");
        assert_eq!(options["define"]["VERSION"], "\"1\"");
        assert!(options.get("watch").is_none());
        assert!(options.get("metafile").is_none());
    }

    #[test]
    fn options_watch() {
        let mut config = BuildConfig::new(vec!["a.ts".to_string()], PathBuf::from("/proj"));
        config.watch = Some(WatchOptions::default());
        config.write = Some(false);
        config.debug = true;
        let cycle = cycle(config);

        let options = bundler_options(&cycle);
        let metafile = metafile_path(&cycle.metadata_dir, &cycle.id);
        assert_eq!(options["metafile"], &*metafile.to_string_lossy());
        assert!(options["outfile"].as_str().unwrap().ends_with(".out.js"));
        assert_eq!(options["minify"], false);
        assert_eq!(options["define"]["DEBUG"], "true");
    }

    #[test]
    fn synthesized_failure() {
        let failure = BundlerFailure {
            message: "boom".to_string(),
            trace: Some("at foo".to_string()),
            ..Default::default()
        };
        let errors = failure_messages(failure.clone(), false);
        assert_eq!(errors, vec![Message::new("boom")]);

        let errors = failure_messages(failure, true);
        assert_eq!(errors[0].detail.as_deref(), Some("at foo"));
    }
}
