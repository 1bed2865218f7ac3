//! The bundler we drive, and an implementation that shells out to `esbuild`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use compact_str::CompactString;
use esb_types::{Location, Message};
use serde_json::Value;
use tokio::process::Command;

/// Options for a single bundler invocation, spelled the way the bundler spells them.
pub type BundlerOptions = serde_json::Map<String, Value>;

/// A successful bundler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundlerResult {
    pub warnings: Vec<Message>,
}

/// A failed bundler run.
///
/// `errors` is `None` when the bundler failed without telling us why in a structured way, e.g.
/// it crashed.
#[derive(Debug, Clone, Default, thiserror::Error)]
#[error("{message}")]
pub struct BundlerFailure {
    pub message: String,
    pub errors: Option<Vec<Message>>,
    pub warnings: Vec<Message>,
    /// Backtrace or other debugging context.
    pub trace: Option<String>,
}

impl BundlerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        BundlerFailure {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Bundler: Send + Sync + 'static {
    /// Run the bundler once, relative to the project directory `cwd`.
    async fn build(&self, options: BundlerOptions, cwd: &Path) -> Result<BundlerResult, BundlerFailure>;
}

/// [`Bundler`] that runs the `esbuild` executable.
#[derive(Debug, Clone)]
pub struct EsbuildCli {
    bin: CompactString,
}

impl EsbuildCli {
    pub fn new(bin: impl Into<CompactString>) -> Self {
        EsbuildCli { bin: bin.into() }
    }

    fn resolve_bin(&self, cwd: &Path) -> Result<PathBuf, BundlerFailure> {
        let local = cwd.join("node_modules").join(".bin").join(self.bin.as_str());
        if local.is_file() {
            return Ok(local);
        }
        which::which(self.bin.as_str())
            .map_err(|err| BundlerFailure::new(format!("bundler {:?} not found: {err}", self.bin)))
    }
}

#[async_trait]
impl Bundler for EsbuildCli {
    async fn build(&self, options: BundlerOptions, cwd: &Path) -> Result<BundlerResult, BundlerFailure> {
        let bin = self.resolve_bin(cwd)?;
        let args = command_line(&options);
        tracing::debug!(bin = %bin.display(), ?args, "running bundler");

        let output = Command::new(&bin)
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| BundlerFailure::new(format!("failed to run {}: {err}", bin.display())))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = parse_diagnostics(&stderr);

        if output.status.success() {
            return Ok(BundlerResult {
                warnings: diagnostics.warnings,
            });
        }

        let message = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
            .unwrap_or_else(|| format!("bundler exited with {}", output.status));
        Err(BundlerFailure {
            message,
            errors: (!diagnostics.errors.is_empty()).then_some(diagnostics.errors),
            warnings: diagnostics.warnings,
            trace: Some(stderr.into_owned()),
        })
    }
}

/// Translate `options` into `esbuild` command line arguments.
fn command_line(options: &BundlerOptions) -> Vec<String> {
    let mut args = vec!["--color=false".to_string(), "--log-level=warning".to_string()];

    for (key, value) in options {
        if key == "entryPoints" {
            match value {
                Value::Array(entries) => args.extend(entries.iter().map(flag_value)),
                other => args.push(flag_value(other)),
            }
            continue;
        }

        let flag = kebab_case(key);
        match value {
            Value::Null => {}
            Value::Bool(true) => args.push(format!("--{flag}")),
            Value::Bool(false) => {
                // Booleans that default to true need to be turned off explicitly.
                if matches!(key.as_str(), "write" | "treeShaking") {
                    args.push(format!("--{flag}=false"));
                }
            }
            Value::Object(entries) => {
                for (name, value) in entries {
                    args.push(format!("--{flag}:{name}={}", flag_value(value)));
                }
            }
            Value::Array(items) => {
                for item in items {
                    args.push(format!("--{flag}:{}", flag_value(item)));
                }
            }
            other => args.push(format!("--{flag}={}", flag_value(other))),
        }
    }

    args
}

fn flag_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kebab_case(key: &str) -> String {
    let mut flag = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            flag.push('-');
            flag.push(c.to_ascii_lowercase());
        } else {
            flag.push(c);
        }
    }
    flag
}

#[derive(Debug, Default)]
struct Diagnostics {
    warnings: Vec<Message>,
    errors: Vec<Message>,
}

/// Parse the human readable diagnostics `esbuild` prints to stderr.
///
/// ```text
/// ✘ [ERROR] Could not resolve "./missing"
///
///     src/index.ts:1:7:
///       1 │ import "./missing"
/// ```
fn parse_diagnostics(stderr: &str) -> Diagnostics {
    let mut diagnostics = Diagnostics::default();
    // Whether the last message seen was an error.
    let mut last: Option<bool> = None;

    for line in stderr.lines() {
        let trimmed = line.trim();
        if let Some(text) = strip_marker(trimmed, "[WARNING]") {
            diagnostics.warnings.push(Message::new(text));
            last = Some(false);
        } else if let Some(text) = strip_marker(trimmed, "[ERROR]") {
            diagnostics.errors.push(Message::new(text));
            last = Some(true);
        } else if let Some(location) = parse_location(trimmed) {
            let message = match last {
                Some(true) => diagnostics.errors.last_mut(),
                Some(false) => diagnostics.warnings.last_mut(),
                None => None,
            };
            if let Some(message) = message {
                message.location.get_or_insert(location);
            }
        }
    }

    diagnostics
}

fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let (_, rest) = line.split_once(marker)?;
    let text = rest.trim();
    // Drop a trailing `[plugin-name]` style tag.
    let text = match text.rfind(" [") {
        Some(idx) if text.ends_with(']') => &text[..idx],
        _ => text,
    };
    Some(text.trim())
}

/// `src/index.ts:1:7:`
fn parse_location(line: &str) -> Option<Location> {
    let line = line.strip_suffix(':')?;
    let mut parts = line.rsplitn(3, ':');
    let column = parts.next()?.parse().ok()?;
    let row = parts.next()?.parse().ok()?;
    let file = parts.next()?;
    if file.is_empty() || file.contains(char::is_whitespace) {
        return None;
    }
    Some(Location {
        file: file.to_string(),
        line: row,
        column,
    })
}
