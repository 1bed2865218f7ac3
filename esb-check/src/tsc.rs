use std::path::{Path, PathBuf};
use std::process::Stdio;

use compact_str::CompactString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::{Error, TypeCheckHandle, TypeCheckOptions, TypeCheckReporter, TypeChecker};

/// Runs `tsc --noEmit` as a subprocess.
#[derive(Debug, Clone)]
pub struct TscChecker {
    bin: CompactString,
}

impl TscChecker {
    pub fn new(bin: impl Into<CompactString>) -> Self {
        TscChecker { bin: bin.into() }
    }

    /// Prefer the project's own install over whatever is on `$PATH`.
    fn resolve_bin(&self, cwd: &Path) -> Result<PathBuf, Error> {
        let local = cwd.join("node_modules").join(".bin").join(self.bin.as_str());
        if local.is_file() {
            return Ok(local);
        }
        which::which(self.bin.as_str()).map_err(|source| Error::NotFound {
            bin: self.bin.to_string(),
            source,
        })
    }
}

impl TypeChecker for TscChecker {
    fn start(&self, options: TypeCheckOptions) -> TypeCheckHandle {
        let (handle, reporter) = TypeCheckHandle::pending();
        for migration in &options.migrations {
            tracing::warn!("typecheck config: {migration}");
        }

        match self.resolve_bin(&options.cwd) {
            Ok(bin) => {
                tokio::spawn(async move {
                    if let Err(err) = run(bin, options, &reporter).await {
                        tracing::error!("{err}");
                        if reporter.reported().is_none() {
                            reporter.report(false);
                        }
                    }
                });
            }
            Err(err) => {
                tracing::error!("{err}");
                reporter.report(false);
            }
        }

        handle
    }
}

fn command(bin: &Path, options: &TypeCheckOptions) -> Command {
    let mut cmd = Command::new(bin);
    cmd.arg("--noEmit")
        .arg("--pretty")
        .arg(if options.color { "true" } else { "false" });
    if let Some(tsconfig) = &options.tsconfig {
        cmd.arg("--project").arg(tsconfig);
    }
    if options.watch {
        cmd.arg("--watch");
        if !options.clear_screen {
            cmd.arg("--preserveWatchOutput");
        }
    }
    cmd.args(&options.args)
        .current_dir(&options.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    cmd
}

async fn run(bin: PathBuf, options: TypeCheckOptions, reporter: &TypeCheckReporter) -> Result<(), Error> {
    let mut child = command(&bin, &options).spawn()?;
    tracing::debug!(bin = %bin.display(), watch = options.watch, "type checker started");

    let mut lines = child.stdout.take().map(|stdout| BufReader::new(stdout).lines());
    let token = reporter.token().clone();

    while let Some(reader) = lines.as_mut() {
        let line = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("killing type checker");
                child.kill().await?;
                return Ok(());
            }
            line = reader.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        if !options.quiet || line.contains("error") {
            eprintln!("{line}");
        }
        if let Some(errors) = error_count(&line) {
            reporter.report(errors == 0);
        }
    }

    let status = tokio::select! {
        _ = token.cancelled() => {
            child.kill().await?;
            return Ok(());
        }
        status = child.wait() => status?,
    };
    tracing::debug!(?status, "type checker exited");
    // Without `--watch` there's no summary line on success, the exit status decides.
    if !options.watch || reporter.reported().is_none() {
        reporter.report(status.success());
    }

    Ok(())
}

/// Parse the summary line `tsc` prints after each check, e.g. `Found 2 errors in 1 file.`
fn error_count(line: &str) -> Option<usize> {
    let start = line.find("Found ")? + "Found ".len();
    let rest = &line[start..];
    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let count = rest[..digits].parse().ok()?;
    rest[digits..].trim_start().starts_with("error").then_some(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lines() {
        assert_eq!(error_count("Found 0 errors. Watching for file changes."), Some(0));
        assert_eq!(error_count("10:31:02 AM - Found 1 error. Watching for file changes."), Some(1));
        assert_eq!(error_count("Found 12 errors in 3 files."), Some(12));
        assert_eq!(error_count("Found a thing"), None);
        assert_eq!(error_count("src/index.ts(1,7): error TS2322"), None);
    }

    #[test]
    fn command_flags() {
        let options = TypeCheckOptions {
            mode: esb_types::TypeCheckMode::On,
            color: false,
            quiet: false,
            watch: true,
            cwd: PathBuf::from("/proj"),
            clear_screen: false,
            src_dir: PathBuf::from("/proj/src"),
            tsconfig: Some(PathBuf::from("/proj/tsconfig.json")),
            args: vec!["--strict".to_string()],
            migrations: Vec::new(),
        };
        let cmd = command(Path::new("tsc"), &options);
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "--noEmit",
                "--pretty",
                "false",
                "--project",
                "/proj/tsconfig.json",
                "--watch",
                "--preserveWatchOutput",
                "--strict",
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let checker = TscChecker::new("esb-definitely-not-a-real-tsc");
        let handle = checker.start(TypeCheckOptions {
            mode: esb_types::TypeCheckMode::On,
            color: false,
            quiet: true,
            watch: false,
            cwd: dir.path().to_path_buf(),
            clear_screen: false,
            src_dir: dir.path().to_path_buf(),
            tsconfig: None,
            args: Vec::new(),
            migrations: Vec::new(),
        });
        assert!(!handle.wait().await);
    }
}
