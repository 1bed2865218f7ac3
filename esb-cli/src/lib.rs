//! Command line interface of `esb`.
//!
//! A [`Program`] parses our own flags. Programs that embed `esb` can extend the command line
//! with flags of their own through [`Program::extend`], builds wait for that to happen.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgMatches, CommandFactory, Parser};
use esb_core::{CliOverrides, StartGate};
use esb_types::SourceMapMode;
use tracing_subscriber::EnvFilter;

/// Build TypeScript and JavaScript with esbuild, optionally watching for changes.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "esb", disable_version_flag = true)]
pub struct Args {
    /// Entry points, relative to the project directory.
    #[arg(value_name = "ENTRY")]
    pub entry_points: Vec<String>,

    /// Rebuild when input files change.
    #[arg(short = 'w', long)]
    pub watch: bool,
    /// Debug build: no minification and `DEBUG` defined as `true`.
    #[arg(short = 'g', long)]
    pub debug: bool,
    /// Write a linked source map next to the output.
    #[arg(long)]
    pub sourcemap: bool,
    /// Embed the source map in the output.
    #[arg(long)]
    pub inline_sourcemap: bool,
    #[arg(long, overrides_with = "no_color")]
    pub color: bool,
    #[arg(long, overrides_with = "color")]
    pub no_color: bool,
    /// Don't clear the screen between rebuilds.
    #[arg(long)]
    pub no_clear: bool,
    /// Always run the type checker.
    #[arg(long, overrides_with = "no_diag")]
    pub diag: bool,
    /// Never run the type checker.
    #[arg(long, overrides_with = "diag")]
    pub no_diag: bool,
    /// Only print errors.
    #[arg(long)]
    pub quiet: bool,
    #[arg(short = 'o', long, value_name = "FILE", conflicts_with = "outdir")]
    pub outfile: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    pub outdir: Option<PathBuf>,
    #[arg(long)]
    pub bundle: bool,
    #[arg(long)]
    pub minify: bool,
    /// Extra bundler options as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub esbuild: Option<String>,
    /// Build config file, JSON or TOML.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Print the version of esb and exit.
    #[arg(long)]
    pub esb_version: bool,
    /// Verbose logging of esb itself.
    #[arg(long)]
    pub esb_debug: bool,
}

impl Args {
    /// The overrides these flags apply on top of a build config.
    pub fn overrides(&self) -> Result<CliOverrides, anyhow::Error> {
        let bundler = match &self.esbuild {
            Some(json) => match serde_json::from_str(json)? {
                serde_json::Value::Object(options) => options,
                other => anyhow::bail!("--esbuild expects a JSON object, got {other}"),
            },
            None => serde_json::Map::new(),
        };

        let sourcemap = if self.inline_sourcemap {
            Some(SourceMapMode::Inline)
        } else if self.sourcemap {
            Some(SourceMapMode::Linked)
        } else {
            None
        };

        Ok(CliOverrides {
            entry_points: self.entry_points.clone(),
            watch: self.watch.then_some(true),
            debug: self.debug.then_some(true),
            quiet: self.quiet.then_some(true),
            clear: self.no_clear.then_some(false),
            color: flag_pair(self.color, self.no_color),
            outfile: self.outfile.clone(),
            outdir: self.outdir.clone(),
            bundle: self.bundle.then_some(true),
            minify: self.minify.then_some(true),
            sourcemap,
            diag: flag_pair(self.diag, self.no_diag),
            bundler,
        })
    }
}

fn flag_pair(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (_, true) => Some(false),
        (true, false) => Some(true),
        (false, false) => None,
    }
}

/// Parsed command line, plus the [`StartGate`] builds wait on.
#[derive(Debug, Clone)]
pub struct Program {
    args: Args,
    /// Arguments we didn't recognize, left for [`Program::extend`].
    rest: Vec<String>,
    gate: StartGate,
}

impl Program {
    /// Parse the command line of the `esb` binary, unknown flags are an error.
    pub fn standalone<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args = Args::try_parse_from(normalize_args(args))?;
        Ok(Program {
            args,
            rest: Vec::new(),
            gate: StartGate::open(),
        })
    }

    /// Parse our own flags out of the command line of a program that embeds us.
    ///
    /// Builds are held back until the embedding program called [`Program::extend`] or, if it
    /// never calls [`Program::hold`], until the next scheduler tick.
    pub fn embedded<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let (known, rest) = split_known(normalize_args(args));
        let args = Args::try_parse_from(known)?;
        Ok(Program {
            args,
            rest,
            gate: StartGate::deferred(),
        })
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn gate(&self) -> &StartGate {
        &self.gate
    }

    /// Arguments left for the embedding program.
    pub fn rest(&self) -> &[String] {
        &self.rest
    }

    /// Keep builds from starting until [`Program::extend`] is done.
    pub fn hold(&self) {
        self.gate.hold();
    }

    /// Parse the arguments we didn't recognize with `command`, then let builds start.
    ///
    /// Values of unknown flags have to be attached with `=`, e.g. `--port=8080`.
    pub fn extend(&self, command: clap::Command) -> Result<ArgMatches, clap::Error> {
        let matches = command.no_binary_name(true).try_get_matches_from(&self.rest);
        self.gate.release();
        matches
    }
}

/// Rewrite single dash long flags (`-watch`) to their double dash form.
fn normalize_args<I, T>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let command = Args::command();
    let longs: Vec<&str> = command.get_arguments().filter_map(|arg| arg.get_long()).collect();

    let mut seen_separator = false;
    args.into_iter()
        .map(|arg| arg.into().to_string_lossy().into_owned())
        .enumerate()
        .map(|(idx, arg)| {
            if idx == 0 || seen_separator {
                return arg;
            }
            if arg == "--" {
                seen_separator = true;
                return arg;
            }
            match arg.strip_prefix('-') {
                Some(flag) if !flag.starts_with('-') && flag.len() > 1 => {
                    let name = flag.split_once('=').map_or(flag, |(name, _)| name);
                    if longs.contains(&name) {
                        format!("-{arg}")
                    } else {
                        arg
                    }
                }
                _ => arg,
            }
        })
        .collect()
}

/// Split `args` into the ones [`Args`] knows about and everything else.
fn split_known(args: Vec<String>) -> (Vec<String>, Vec<String>) {
    let command = Args::command();
    let mut known = Vec::new();
    let mut rest = Vec::new();
    let mut args = args.into_iter();
    known.extend(args.next());

    while let Some(arg) = args.next() {
        if arg == "--" {
            known.push(arg);
            known.extend(args.by_ref());
            break;
        }

        let flag = if let Some(long) = arg.strip_prefix("--") {
            let name = long.split_once('=').map_or(long, |(name, _)| name);
            command.get_arguments().find(|a| a.get_long() == Some(name))
        } else if let Some(short) = arg.strip_prefix('-').filter(|s| s.chars().count() == 1) {
            command
                .get_arguments()
                .find(|a| a.get_short().map(|c| c.to_string()).as_deref() == Some(short))
        } else if arg.starts_with('-') && arg.len() > 1 {
            None
        } else {
            // Positional, an entry point.
            known.push(arg);
            continue;
        };

        match flag {
            Some(flag) => {
                let takes_value = flag.get_action().takes_values();
                let inline_value = arg.contains('=');
                known.push(arg);
                if takes_value && !inline_value {
                    known.extend(args.next());
                }
            }
            None => rest.push(arg),
        }
    }

    (known, rest)
}

/// Install the global `tracing` subscriber. `RUST_LOG` wins, `debug` only changes the default.
pub fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use clap::{Arg, ArgAction, Command};

    use super::*;

    #[test]
    fn single_dash_long_flags() {
        let args = normalize_args(["esb", "-watch", "-o", "out.js", "-esbuild={}", "-x", "--", "-debug"]);
        assert_eq!(args, ["esb", "--watch", "-o", "out.js", "--esbuild={}", "-x", "--", "-debug"]);

        let program = Program::standalone(["esb", "-watch", "-no-diag", "-g", "src/a.ts"]).unwrap();
        let args = program.args();
        assert!(args.watch && args.no_diag && args.debug);
        assert_eq!(args.entry_points, vec!["src/a.ts".to_string()]);
    }

    #[test]
    fn overrides_from_flags() {
        let program = Program::standalone([
            "esb",
            "--inline-sourcemap",
            "--no-color",
            "--no-clear",
            "--esbuild",
            r#"{"platform": "node"}"#,
            "a.ts",
        ])
        .unwrap();
        let overrides = program.args().overrides().unwrap();

        assert_eq!(overrides.sourcemap, Some(SourceMapMode::Inline));
        assert_eq!(overrides.color, Some(false));
        assert_eq!(overrides.clear, Some(false));
        assert_eq!(overrides.watch, None);
        assert_eq!(overrides.diag, None);
        assert_eq!(overrides.bundler["platform"], "node");
    }

    #[test]
    fn bad_esbuild_json() {
        let program = Program::standalone(["esb", "--esbuild", "[1]", "a.ts"]).unwrap();
        assert!(program.args().overrides().is_err());
    }

    #[test]
    fn standalone_rejects_unknown() {
        assert!(Program::standalone(["esb", "--port=8080", "a.ts"]).is_err());
    }

    #[test]
    fn embedded_extends() {
        let program =
            Program::embedded(["script", "-w", "--port=8080", "-o", "out.js", "--verbose", "a.ts"])
                .unwrap();
        program.hold();
        assert!(program.args().watch);
        assert_eq!(program.args().outfile, Some(PathBuf::from("out.js")));
        assert_eq!(program.args().entry_points, vec!["a.ts".to_string()]);
        assert_eq!(program.rest(), ["--port=8080", "--verbose"]);
        assert!(!program.gate().is_open());

        let matches = program
            .extend(
                Command::new("script")
                    .arg(Arg::new("port").long("port"))
                    .arg(Arg::new("verbose").long("verbose").action(ArgAction::SetTrue)),
            )
            .unwrap();
        assert!(program.gate().is_open());
        assert_eq!(matches.get_one::<String>("port").map(String::as_str), Some("8080"));
        assert!(matches.get_flag("verbose"));
    }

    #[test]
    fn failed_extension_still_opens_gate() {
        let program = Program::embedded(["script", "--port=8080", "a.ts"]).unwrap();
        program.hold();
        assert!(program.extend(Command::new("script")).is_err());
        assert!(program.gate().is_open());
    }
}
