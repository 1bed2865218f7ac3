use std::process::ExitCode;

use esb_core::{Error, Orchestrator};
use esb_types::RawBuildConfig;

use esb_cli::{Program, init_logging};

fn main() -> ExitCode {
    let program = match Program::standalone(std::env::args_os()) {
        Ok(program) => program,
        Err(err) => err.exit(),
    };
    if program.args().esb_version {
        println!("esb {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }
    init_logging(program.args().esb_debug);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(program)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(program: Program) -> Result<bool, anyhow::Error> {
    let args = program.args();
    let raw = match &args.config {
        Some(path) => RawBuildConfig::from_path(path)?,
        None => RawBuildConfig::default(),
    };
    let overrides = args.overrides()?;

    let configs = esb_core::cfgs::from_env();
    tracing::debug!(%configs, "tool configs");
    let orchestrator = Orchestrator::with_defaults(configs, program.gate().clone());
    let handle = orchestrator.build(raw, &overrides)?;

    tokio::select! {
        result = handle.clone() => match result {
            Ok(ok) => Ok(ok),
            Err(err) if matches!(*err, Error::Canceled) => Ok(true),
            Err(err) => Err(err.into()),
        },
        _ = tokio::signal::ctrl_c() => {
            let watching = handle.config().is_watch();
            handle.cancel(Some("interrupted"));
            // Stopping a watch is how it's supposed to end.
            Ok(watching)
        }
    }
}
