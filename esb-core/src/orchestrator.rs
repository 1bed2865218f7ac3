//! Where builds get put together.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use esb_cfg::ConfigSet;
use esb_check::{
    TSC_BIN, TYPECHECK_NOTICE_DELAY, TscChecker, TypeCheckCli, TypeCheckRegistry, TypeCheckStart,
    TypeChecker, wait_with_notice,
};
use esb_types::{BuildConfig, RawBuildConfig};
use esb_watch::{WatcherRegistry, watch_files};

use crate::bundler::{Bundler, EsbuildCli};
use crate::executor::{BuildExecutor, metafile_path};
use crate::gate::StartGate;
use crate::handle::{BuildHandle, CycleLocks};
use crate::normalize::{CliOverrides, normalize};
use crate::report::Reporter;
use crate::{ESBUILD_BIN, Error, metadata_dir, project_id};

/// Owns the registries shared by every build and starts builds.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    configs: ConfigSet,
    executor: Arc<BuildExecutor>,
    watchers: Arc<WatcherRegistry>,
    typechecks: Arc<TypeCheckRegistry>,
    cycle_locks: Arc<CycleLocks>,
    gate: StartGate,
}

/// One build's use of a type checker. Released once, whichever of cancellation or the build
/// finishing gets there first.
struct TypeCheckLease {
    start: TypeCheckStart,
    typechecks: Arc<TypeCheckRegistry>,
    released: AtomicBool,
}

impl TypeCheckLease {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.typechecks.release(&self.start.key);
        }
    }
}

impl Orchestrator {
    pub fn new(
        configs: ConfigSet,
        bundler: Arc<dyn Bundler>,
        checker: Arc<dyn TypeChecker>,
        gate: StartGate,
    ) -> Self {
        Orchestrator {
            executor: Arc::new(BuildExecutor::new(bundler)),
            watchers: Arc::new(WatcherRegistry::new(configs.clone())),
            typechecks: Arc::new(TypeCheckRegistry::new(checker)),
            cycle_locks: Arc::new(CycleLocks::new()),
            configs,
            gate,
        }
    }

    /// An [`Orchestrator`] that runs the real `esbuild` and `tsc`.
    pub fn with_defaults(configs: ConfigSet, gate: StartGate) -> Self {
        let bundler = EsbuildCli::new(ESBUILD_BIN.read(&configs));
        let checker = TscChecker::new(TSC_BIN.read(&configs));
        Orchestrator::new(configs, Arc::new(bundler), Arc::new(checker), gate)
    }

    pub fn configs(&self) -> &ConfigSet {
        &self.configs
    }

    pub fn gate(&self) -> &StartGate {
        &self.gate
    }

    pub fn watchers(&self) -> &Arc<WatcherRegistry> {
        &self.watchers
    }

    pub fn typechecks(&self) -> &Arc<TypeCheckRegistry> {
        &self.typechecks
    }

    /// Start a build. Config errors are returned right away, everything else comes out of the
    /// returned [`BuildHandle`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(&self, raw: RawBuildConfig, overrides: &CliOverrides) -> Result<BuildHandle, Error> {
        let (config, warnings) = normalize(raw, overrides)?;
        let reporter = Reporter::new(config.color, config.quiet);
        for warning in &warnings {
            reporter.config_warning(warning);
        }

        let id = project_id(&config).clone();
        let cycle = self.cycle_locks.get(&id);
        let config = Arc::new(config);
        let handle = BuildHandle::new(
            Arc::clone(&config),
            id,
            metadata_dir(&self.configs),
            Arc::clone(&self.executor),
            cycle,
        );
        tracing::debug!(build = %handle.build_id(), project = %handle.id(), ?config, "starting build");
        tokio::spawn(self.clone().drive(handle.clone()));
        Ok(handle)
    }

    async fn drive(self, handle: BuildHandle) {
        self.gate.ready().await;
        if handle.is_cancelled() {
            return;
        }

        let config = Arc::clone(handle.config());
        let typecheck = self.start_typecheck(&handle, &config);
        let release = || {
            if let Some(lease) = &typecheck {
                lease.release();
            }
        };

        let first = handle.run_cycle(&[]).await;
        handle.mark_initial_done();
        let built = match first {
            Ok(outcome) => outcome.ok,
            Err(err) => {
                tracing::error!(build = %handle.build_id(), project = %handle.id(), %err, "build failed");
                release();
                handle.settle(Err(Arc::new(err)));
                return;
            }
        };

        if !config.is_watch() {
            let checked = match &typecheck {
                Some(lease) => {
                    let delay = TYPECHECK_NOTICE_DELAY.read(&self.configs);
                    tokio::select! {
                        // Canceling released the type check and settled the build already.
                        _ = handle.token().cancelled() => return,
                        passed = wait_with_notice(&lease.start.handle, delay, config.quiet) => passed,
                    }
                }
                None => true,
            };
            release();
            handle.settle(Ok(built && checked));
            return;
        }

        let metafile = metafile_path(&metadata_dir(&self.configs), handle.id());
        let watched = watch_files(
            &self.watchers,
            &config,
            handle.id(),
            &metafile,
            handle.token(),
            handle.subscribe_cycles(),
            |changed: Vec<PathBuf>| {
                let handle = handle.clone();
                async move {
                    if let Err(err) = handle.run_cycle(&changed).await {
                        // A failing hook only aborts this cycle, we keep watching.
                        tracing::error!(build = %handle.build_id(), project = %handle.id(), %err, "rebuild failed");
                    }
                }
            },
        )
        .await;

        if let Err(err) = watched {
            tracing::error!(build = %handle.build_id(), project = %handle.id(), %err, "watching failed");
            release();
            handle.settle(Err(Arc::new(Error::WatchIo(err))));
        }
    }

    /// Start the type check for `config`. Its use is given back when the build is canceled or
    /// when the build is done with it, whichever comes first.
    fn start_typecheck(&self, handle: &BuildHandle, config: &BuildConfig) -> Option<Arc<TypeCheckLease>> {
        let cli = TypeCheckCli {
            color: config.color,
            quiet: config.quiet,
        };
        let start = self.typechecks.start(&config.typecheck, &cli, config)?;
        tracing::debug!(build = %handle.build_id(), project = %handle.id(), reused = start.reused, "type check started");

        let lease = Arc::new(TypeCheckLease {
            start,
            typechecks: Arc::clone(&self.typechecks),
            released: AtomicBool::new(false),
        });
        let on_cancel = Arc::clone(&lease);
        handle.token().on_cancel(move || on_cancel.release());
        Some(lease)
    }
}
