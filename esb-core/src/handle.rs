//! The user facing handle of a build.

use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use esb_ore::cancel::CancelToken;
use esb_ore::id_gen::AtomicGen;
use esb_types::{BuildConfig, BuildOutcome, ProjectId};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{Mutex, watch};

use crate::executor::{BuildExecutor, CycleContext};
use crate::Error;

/// Final result of a build.
pub type BuildResult = Result<bool, Arc<Error>>;

/// Identifies a [`BuildHandle`] in logs, unlike the [`ProjectId`] it's unique per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId(u64);

impl From<u64> for BuildId {
    fn from(id: u64) -> Self {
        BuildId(id)
    }
}

impl std::fmt::Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

static BUILD_IDS: AtomicGen<BuildId> = AtomicGen::from_start(1);

/// Lock that every build of one project takes to run a cycle.
pub type CycleLock = Arc<Mutex<()>>;

/// Hands out one [`CycleLock`] per [`ProjectId`], shared by every build of that project.
#[derive(Debug, Default)]
pub struct CycleLocks {
    locks: std::sync::Mutex<BTreeMap<ProjectId, Weak<Mutex<()>>>>,
}

impl CycleLocks {
    pub fn new() -> Self {
        CycleLocks::default()
    }

    /// The lock for `id`, alive for as long as some build holds on to it.
    pub fn get(&self, id: &ProjectId) -> CycleLock {
        let mut locks = self.locks.lock().expect("CycleLocks lock poisoned");
        if let Some(lock) = locks.get(id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        locks.insert(id.clone(), Arc::downgrade(&lock));
        lock
    }
}

/// Handle to one build, from its first cycle until it settles.
///
/// Await it (it's [`IntoFuture`]) for the final result. Outside of watch mode that's the result
/// of the first cycle and the type check. In watch mode the build only settles once it's
/// canceled. Clones refer to the same build.
#[derive(Clone)]
pub struct BuildHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    build: BuildId,
    config: Arc<BuildConfig>,
    id: ProjectId,
    metadata_dir: PathBuf,
    executor: Arc<BuildExecutor>,
    token: CancelToken,
    /// Shared with every other build of the same project.
    cycle: CycleLock,
    completed: AtomicU64,
    /// Bumped after every cycle that ran, however it was started.
    cycles: watch::Sender<u64>,
    initial_done: AtomicBool,
    result: watch::Sender<Option<BuildResult>>,
}

impl std::fmt::Debug for BuildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildHandle")
            .field("build", &self.inner.build)
            .field("id", &self.inner.id)
            .field("completed", &self.build_counter())
            .field("token", &self.inner.token)
            .finish_non_exhaustive()
    }
}

impl BuildHandle {
    pub fn new(
        config: Arc<BuildConfig>,
        id: ProjectId,
        metadata_dir: PathBuf,
        executor: Arc<BuildExecutor>,
        cycle: CycleLock,
    ) -> Self {
        let (result, _rx) = watch::channel(None);
        let (cycles, _rx) = watch::channel(0);
        BuildHandle {
            inner: Arc::new(HandleInner {
                build: BUILD_IDS.next(),
                config,
                id,
                metadata_dir,
                executor,
                token: CancelToken::new(),
                cycle,
                completed: AtomicU64::new(0),
                cycles,
                initial_done: AtomicBool::new(false),
                result,
            }),
        }
    }

    pub fn build_id(&self) -> BuildId {
        self.inner.build
    }

    pub fn config(&self) -> &Arc<BuildConfig> {
        &self.inner.config
    }

    pub fn id(&self) -> &ProjectId {
        &self.inner.id
    }

    pub fn token(&self) -> &CancelToken {
        &self.inner.token
    }

    /// Number of cycles that ran to completion.
    pub fn build_counter(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Cancel the build. Cleanup registered on the token runs once, later calls do nothing.
    pub fn cancel(&self, reason: Option<&str>) {
        if self.inner.token.cancel(reason) {
            tracing::debug!(build = %self.inner.build, ?reason, "build canceled");
            self.settle(Err(Arc::new(Error::Canceled)));
        }
    }

    /// Run one more cycle and return whether it succeeded.
    ///
    /// Before the first cycle finished this does nothing and returns `false`.
    pub async fn rebuild(&self) -> bool {
        if !self.inner.initial_done.load(Ordering::SeqCst) {
            tracing::warn!(build = %self.inner.build, "rebuild requested before the initial build finished, ignoring");
            return false;
        }
        match self.run_cycle(&[]).await {
            Ok(outcome) => outcome.ok,
            Err(err) => {
                tracing::error!(build = %self.inner.build, %err, "rebuild failed");
                false
            }
        }
    }

    /// The result, if the build settled already.
    pub fn result(&self) -> Option<BuildResult> {
        self.inner.result.borrow().clone()
    }

    /// Ticks after every cycle of this build, including ones started by [`BuildHandle::rebuild`].
    pub(crate) fn subscribe_cycles(&self) -> watch::Receiver<u64> {
        self.inner.cycles.subscribe()
    }

    /// Run a cycle, waiting for any cycle of this project that's still running.
    pub(crate) async fn run_cycle(&self, changed: &[PathBuf]) -> Result<BuildOutcome, Error> {
        let _guard = self.inner.cycle.lock().await;
        if self.is_cancelled() {
            return Ok(BuildOutcome::noop());
        }

        let cycle = CycleContext {
            config: Arc::clone(&self.inner.config),
            id: self.inner.id.clone(),
            token: self.inner.token.clone(),
            completed: self.build_counter(),
            metadata_dir: self.inner.metadata_dir.clone(),
        };
        let outcome = self.inner.executor.execute(&cycle, changed).await;
        if !self.is_cancelled() {
            self.inner.completed.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.cycles.send_modify(|cycles| *cycles += 1);
        outcome
    }

    pub(crate) fn mark_initial_done(&self) {
        self.inner.initial_done.store(true, Ordering::SeqCst);
    }

    /// Settle the build, only the first result counts.
    pub(crate) fn settle(&self, result: BuildResult) {
        self.inner.result.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
    }
}

impl IntoFuture for BuildHandle {
    type Output = BuildResult;
    type IntoFuture = BoxFuture<'static, BuildResult>;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            let mut rx = self.inner.result.subscribe();
            let settled = rx.wait_for(Option::is_some).await;
            match settled.as_deref() {
                Ok(Some(result)) => result.clone(),
                _ => Err(Arc::new(Error::Canceled)),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::bundler::{Bundler, BundlerFailure, BundlerOptions, BundlerResult};

    #[derive(Default)]
    struct CountingBundler {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Bundler for CountingBundler {
        async fn build(&self, _: BundlerOptions, _: &Path) -> Result<BundlerResult, BundlerFailure> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(BundlerResult::default())
        }
    }

    fn handle(bundler: Arc<CountingBundler>) -> BuildHandle {
        let mut config = BuildConfig::new(vec!["a.ts".to_string()], PathBuf::from("/proj"));
        config.quiet = true;
        let id = crate::project_id(&config).clone();
        BuildHandle::new(
            Arc::new(config),
            id,
            std::env::temp_dir(),
            Arc::new(BuildExecutor::new(bundler)),
            Arc::new(Mutex::new(())),
        )
    }

    #[tokio::test]
    async fn rebuild_before_initial_is_ignored() {
        let bundler = Arc::new(CountingBundler::default());
        let handle = handle(Arc::clone(&bundler));

        assert!(!handle.rebuild().await);
        assert_eq!(bundler.runs.load(Ordering::SeqCst), 0);

        assert!(handle.run_cycle(&[]).await.unwrap().ok);
        handle.mark_initial_done();
        assert!(handle.rebuild().await);
        assert_eq!(bundler.runs.load(Ordering::SeqCst), 2);
        assert_eq!(handle.build_counter(), 2);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let bundler = Arc::new(CountingBundler::default());
        let handle = handle(Arc::clone(&bundler));

        let cleanups = Arc::new(AtomicUsize::new(0));
        {
            let cleanups = Arc::clone(&cleanups);
            handle.token().on_cancel(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            });
        }

        handle.cancel(Some("done"));
        handle.cancel(None);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(handle.is_cancelled());

        let result = handle.clone().await;
        assert!(matches!(result.as_ref().map_err(|err| &**err), Err(Error::Canceled)));

        // Nothing runs after cancellation.
        assert!(!handle.run_cycle(&[]).await.unwrap().ok);
        assert_eq!(bundler.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_cycle_ticks_subscribers() {
        let handle = handle(Arc::new(CountingBundler::default()));
        let mut cycles = handle.subscribe_cycles();

        handle.run_cycle(&[]).await.unwrap();
        handle.mark_initial_done();
        assert!(cycles.has_changed().unwrap());
        cycles.borrow_and_update();

        assert!(handle.rebuild().await);
        assert!(cycles.has_changed().unwrap());
        assert_eq!(*cycles.borrow_and_update(), 2);
    }

    #[test]
    fn cycle_locks_are_shared_per_project() {
        let locks = CycleLocks::new();
        let a = ProjectId::new("a".into());
        let b = ProjectId::new("b".into());

        let first = locks.get(&a);
        assert!(Arc::ptr_eq(&first, &locks.get(&a)));
        assert!(!Arc::ptr_eq(&first, &locks.get(&b)));

        let weak = Arc::downgrade(&first);
        drop(first);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn build_ids_are_unique() {
        let bundler = Arc::new(CountingBundler::default());
        let a = handle(Arc::clone(&bundler));
        let b = handle(bundler);
        assert_ne!(a.build_id(), b.build_id());
        assert_eq!(a.id(), b.id());
        assert_eq!(a.clone().build_id(), a.build_id());
    }

    #[tokio::test]
    async fn first_settle_wins() {
        let handle = handle(Arc::new(CountingBundler::default()));
        handle.settle(Ok(true));
        handle.settle(Ok(false));
        handle.cancel(None);
        assert!(matches!(handle.await, Ok(true)));
    }
}
