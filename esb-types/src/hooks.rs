//! User lifecycle hooks, run around every build cycle.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::{BuildConfig, BuildOutcome};

/// Passed to the `on_start` hook before the bundler runs.
#[derive(Debug, Clone)]
pub struct StartEvent {
    pub config: Arc<BuildConfig>,
    /// Files whose change triggered this cycle, empty for the initial build.
    pub changed: Vec<PathBuf>,
}

/// Passed to the `on_end` hook once the bundler finished.
#[derive(Debug, Clone)]
pub struct EndEvent {
    pub config: Arc<BuildConfig>,
    pub outcome: BuildOutcome,
    pub changed: Vec<PathBuf>,
}

/// What an `on_end` hook wants to happen to the cycle's reported result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookOutcome {
    /// Keep the outcome the bundler reported.
    #[default]
    Continue,
    /// Report this pass/fail instead, even when the bundler failed.
    Override(bool),
}

type OnStartFn = dyn Fn(StartEvent) -> BoxFuture<'static, Result<(), anyhow::Error>> + Send + Sync;
type OnEndFn =
    dyn Fn(EndEvent) -> BoxFuture<'static, Result<HookOutcome, anyhow::Error>> + Send + Sync;

/// Optional `on_start` and `on_end` hooks.
#[derive(Clone, Default)]
pub struct BuildHooks {
    on_start: Option<Arc<OnStartFn>>,
    on_end: Option<Arc<OnEndFn>>,
}

impl BuildHooks {
    pub fn new() -> Self {
        BuildHooks::default()
    }

    pub fn with_on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StartEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.on_start = Some(Arc::new(move |event| hook(event).boxed()));
        self
    }

    pub fn with_on_end<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(EndEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookOutcome, anyhow::Error>> + Send + 'static,
    {
        self.on_end = Some(Arc::new(move |event| hook(event).boxed()));
        self
    }

    /// Run the `on_start` hook, if there is one.
    pub async fn on_start(&self, event: StartEvent) -> Result<(), anyhow::Error> {
        match &self.on_start {
            Some(hook) => hook(event).await,
            None => Ok(()),
        }
    }

    /// Run the `on_end` hook, if there is one.
    pub async fn on_end(&self, event: EndEvent) -> Result<HookOutcome, anyhow::Error> {
        match &self.on_end {
            Some(hook) => hook(event).await,
            None => Ok(HookOutcome::Continue),
        }
    }
}

impl fmt::Debug for BuildHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}
