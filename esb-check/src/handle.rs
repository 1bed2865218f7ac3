use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use esb_ore::cancel::CancelToken;
use tokio::sync::watch;

/// Handle to a running type checker.
///
/// Clones share the same process. [`TypeCheckHandle::wait`] resolves with the first pass/fail
/// report, in watch mode later reports update [`TypeCheckHandle::result`].
#[derive(Clone, Debug)]
pub struct TypeCheckHandle {
    result: watch::Receiver<Option<bool>>,
    exited: Arc<AtomicBool>,
    token: CancelToken,
}

/// Sending half of a [`TypeCheckHandle`], owned by whatever drives the process.
///
/// Dropping the reporter marks the process as exited.
#[derive(Debug)]
pub struct TypeCheckReporter {
    result: watch::Sender<Option<bool>>,
    exited: Arc<AtomicBool>,
    token: CancelToken,
}

impl TypeCheckHandle {
    /// A handle that has not reported yet.
    pub fn pending() -> (TypeCheckHandle, TypeCheckReporter) {
        let (tx, rx) = watch::channel(None);
        let exited = Arc::new(AtomicBool::new(false));
        let token = CancelToken::new();
        let handle = TypeCheckHandle {
            result: rx,
            exited: Arc::clone(&exited),
            token: token.clone(),
        };
        let reporter = TypeCheckReporter {
            result: tx,
            exited,
            token,
        };
        (handle, reporter)
    }

    /// A handle for a check that already finished with `passed`.
    pub fn ready(passed: bool) -> TypeCheckHandle {
        let (handle, reporter) = TypeCheckHandle::pending();
        reporter.report(passed);
        handle
    }

    /// Wait for the first report. Resolves `false` if the process went away without reporting
    /// or the handle was canceled.
    pub async fn wait(&self) -> bool {
        let mut rx = self.result.clone();
        tokio::select! {
            result = rx.wait_for(Option::is_some) => match result {
                Ok(passed) => passed.unwrap_or(false),
                Err(_) => false,
            },
            _ = self.token.cancelled() => false,
        }
    }

    /// Latest report, if there has been one.
    pub fn result(&self) -> Option<bool> {
        *self.result.borrow()
    }

    /// Stop the type checker. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel(Some("type check canceled"));
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the underlying process has exited.
    pub fn is_finished(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

impl TypeCheckReporter {
    pub fn report(&self, passed: bool) {
        self.result.send_replace(Some(passed));
    }

    pub fn reported(&self) -> Option<bool> {
        *self.result.borrow()
    }

    /// Cancellation token of the handle, process drivers kill the process once it fires.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for TypeCheckReporter {
    fn drop(&mut self) {
        self.exited.store(true, Ordering::SeqCst);
    }
}
