//! Cooperative cancellation.
//!
//! A [`CancelToken`] moves one way, from live to canceled. Work checks the token at its own
//! suspension points, cleanup that has to happen eagerly registers a callback with
//! [`CancelToken::on_cancel`].

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Shared, clonable cancellation flag with a list of cleanup callbacks.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    /// Flips to `true` exactly once, wakes anyone in [`CancelToken::cancelled`].
    flag: watch::Sender<bool>,
}

#[derive(Default)]
struct State {
    cancelled: bool,
    reason: Option<String>,
    callbacks: Vec<Callback>,
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (flag, _rx) = watch::channel(false);
        CancelToken {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                flag,
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// The reason passed to the first call of [`CancelToken::cancel`], if any.
    pub fn reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }

    /// Register `callback` to run when this token is canceled.
    ///
    /// Callbacks run in registration order. If the token is already canceled the callback runs
    /// immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.cancelled {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Cancel this token, running all registered callbacks.
    ///
    /// Returns `true` if this call transitioned the token, every later call is a no-op that
    /// returns `false`.
    pub fn cancel(&self, reason: Option<&str>) -> bool {
        let callbacks = {
            let mut state = self.lock();
            if state.cancelled {
                return false;
            }
            state.cancelled = true;
            state.reason = reason.map(str::to_string);
            std::mem::take(&mut state.callbacks)
        };
        tracing::debug!(?reason, callbacks = callbacks.len(), "canceling");

        // Callbacks may touch the token, so they run with the lock released.
        for callback in callbacks {
            callback();
        }
        self.inner.flag.send_replace(true);
        true
    }

    /// Resolves once this token is canceled.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.flag.subscribe();
        // The sender lives as long as `self`, so this can't observe a closed channel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().expect("CancelToken lock poisoned")
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CancelToken")
            .field("cancelled", &state.cancelled)
            .field("reason", &state.reason)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}
