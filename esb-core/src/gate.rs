//! Holding builds back until whoever embeds us is done setting up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// A one-way gate builds wait on before they start.
///
/// An [open](StartGate::open) gate never blocks. A [deferred](StartGate::deferred) gate opens by
/// itself one scheduler tick after the first build starts waiting, unless someone called
/// [`StartGate::hold`], in which case it stays closed until [`StartGate::release`].
#[derive(Debug, Clone)]
pub struct StartGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    open: watch::Sender<bool>,
    held: AtomicBool,
}

impl StartGate {
    pub fn open() -> Self {
        StartGate::with_state(true)
    }

    pub fn deferred() -> Self {
        StartGate::with_state(false)
    }

    fn with_state(open: bool) -> Self {
        let (tx, _rx) = watch::channel(open);
        StartGate {
            inner: Arc::new(GateInner {
                open: tx,
                held: AtomicBool::new(false),
            }),
        }
    }

    /// Keep the gate closed until [`StartGate::release`] gets called.
    pub fn hold(&self) {
        if self.is_open() {
            tracing::warn!("holding a start gate that's already open has no effect");
            return;
        }
        self.inner.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.inner.held.store(false, Ordering::SeqCst);
        self.inner.open.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.inner.open.borrow()
    }

    /// Wait until builds may start.
    pub async fn ready(&self) {
        if self.is_open() {
            return;
        }
        if !self.inner.held.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
            if !self.inner.held.load(Ordering::SeqCst) {
                self.release();
                return;
            }
        }

        let mut rx = self.inner.open.subscribe();
        // The sender lives in `self`, so this can't fail.
        let _ = rx.wait_for(|open| *open).await;
    }
}
