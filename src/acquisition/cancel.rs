//! Cancellation of an in-page acquisition.
//!
//! A [`CancelHandle`] is held by whoever may stop the acquisition (the
//! tracker); the matching [`CancelSignal`] travels with the
//! [`super::AcquireContext`]. Dropping the handle without firing it leaves
//! the signal pending forever.

use tokio::sync::watch;

/// Fires the paired [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    /// Returns true once the handle has fired.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the handle fires. Pends forever if the handle is
    /// dropped first.
    pub async fn canceled(&self) {
        let mut rx = self.rx.clone();
        let fired = rx.wait_for(|canceled| *canceled).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a connected handle and signal.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}
