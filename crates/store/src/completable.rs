//! A set-once future that can be cloned out to multiple waiters, all of
//! whom observe the same settlement independently of one another.
//!
//! Grounded in the same `Arc<Inner>` shape [`crate::scheduler::RequestScheduler`]
//! uses, built from `tokio::sync` primitives rather than a bespoke channel.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::StoreError;

/// The error type observed through a [`Completable`]: every waiter
/// shares the same failure, and `StoreError` itself isn't `Clone`, so
/// failures are wrapped once here instead.
pub type SharedError = Arc<StoreError>;

/// A future that settles exactly once. Clone it freely: every clone
/// watches the same underlying slot.
#[derive(Clone)]
pub struct Completable<T> {
    rx: watch::Receiver<Option<Result<T, SharedError>>>,
}

impl<T: Clone> Completable<T> {
    /// Wait for this value to settle.
    ///
    /// If the paired [`Completer`] is dropped without ever calling
    /// `complete`/`fail` (e.g. a failure occurred earlier in the pipeline
    /// and this particular future was left pending by design), every
    /// waiter receives a generic failure rather than hanging forever.
    pub async fn wait(&self) -> Result<T, SharedError> {
        let mut rx = self.rx.clone();
        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(Arc::new(StoreError::operation(
                    "await completable",
                    "completer dropped without settling",
                )));
            }
        }
    }
}

/// The write half of a [`Completable`], held by whoever is doing the work
/// that eventually settles it.
pub struct Completer<T> {
    tx: watch::Sender<Option<Result<T, SharedError>>>,
}

impl<T: Clone> Completer<T> {
    /// Create a pending completable/completer pair.
    #[must_use]
    pub fn new() -> (Self, Completable<T>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, Completable { rx })
    }

    /// Settle with a success value. Consumes the completer so it can't be
    /// settled twice.
    pub fn complete(self, value: T) {
        let _ = self.tx.send(Some(Ok(value)));
    }

    /// Settle with a failure, observed identically by every waiter.
    pub fn fail(self, err: SharedError) {
        let _ = self.tx.send(Some(Err(err)));
    }
}

/// Unwrap a [`SharedError`] back into an owned `StoreError` for callers
/// that don't need to share it further. Falls back to a generic
/// `Operation` error (preserving the message) when other clones of the
/// `Arc` are still alive, since `StoreError` can't be cloned directly.
#[must_use]
pub fn unwrap_shared_error(err: SharedError) -> StoreError {
    Arc::try_unwrap(err).unwrap_or_else(|err| StoreError::operation("awaited fetch", err.to_string()))
}
