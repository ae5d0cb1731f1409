//! Structured progress/error events.
//!
//! Delivery is fire-and-forget: the [`ObservabilityBus`] fans a
//! [`ProgressEvent`] out to every registered [`Observer`] without waiting
//! on them, so a slow or misbehaving observer can never stall the fetch
//! pipeline.

use std::sync::Arc;

use tokio::sync::mpsc;

/// A progress or error event tied to a package identity.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A `WantedDependency` was resolved to a concrete identity.
    Resolved {
        /// The resolved identity.
        identity: String,
    },
    /// Metadata (manifest) is being fetched for an identity.
    ResolvingContent {
        /// The identity whose metadata is being fetched.
        identity: String,
    },
    /// The identity was already present and trusted in the store.
    FoundInStore {
        /// The identity found in the store.
        identity: String,
    },
    /// A network fetch has started.
    FetchingStarted {
        /// The identity being fetched.
        identity: String,
        /// Advertised content size, if known.
        size: Option<u64>,
        /// Which attempt this is (1-based).
        attempt: u32,
    },
    /// Bytes have been downloaded for an in-progress fetch.
    FetchingProgress {
        /// The identity being fetched.
        identity: String,
        /// Bytes downloaded so far.
        downloaded: u64,
    },
    /// The fetch completed and the entry was published.
    Fetched {
        /// The identity that finished fetching.
        identity: String,
    },
    /// The fetch failed.
    Error {
        /// The identity whose fetch failed.
        identity: String,
        /// A human-readable description of the failure.
        message: String,
    },
}

impl ProgressEvent {
    /// The identity this event concerns.
    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::Resolved { identity }
            | Self::ResolvingContent { identity }
            | Self::FoundInStore { identity }
            | Self::FetchingStarted { identity, .. }
            | Self::FetchingProgress { identity, .. }
            | Self::Fetched { identity }
            | Self::Error { identity, .. } => identity,
        }
    }
}

/// A sink for [`ProgressEvent`]s.
///
/// Implementations must not block the caller; if an implementation needs
/// to do I/O it should queue the event and return immediately.
pub trait Observer: Send + Sync {
    /// Handle one event. Must not panic and should not block.
    fn on_event(&self, event: &ProgressEvent);
}

/// An [`Observer`] that discards every event. Useful as a default when no
/// caller-supplied observer is registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// An [`Observer`] that forwards events onto an unbounded `mpsc` channel,
/// primarily for tests that want to assert on emitted events without
/// coupling to a concrete logging backend.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    /// Create a channel observer paired with the receiver callers should poll.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Observer for ChannelObserver {
    fn on_event(&self, event: &ProgressEvent) {
        // A closed receiver just means nobody is listening anymore; dropping
        // the event is correct, not an error worth propagating.
        let _ = self.sender.send(event.clone());
    }
}

/// Fans [`ProgressEvent`]s out to every registered [`Observer`].
#[derive(Clone, Default)]
pub struct ObservabilityBus {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObservabilityBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self { observers: Vec::new() }
    }

    /// Register an observer. Order of registration has no effect on delivery.
    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Emit an event to every registered observer.
    ///
    /// Logged at `debug` in addition to being forwarded, so the bus itself
    /// doubles as a tracing source even with zero observers registered.
    pub fn emit(&self, event: ProgressEvent) {
        tracing::debug!(identity = %event.identity(), "progress event");
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_observer_accepts_everything() {
        let observer = NullObserver;
        observer.on_event(&ProgressEvent::Fetched { identity: "a@1.0.0".into() });
    }

    #[tokio::test]
    async fn channel_observer_forwards_events() {
        let (observer, mut rx) = ChannelObserver::new();
        let mut bus = ObservabilityBus::new();
        bus.register(Arc::new(observer));

        bus.emit(ProgressEvent::Resolved { identity: "foo@1.0.0".into() });
        bus.emit(ProgressEvent::Fetched { identity: "foo@1.0.0".into() });

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ProgressEvent::Resolved { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, ProgressEvent::Fetched { .. }));
    }

    #[test]
    fn bus_with_no_observers_does_not_panic() {
        let bus = ObservabilityBus::new();
        bus.emit(ProgressEvent::Error { identity: "x".into(), message: "boom".into() });
    }
}
