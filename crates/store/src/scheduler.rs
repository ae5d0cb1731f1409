//! Global bounded-concurrency request scheduler.
//!
//! A single process-wide queue admits work up to a configured
//! `network_concurrency` budget. Admission — not the work itself — is what
//! gets serialized: once a task has a permit it runs concurrently with
//! every other admitted task. Higher `priority` values are admitted
//! first; ties are broken FIFO by submission order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};

struct Entry {
    priority: i64,
    seq: u64,
    permit_tx: oneshot::Sender<OwnedSemaphorePermit>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    /// Higher priority sorts greater (popped first by the max-heap).
    /// Within equal priority, the entry submitted earlier (smaller `seq`)
    /// sorts greater, giving FIFO order among ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    queue: Mutex<BinaryHeap<Entry>>,
    queue_notify: Notify,
    seq: AtomicU64,
    priority_counter: AtomicU64,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

/// A guard that removes a not-yet-dispatched entry from the queue if its
/// owning future is dropped before being admitted.
struct QueuedGuard {
    inner: Arc<Inner>,
    seq: u64,
}

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
        // A no-op once the dispatcher has already popped this entry.
        let retained: BinaryHeap<Entry> = queue.drain().filter(|e| e.seq != self.seq).collect();
        *queue = retained;
    }
}

/// Global bounded-concurrency scheduler shared across a [`crate::PackageStore`].
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

impl RequestScheduler {
    /// Create a scheduler admitting at most `concurrency` tasks at once.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(BinaryHeap::new()),
            queue_notify: Notify::new(),
            seq: AtomicU64::new(0),
            priority_counter: AtomicU64::new(0),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        });

        tokio::spawn(Self::dispatch_loop(Arc::clone(&inner)));

        Self { inner }
    }

    async fn dispatch_loop(inner: Arc<Inner>) {
        loop {
            let Ok(permit) = Arc::clone(&inner.semaphore).acquire_owned().await else {
                // Semaphore was closed; the scheduler is being torn down.
                return;
            };

            let entry = loop {
                let popped = { inner.queue.lock().unwrap_or_else(|e| e.into_inner()).pop() };
                if let Some(entry) = popped {
                    break entry;
                }
                inner.queue_notify.notified().await;
            };

            // If the waiter already dropped its receiver (it was cancelled
            // after being popped but before delivery), the permit is simply
            // returned to the semaphore by its own Drop impl.
            let _ = entry.permit_tx.send(permit);
        }
    }

    /// Admit `task` when a concurrency slot is free, honoring `priority`
    /// (higher runs sooner; FIFO within a priority tier).
    pub async fn submit<F, Fut, T>(&self, priority: i64, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let seq = self.inner.seq.fetch_add(1, AtomicOrdering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.push(Entry { priority, seq, permit_tx: tx });
        }
        self.inner.queue_notify.notify_waiters();

        let guard = QueuedGuard { inner: Arc::clone(&self.inner), seq };
        let permit = rx.await.expect("scheduler dispatcher task exited unexpectedly");
        drop(guard);

        let result = task().await;
        drop(permit);
        result
    }

    /// The configured concurrency budget.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// The next value of the scheduler's monotonically increasing counter,
    /// used by the fetch coordinator to compute its priority-rotation policy.
    pub fn next_counter(&self) -> u64 {
        self.inner.priority_counter.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }
}

/// The fetch coordinator's priority-rotation policy: most submissions run
/// at normal priority, but every `concurrency`th one is deferred so a
/// steady stream of same-priority siblings can't starve out requests that
/// arrive later. The exact fraction only needs to land near
/// `1/concurrency`, not hit it precisely.
#[must_use]
pub fn rotate_priority(counter: u64, concurrency: u64) -> i64 {
    if concurrency > 0 && counter % concurrency == 0 {
        -1_000
    } else {
        1_000
    }
}
