//! Admission pool: one bounded concurrency gate per resource class.
//!
//! Waiters queue in strict FIFO order on the pool's fair semaphore; a
//! released permit is handed to the head of the queue, never to a
//! newly-arriving caller. Dropping a queued acquire (timeout or
//! cancellation) removes the waiter from the queue without ever granting it
//! a permit.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::registry::PoolKind;
use crate::stats::{PoolSnapshot, PoolStats};

/// Outcome of one permit acquisition.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// A permit was granted; it is released when the handle drops.
    Acquired(PermitHandle),
    /// The timeout elapsed with every permit still held.
    TimedOut,
    /// The caller's cancellation token fired while queued.
    Cancelled,
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

/// Scoped permit: exactly one release per acquire, on every exit path.
///
/// Release happens on drop, so it is reached on normal return, error, panic,
/// and when the holding future is dropped mid-operation. Moving the handle
/// is the only way to release it, and the handle is bound to the semaphore
/// it came from, so double release and cross-pool release cannot be
/// expressed.
#[derive(Debug)]
pub struct PermitHandle {
    kind: PoolKind,
    acquired_at: Instant,
    stats: Arc<PoolStats>,
    _permit: OwnedSemaphorePermit,
}

impl PermitHandle {
    /// The pool this permit belongs to.
    pub fn pool(&self) -> PoolKind {
        self.kind
    }
}

impl Drop for PermitHandle {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            target: "lantern::admission",
            pool = %self.kind,
            held = ?self.acquired_at.elapsed(),
            "released"
        );
    }
}

/// One bounded concurrency gate. Cheap to clone; clones share the same
/// permits and counters.
#[derive(Clone, Debug)]
pub struct ResourcePool {
    kind: PoolKind,
    max_permits: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl ResourcePool {
    /// Limits are validated by the registry before pools are constructed.
    pub(crate) fn new(kind: PoolKind, max_permits: usize) -> Self {
        debug_assert!(max_permits >= 1);
        Self {
            kind,
            max_permits,
            semaphore: Arc::new(Semaphore::new(max_permits)),
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Permits neither held nor already assigned to a queued waiter.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Callers currently queued for a permit.
    pub fn waiting(&self) -> usize {
        self.stats.waiting.load(Ordering::Relaxed)
    }

    /// Non-suspending acquire for paths that must not wait.
    pub fn try_acquire(&self) -> Option<PermitHandle> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(self.grant(permit, None)),
            Err(_) => None,
        }
    }

    /// Acquire a permit, waiting in FIFO order for up to `timeout`.
    ///
    /// An immediately-available permit is granted without suspending. A
    /// caller that times out is removed from the queue and never receives a
    /// permit afterward.
    pub async fn acquire(&self, timeout: Duration) -> AcquireOutcome {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return AcquireOutcome::Acquired(self.grant(permit, None));
        }
        self.acquire_queued(timeout, None).await
    }

    /// Like [`acquire`](Self::acquire), but also resolves to `Cancelled`
    /// when `cancel` fires while queued. A cancelled waiter leaves the queue
    /// and is never granted a permit afterward.
    pub async fn acquire_with_cancel(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> AcquireOutcome {
        if cancel.is_cancelled() {
            return AcquireOutcome::Cancelled;
        }
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return AcquireOutcome::Acquired(self.grant(permit, None));
        }
        self.acquire_queued(timeout, Some(cancel)).await
    }

    async fn acquire_queued(
        &self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> AcquireOutcome {
        let depth = self.stats.waiting.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.wait_starts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            target: "lantern::admission",
            pool = %self.kind,
            queue_depth = depth,
            "wait_start"
        );
        let _waiting = WaitGuard(&self.stats);

        let queued_at = Instant::now();
        let acquire = tokio::time::timeout(timeout, Arc::clone(&self.semaphore).acquire_owned());
        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = acquire => Some(result),
            },
            None => Some(acquire.await),
        };

        match result {
            None => {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target: "lantern::admission",
                    pool = %self.kind,
                    waited = ?queued_at.elapsed(),
                    "cancelled"
                );
                AcquireOutcome::Cancelled
            }
            Some(Err(_elapsed)) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "lantern::admission",
                    pool = %self.kind,
                    waited = ?queued_at.elapsed(),
                    max_permits = self.max_permits,
                    "overload"
                );
                AcquireOutcome::TimedOut
            }
            Some(Ok(Ok(permit))) => AcquireOutcome::Acquired(self.grant(permit, Some(queued_at))),
            // The semaphore lives exactly as long as the pool and is never closed.
            Some(Ok(Err(_))) => unreachable!("pool semaphore is never closed"),
        }
    }

    fn grant(&self, permit: OwnedSemaphorePermit, queued_at: Option<Instant>) -> PermitHandle {
        self.stats.acquired.fetch_add(1, Ordering::Relaxed);
        match queued_at {
            Some(queued_at) => tracing::debug!(
                target: "lantern::admission",
                pool = %self.kind,
                waited = ?queued_at.elapsed(),
                "acquired"
            ),
            None => tracing::debug!(
                target: "lantern::admission",
                pool = %self.kind,
                "acquired"
            ),
        }
        PermitHandle {
            kind: self.kind,
            acquired_at: Instant::now(),
            stats: Arc::clone(&self.stats),
            _permit: permit,
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.stats
            .snapshot(self.kind, self.max_permits, self.available())
    }
}

/// Decrements the waiting gauge on every exit from the queue.
struct WaitGuard<'a>(&'a PoolStats);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}
