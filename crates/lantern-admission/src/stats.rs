//! Per-pool counters and serializable snapshots.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use crate::registry::PoolKind;

/// Event counters for one pool.
///
/// Updated lock-free on the acquire/release paths, read by snapshots. The
/// `waiting` gauge tracks callers currently queued; everything else is a
/// monotonic total since construction.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    pub(crate) wait_starts: AtomicU64,
    pub(crate) acquired: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) released: AtomicU64,
    pub(crate) waiting: AtomicUsize,
}

/// Point-in-time view of one pool, for ops surfaces to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub pool: PoolKind,
    pub max_permits: usize,
    pub available: usize,
    pub waiting: usize,
    pub wait_starts: u64,
    pub acquired: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub released: u64,
}

impl PoolSnapshot {
    /// Every permit held: the next acquire will queue.
    pub fn is_saturated(&self) -> bool {
        self.available == 0
    }
}

/// Point-in-time view of every pool in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub pools: Vec<PoolSnapshot>,
}

impl RegistrySnapshot {
    pub fn pool(&self, kind: PoolKind) -> Option<&PoolSnapshot> {
        self.pools.iter().find(|p| p.pool == kind)
    }
}

impl PoolStats {
    pub(crate) fn snapshot(&self, pool: PoolKind, max_permits: usize, available: usize) -> PoolSnapshot {
        PoolSnapshot {
            pool,
            max_permits,
            available,
            waiting: self.waiting.load(Ordering::Relaxed),
            wait_starts: self.wait_starts.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}
