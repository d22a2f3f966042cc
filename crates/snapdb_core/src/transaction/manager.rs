//! Transaction and snapshot bookkeeping.

use crate::types::{SnapshotId, TransactionId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Clock {
    /// Highest snapshot whose commit, and every commit before it, is done.
    visible: u64,
    /// Finished snapshots waiting for an earlier one to finish.
    finished: BTreeSet<u64>,
    /// Snapshots of live transactions, with how many use each.
    active: BTreeMap<u64, usize>,
}

/// Hands out transaction ids and snapshot ids.
///
/// Commit snapshot ids are allocated with an atomic increment, but a new
/// transaction only ever starts at the highest id below which every
/// allocated commit has finished. A transaction therefore never observes a
/// half-applied commit, and every commit is visible to every transaction
/// that starts after it returns.
#[derive(Debug)]
pub(crate) struct TransactionManager {
    /// Next transaction ID.
    next_txid: AtomicU64,
    /// Last allocated snapshot id.
    allocated: AtomicU64,
    clock: Mutex<Clock>,
}

impl TransactionManager {
    /// Creates a manager resuming after `last_snapshot`.
    pub(crate) fn with_state(last_snapshot: u64) -> Self {
        Self {
            next_txid: AtomicU64::new(1),
            allocated: AtomicU64::new(last_snapshot),
            clock: Mutex::new(Clock {
                visible: last_snapshot,
                ..Clock::default()
            }),
        }
    }

    /// Registers a new transaction at the current visible snapshot.
    pub(crate) fn begin(&self) -> (TransactionId, SnapshotId) {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::Relaxed));
        let mut clock = self.clock.lock();
        let snapshot = clock.visible;
        *clock.active.entry(snapshot).or_insert(0) += 1;
        (txid, SnapshotId::new(snapshot))
    }

    /// Unregisters a transaction started with [`Self::begin`].
    pub(crate) fn end(&self, snapshot: SnapshotId) {
        let mut clock = self.clock.lock();
        if let Some(count) = clock.active.get_mut(&snapshot.as_u64()) {
            *count -= 1;
            if *count == 0 {
                clock.active.remove(&snapshot.as_u64());
            }
        }
    }

    /// Allocates a fresh commit snapshot id.
    ///
    /// Every allocated id must be passed to [`Self::publish`], whether or
    /// not the commit succeeded.
    pub(crate) fn allocate(&self) -> SnapshotId {
        SnapshotId::new(self.allocated.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Marks an allocated snapshot as finished.
    pub(crate) fn publish(&self, snapshot: SnapshotId) {
        let mut clock = self.clock.lock();
        clock.finished.insert(snapshot.as_u64());
        loop {
            let next = clock.visible + 1;
            if !clock.finished.remove(&next) {
                break;
            }
            clock.visible = next;
        }
    }

    /// The snapshot new transactions start at.
    pub(crate) fn visible(&self) -> SnapshotId {
        SnapshotId::new(self.clock.lock().visible)
    }

    /// The oldest snapshot any live or future transaction can read at.
    pub(crate) fn horizon(&self) -> SnapshotId {
        let clock = self.clock.lock();
        let oldest = clock.active.keys().next().copied().unwrap_or(clock.visible);
        SnapshotId::new(oldest.min(clock.visible))
    }

    /// Number of live transactions.
    pub(crate) fn active_count(&self) -> usize {
        self.clock.lock().active.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_uses_visible_snapshot() {
        let tm = TransactionManager::with_state(5);
        let (t1, s1) = tm.begin();
        let (t2, s2) = tm.begin();
        assert!(t1 < t2);
        assert_eq!(s1, SnapshotId::new(5));
        assert_eq!(s2, SnapshotId::new(5));
        assert_eq!(tm.active_count(), 2);

        tm.end(s1);
        tm.end(s2);
        assert_eq!(tm.active_count(), 0);
    }

    #[test]
    fn visible_waits_for_earlier_commits() {
        let tm = TransactionManager::with_state(0);
        let a = tm.allocate();
        let b = tm.allocate();
        assert_eq!((a.as_u64(), b.as_u64()), (1, 2));

        tm.publish(b);
        assert_eq!(tm.visible(), SnapshotId::new(0));
        tm.publish(a);
        assert_eq!(tm.visible(), SnapshotId::new(2));
    }

    #[test]
    fn horizon_tracks_oldest_active() {
        let tm = TransactionManager::with_state(0);
        let (_, old) = tm.begin();
        let s = tm.allocate();
        tm.publish(s);
        let (_, new) = tm.begin();

        assert_eq!(new, SnapshotId::new(1));
        assert_eq!(tm.horizon(), SnapshotId::new(0));
        tm.end(old);
        assert_eq!(tm.horizon(), SnapshotId::new(1));
        tm.end(new);
        assert_eq!(tm.horizon(), SnapshotId::new(1));
    }
}
