//! Per-node latches.
//!
//! Each node handle maps to a reader-writer latch created on first use. The
//! table only keeps weak references, so a latch lives exactly as long as some
//! thread holds or is about to hold it. Guards own their latch (`arc_lock`),
//! which lets tree code carry a latch across function boundaries without
//! borrowing the table.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::storage::Handle;

/// Shared access to one node.
pub type SharedLatch = ArcRwLockReadGuard<RawRwLock, ()>;

/// Exclusive access to one node.
pub type ExclusiveLatch = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Minimum table size before dead entries are swept.
const INITIAL_PRUNE_AT: usize = 64;

#[derive(Default)]
struct Entries {
    latches: HashMap<Handle, Weak<RwLock<()>>>,
    prune_at: usize,
}

#[derive(Default)]
pub struct LatchTable {
    entries: Mutex<Entries>,
}

impl LatchTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self, node: Handle) -> SharedLatch {
        let latch = self.latch(node);
        tracing::trace!(%node, "latching shared");
        latch.read_arc()
    }

    pub fn exclusive(&self, node: Handle) -> ExclusiveLatch {
        let latch = self.latch(node);
        tracing::trace!(%node, "latching exclusive");
        latch.write_arc()
    }

    /// Number of latches currently alive.
    #[must_use]
    pub fn live(&self) -> usize {
        self.entries
            .lock()
            .latches
            .values()
            .filter(|latch| latch.strong_count() > 0)
            .count()
    }

    fn latch(&self, node: Handle) -> Arc<RwLock<()>> {
        let mut entries = self.entries.lock();
        if let Some(latch) = entries.latches.get(&node).and_then(Weak::upgrade) {
            return latch;
        }

        if entries.latches.len() >= entries.prune_at.max(INITIAL_PRUNE_AT) {
            entries.latches.retain(|_, latch| latch.strong_count() > 0);
            entries.prune_at = entries.latches.len() * 2;
        }

        let latch = Arc::new(RwLock::new(()));
        entries.latches.insert(node, Arc::downgrade(&latch));
        latch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_latches_coexist() {
        let table = LatchTable::new();
        let a = table.shared(Handle::new(1));
        let b = table.shared(Handle::new(1));
        assert_eq!(table.live(), 1);
        drop((a, b));
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_exclusive_blocks_other_access() {
        let table = LatchTable::new();
        let guard = table.exclusive(Handle::new(5));

        let latch = table.latch(Handle::new(5));
        assert!(latch.try_read().is_none());
        assert!(latch.try_write().is_none());

        drop(guard);
        assert!(latch.try_write().is_some());
    }

    #[test]
    fn test_distinct_nodes_do_not_conflict() {
        let table = LatchTable::new();
        let _a = table.exclusive(Handle::new(1));
        let b = table.latch(Handle::new(2));
        assert!(b.try_write().is_some());
    }

    #[test]
    fn test_dead_entries_are_pruned() {
        let table = LatchTable::new();
        for raw in 1..=500 {
            drop(table.exclusive(Handle::new(raw)));
        }
        assert!(table.entries.lock().latches.len() <= INITIAL_PRUNE_AT + 1);
    }
}
