//! Overflow-value lifecycle: an overflow item's blocks cannot be freed the
//! instant its owning value is deleted or replaced, because a concurrent
//! cursor may still hold the old address cookie. Reconciliation instead
//! flips the cell type to a transient `ValueOverflowRemoved` and caches
//! the bytes until the change is visible to every reader.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::block::BlockAddr;
use crate::common::TxnId;

/// One overflow removal awaiting global visibility before its blocks can
/// be freed.
#[derive(Debug, Clone)]
struct PendingRemoval {
    addr: BlockAddr,
    removed_by: TxnId,
    cached_bytes: Vec<u8>,
}

/// Per-page (or per-tree) cache of overflow values whose blocks are queued
/// for free but not yet safe to release.
#[derive(Debug, Default)]
pub struct OverflowTxnCache {
    pending: Mutex<HashMap<u64, PendingRemoval>>,
}

impl OverflowTxnCache {
    pub fn new() -> Self {
        OverflowTxnCache::default()
    }

    /// Record that `addr`'s overflow value was removed by `removed_by`,
    /// stashing the original bytes so readers from before the removal can
    /// still be served.
    pub fn stash(&self, addr: BlockAddr, removed_by: TxnId, bytes: Vec<u8>) {
        self.pending.lock().insert(
            addr.offset,
            PendingRemoval {
                addr,
                removed_by,
                cached_bytes: bytes,
            },
        );
    }

    /// A reader whose snapshot predates `removed_by` asks for the
    /// original bytes here instead of reading (possibly already-freed)
    /// blocks from the file.
    pub fn read_cached(&self, addr: &BlockAddr) -> Option<Vec<u8>> {
        self.pending
            .lock()
            .get(&addr.offset)
            .map(|p| p.cached_bytes.clone())
    }

    /// Sweep every stashed removal whose `removed_by` is now visible to
    /// every reader, returning the addresses whose blocks may now be freed
    /// by the block manager.
    pub fn sweep(&self, visible_all: impl Fn(TxnId) -> bool) -> Vec<BlockAddr> {
        let mut pending = self.pending.lock();
        let mut freed = Vec::new();
        pending.retain(|_, p| {
            if visible_all(p.removed_by) {
                freed.push(p.addr);
                false
            } else {
                true
            }
        });
        freed
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_removal_reader_sees_cached_bytes() {
        let cache = OverflowTxnCache::new();
        let addr = BlockAddr {
            offset: 100,
            size: 10,
            checksum: 1,
        };
        cache.stash(addr, TxnId::new(5), b"original".to_vec());
        assert_eq!(cache.read_cached(&addr), Some(b"original".to_vec()));
    }

    #[test]
    fn sweep_only_frees_globally_visible_removals() {
        let cache = OverflowTxnCache::new();
        let addr = BlockAddr {
            offset: 100,
            size: 10,
            checksum: 1,
        };
        cache.stash(addr, TxnId::new(5), b"original".to_vec());
        assert!(cache.sweep(|t| t.0 < 5).is_empty());
        let freed = cache.sweep(|t| t.0 < 10);
        assert_eq!(freed, vec![addr]);
        assert!(cache.is_empty());
    }
}
