//! Global transaction state: id counter, oldest-reader watermark, and the
//! active-transaction table.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::common::TxnId;
use crate::error::{Error, Result};

use super::transaction::{IsolationLevel, Snapshot, Txn};
use super::visibility::{is_visible, visible_all};

/// One slot in the active-transaction table: enough for other sessions'
/// snapshots to see this txn as "in flight" without locking its `Txn`.
#[derive(Debug, Clone, Copy)]
struct ActiveEntry {
    id: TxnId,
    committed: bool,
}

pub struct TxnManager {
    next_id: AtomicU64,
    active: RwLock<HashMap<TxnId, ActiveEntry>>,
    aborted: RwLock<HashSet<TxnId>>,
}

impl TxnManager {
    pub fn new() -> Self {
        TxnManager {
            next_id: AtomicU64::new(TxnId::FIRST.0),
            active: RwLock::new(HashMap::new()),
            aborted: RwLock::new(HashSet::new()),
        }
    }

    /// Snapshot captured at transaction start (snapshot isolation) or at
    /// operation start (read-committed): `min` is the next id to be
    /// handed out, `max` equals `min` (reserved for symmetry with
    /// read-committed's per-operation recapture), `ids` is every
    /// currently-active, not-yet-committed id below `min`.
    pub fn capture_snapshot(&self) -> Snapshot {
        let min = TxnId::new(self.next_id.load(Ordering::SeqCst));
        let ids: HashSet<TxnId> = self
            .active
            .read()
            .values()
            .filter(|e| !e.committed && e.id < min)
            .map(|e| e.id)
            .collect();
        Snapshot {
            min,
            max: min,
            ids,
        }
    }

    /// Begin a new transaction; its id is assigned lazily on first write.
    pub fn begin(&self, isolation: IsolationLevel) -> Txn {
        let snapshot = match isolation {
            IsolationLevel::ReadUncommitted => Snapshot::default(),
            _ => self.capture_snapshot(),
        };
        Txn::new(isolation, snapshot)
    }

    /// Assign `txn` a fresh id on its first write, registering it in the
    /// active table so concurrent snapshots see it as in-flight.
    pub fn assign_id_if_needed(&self, txn: &mut Txn) -> TxnId {
        if txn.id().is_set() {
            return txn.id();
        }
        let id = TxnId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        txn.assign_id(id);
        self.active.write().insert(
            id,
            ActiveEntry {
                id,
                committed: false,
            },
        );
        id
    }

    /// Is `u` visible under `txn`'s isolation and snapshot? Read-committed
    /// recaptures its snapshot on every call.md §4.5.
    pub fn is_visible(&self, txn: &Txn, u: TxnId) -> bool {
        let aborted = self.aborted.read().contains(&u);
        let snapshot = match txn.isolation() {
            IsolationLevel::ReadCommitted => self.capture_snapshot(),
            _ => txn.snapshot().clone(),
        };
        is_visible(txn.isolation(), &snapshot, u, aborted)
    }

    /// The smallest snapshot.min across all active sessions — updates
    /// older than this may be physically reclaimed.
    pub fn oldest_id(&self) -> TxnId {
        self.active
            .read()
            .values()
            .filter(|e| !e.committed)
            .map(|e| e.id)
            .min()
            .unwrap_or_else(|| TxnId::new(self.next_id.load(Ordering::SeqCst)))
    }

    pub fn visible_all(&self, u: TxnId) -> bool {
        visible_all(u, self.oldest_id())
    }

    /// Is `u` committed (neither still active nor rolled back)? Used by
    /// reconciliation's chain classification, which needs a snapshot-free
    /// answer rather than one relative to a particular reader.
    pub fn is_committed(&self, u: TxnId) -> bool {
        u.is_set() && !self.aborted.read().contains(&u) && !self.active.read().contains_key(&u)
    }

    pub fn is_aborted(&self, u: TxnId) -> bool {
        self.aborted.read().contains(&u)
    }

    /// Publish `txn`'s id as committed and retire it from the active table.
    pub fn commit(&self, txn: &mut Txn) -> Result<()> {
        if !txn.is_active() {
            return Err(Error::Unsupported("transaction not active".into()));
        }
        if txn.id().is_set() {
            self.active.write().remove(&txn.id());
        }
        txn.mark_committed();
        Ok(())
    }

    /// Mark every update this txn owns as aborted (readers skip it), then
    /// retire it from the active table. No physical removal — GC is lazy.
    pub fn rollback(&self, txn: &mut Txn) -> Result<()> {
        if !txn.is_active() {
            return Err(Error::Unsupported("transaction not active".into()));
        }
        if txn.id().is_set() {
            self.aborted.write().insert(txn.id());
            self.active.write().remove(&txn.id());
        }
        txn.mark_aborted();
        Ok(())
    }
}

impl Default for TxnManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_assigned_monotonically() {
        let mgr = TxnManager::new();
        let mut a = mgr.begin(IsolationLevel::Snapshot);
        let mut b = mgr.begin(IsolationLevel::Snapshot);
        let id_a = mgr.assign_id_if_needed(&mut a);
        let id_b = mgr.assign_id_if_needed(&mut b);
        assert!(id_b > id_a);
    }

    #[test]
    fn snapshot_excludes_concurrent_active_txn() {
        let mgr = TxnManager::new();
        let mut writer = mgr.begin(IsolationLevel::Snapshot);
        mgr.assign_id_if_needed(&mut writer);

        let reader = mgr.begin(IsolationLevel::Snapshot);
        assert!(!mgr.is_visible(&reader, writer.id()));

        mgr.commit(&mut writer).unwrap();
        // Reader's snapshot was captured before the writer committed, so
        // it still cannot see it — snapshot isolation, not read-committed.
        assert!(!mgr.is_visible(&reader, writer.id()));
    }

    #[test]
    fn rollback_marks_aborted_and_hides_update() {
        let mgr = TxnManager::new();
        let mut writer = mgr.begin(IsolationLevel::Snapshot);
        mgr.assign_id_if_needed(&mut writer);
        let id = writer.id();
        mgr.rollback(&mut writer).unwrap();

        let reader = mgr.begin(IsolationLevel::ReadUncommitted);
        assert!(!mgr.is_visible(&reader, id));
    }

    #[test]
    fn oldest_id_tracks_active_writers() {
        let mgr = TxnManager::new();
        let mut a = mgr.begin(IsolationLevel::Snapshot);
        mgr.assign_id_if_needed(&mut a);
        let oldest_before = mgr.oldest_id();
        assert_eq!(oldest_before, a.id());
        mgr.commit(&mut a).unwrap();
        assert!(mgr.visible_all(a.id()));
    }

    #[test]
    fn double_commit_is_rejected() {
        let mgr = TxnManager::new();
        let mut txn = mgr.begin(IsolationLevel::Snapshot);
        mgr.commit(&mut txn).unwrap();
        assert!(mgr.commit(&mut txn).is_err());
    }
}
