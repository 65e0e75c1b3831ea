//! Per-transaction state.

use std::collections::HashSet;

use crate::common::{PageId, TxnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    Snapshot,
}

/// `{min, max, ids[]}` captured at transaction start (snapshot isolation)
/// or per-operation (read-committed).
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub min: TxnId,
    pub max: TxnId,
    pub ids: HashSet<TxnId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// An in-progress (or just-finished) transaction.
///
/// `id` starts at `TxnId::NONE` and is assigned lazily on first write —
/// read-only transactions never pay for one.
#[derive(Debug)]
pub struct Txn {
    id: TxnId,
    isolation: IsolationLevel,
    snapshot: Snapshot,
    state: TxnState,
    /// Pages this txn has dirtied, in case of rollback (link-cut on abort).
    modified_refs: Vec<PageId>,
}

impl Txn {
    pub fn new(isolation: IsolationLevel, snapshot: Snapshot) -> Self {
        Txn {
            id: TxnId::NONE,
            isolation,
            snapshot,
            state: TxnState::Active,
            modified_refs: Vec::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Assign this txn's id on its first write. No-op if already assigned.
    pub fn assign_id(&mut self, id: TxnId) {
        if !self.id.is_set() {
            self.id = id;
        }
    }

    pub fn record_modified(&mut self, page: PageId) {
        if !self.modified_refs.contains(&page) {
            self.modified_refs.push(page);
        }
    }

    pub fn modified_refs(&self) -> &[PageId] {
        &self.modified_refs
    }

    pub fn mark_committed(&mut self) {
        self.state = TxnState::Committed;
    }

    pub fn mark_aborted(&mut self) {
        self.state = TxnState::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_assigned_once() {
        let mut txn = Txn::new(IsolationLevel::Snapshot, Snapshot::default());
        assert!(!txn.id().is_set());
        txn.assign_id(TxnId::new(7));
        txn.assign_id(TxnId::new(99));
        assert_eq!(txn.id(), TxnId::new(7));
    }

    #[test]
    fn modified_refs_deduplicate() {
        let mut txn = Txn::new(IsolationLevel::Snapshot, Snapshot::default());
        txn.record_modified(PageId::new(1));
        txn.record_modified(PageId::new(1));
        txn.record_modified(PageId::new(2));
        assert_eq!(txn.modified_refs().len(), 2);
    }
}
