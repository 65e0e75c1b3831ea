//! Per-slot update chains.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::TxnId;

/// A single versioned write to one key. `value = None` is a deletion
/// tombstone. Chains are singly linked, newest at the head.
#[derive(Debug)]
pub struct Update {
    pub txn_id: TxnId,
    pub value: Option<Vec<u8>>,
    next: Option<Arc<Update>>,
}

/// Result of walking a chain for the first entry visible to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visible {
    Value(Vec<u8>),
    Deleted,
    NotFound,
}

/// A key's update chain. Real engines prepend via a lock-free CAS loop on
/// the chain head; a `Mutex`-guarded `Arc` list gives the same externally
/// observable behavior (atomic prepend, retry-free from the caller's
/// perspective) without unsafe pointer plumbing — the same kind of
/// substitution the block manager makes for extent skip lists.
#[derive(Debug, Default)]
pub struct UpdateChain {
    head: Mutex<Option<Arc<Update>>>,
}

impl UpdateChain {
    pub fn new() -> Self {
        UpdateChain::default()
    }

    /// Prepend a new update, returning the chain's new head.
    pub fn prepend(&self, txn_id: TxnId, value: Option<Vec<u8>>) -> Arc<Update> {
        let mut head = self.head.lock();
        let update = Arc::new(Update {
            txn_id,
            value,
            next: head.clone(),
        });
        *head = Some(update.clone());
        update
    }

    /// Walk from the head, returning the first entry `is_visible` accepts.
    pub fn visible(&self, is_visible: &dyn Fn(TxnId) -> bool) -> Visible {
        let mut cur = self.head.lock().clone();
        while let Some(u) = cur {
            if is_visible(u.txn_id) {
                return match &u.value {
                    Some(v) => Visible::Value(v.clone()),
                    None => Visible::Deleted,
                };
            }
            cur = u.next.clone();
        }
        Visible::NotFound
    }

    pub fn is_empty(&self) -> bool {
        self.head.lock().is_none()
    }

    /// Snapshot every entry from newest to oldest, for reconciliation's
    /// scan/classify pass. Unlike [`UpdateChain::visible`],
    /// this does not stop at the first visible entry — the caller needs the
    /// whole history to pick a disk value and a save/lookaside set.
    pub fn entries(&self) -> Vec<(TxnId, Option<Vec<u8>>)> {
        let mut out = Vec::new();
        let mut cur = self.head.lock().clone();
        while let Some(u) = cur {
            out.push((u.txn_id, u.value.clone()));
            cur = u.next.clone();
        }
        out
    }
}
