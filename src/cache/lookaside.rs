//! The lookaside store: an auxiliary tree letting pages with uncommitted
//! or not-yet-globally-visible updates be evicted.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::RwLock;

use crate::common::TxnId;

/// Row key for the lookaside tree: `(tree_id, block_addr, counter,
/// onpage_txn, source_key)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LookasideKey {
    pub tree_id: u64,
    pub block_addr: u64,
    pub counter: u64,
    pub onpage_txn: TxnId,
    pub source_key: Vec<u8>,
}

/// One saved update, as spilled by lookaside eviction.
#[derive(Debug, Clone)]
pub struct LookasideRecord {
    pub txn_id: TxnId,
    pub value: Option<Vec<u8>>, // None = tombstone
}

/// Sweep cadence — resolves the "lookaside sweep cadence" open question as
/// a configurable policy rather than a hardcoded constant.
#[derive(Debug, Clone, Copy)]
pub struct LookasidePolicy {
    pub sweep_every_wakeups: u32,
    pub full_review: Duration,
}

impl Default for LookasidePolicy {
    fn default() -> Self {
        // A light sweep roughly every 30 wakeups, a full review every
        // five minutes.
        LookasidePolicy {
            sweep_every_wakeups: 30,
            full_review: Duration::from_secs(300),
        }
    }
}

/// The lookaside table itself. Created eagerly at connection startup
/// rather than on demand — schema operations need the schema lock,
/// which may not always be free.
#[derive(Debug, Default)]
pub struct LookasideStore {
    rows: RwLock<BTreeMap<LookasideKey, LookasideRecord>>,
    wakeups_since_sweep: std::sync::atomic::AtomicU32,
}

impl LookasideStore {
    pub fn create() -> Self {
        LookasideStore::default()
    }

    pub fn insert(&self, key: LookasideKey, record: LookasideRecord) {
        self.rows.write().insert(key, record);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// All rows spilled for a given on-page block, in key order (the
    /// order lookaside eviction wrote them), for restore on re-fault.
    pub fn rows_for(&self, tree_id: u64, block_addr: u64) -> Vec<(LookasideKey, LookasideRecord)> {
        self.rows
            .read()
            .range(
                LookasideKey {
                    tree_id,
                    block_addr,
                    counter: 0,
                    onpage_txn: TxnId::NONE,
                    source_key: Vec::new(),
                }..,
            )
            .take_while(|(k, _)| k.tree_id == tree_id && k.block_addr == block_addr)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Remove every row whose `onpage_txn` is visible to all readers.
    /// Called by the background sweeper at `LookasidePolicy::sweep_every_wakeups`
    /// cadence. Returns the number of rows removed.
    pub fn sweep<F>(&self, visible_all: F) -> usize
    where
        F: Fn(TxnId) -> bool,
    {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|k, _| !visible_all(k.onpage_txn));
        before - rows.len()
    }

    /// Called once per eviction-server wakeup; returns true when a sweep
    /// should run this wakeup, per `policy.sweep_every_wakeups`.
    pub fn should_sweep(&self, policy: &LookasidePolicy) -> bool {
        let n = self
            .wakeups_since_sweep
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        if n >= policy.sweep_every_wakeups {
            self.wakeups_since_sweep
                .store(0, std::sync::atomic::Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

/// True if lookaside eviction must be refused for this tree: its
/// checkpoint generation has fallen behind the global one, meaning a
/// lookaside write could be invisible to a concurrent checkpoint.
pub fn refuses_lookaside(tree_checkpoint_gen: u64, global_checkpoint_gen: u64) -> bool {
    tree_checkpoint_gen != global_checkpoint_gen
}
