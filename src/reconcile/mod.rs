//! Reconciliation: turning a mutable in-memory page plus its update chains
//! into zero or more immutable on-disk blocks.
//!
//! This module only knows how to reconcile a single page; it has no
//! opinion about *when* that happens (eviction vs. checkpoint vs. close)
//! beyond the [`ReconcileFlags`] it is handed. `btree::Tree` drives it from
//! eviction and from `Session::checkpoint`.

mod boundary;
mod column;
mod overflow;
mod row;

pub use boundary::{Boundary, BoundaryImage, SavedUpdate};
pub use overflow::OverflowTxnCache;

use crate::error::Result;
use crate::storage::page::CellType;

use crate::btree::page::{ColFixLeaf, ColVarLeaf, RowLeaf};

/// Why reconciliation is running — governs which disk value each chain
/// scan picks and whether split-restore/lookaside save paths are permitted
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReason {
    Eviction,
    Checkpoint,
    Close,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileFlags {
    pub reason: ReconcileReason,
    /// Split-restore permitted: keep multi-boundary images in memory rather
    /// than requiring every chain be globally visible.
    pub permit_save: bool,
    /// Lookaside eviction permitted for this page.
    pub permit_lookaside: bool,
    /// Salvage mode: never split, grow to fit, skip invalid items.
    pub salvage: bool,
}

impl ReconcileFlags {
    pub fn eviction() -> Self {
        ReconcileFlags {
            reason: ReconcileReason::Eviction,
            permit_save: true,
            permit_lookaside: true,
            salvage: false,
        }
    }

    pub fn checkpoint() -> Self {
        ReconcileFlags {
            reason: ReconcileReason::Checkpoint,
            permit_save: true,
            permit_lookaside: false,
            salvage: false,
        }
    }
}

/// Visibility context a reconciliation pass needs: whether an update is
/// committed (vs. aborted/in-flight), and whether it is visible to every
/// reader (`visible_all`) and thus safe to drop once superseded.
pub struct VisibilityCtx<'a> {
    pub is_committed: &'a dyn Fn(crate::common::TxnId) -> bool,
    pub is_aborted: &'a dyn Fn(crate::common::TxnId) -> bool,
    pub visible_all: &'a dyn Fn(crate::common::TxnId) -> bool,
    pub max_page_size: usize,
    pub overflow_threshold: usize,
}

/// Result of reconciling one page: its boundaries plus whether the page
/// came out entirely clean (every chain fully resolved, nothing saved) —
/// the caller uses this to choose between `ReconcileAndDiscard` and
/// `SplitRestore`/`LookasideEviction`.
pub struct ReconcileResult {
    pub boundaries: Vec<Boundary>,
    pub all_visible: bool,
}

use crate::block::BlockAddr;

pub fn reconcile_row_leaf(
    leaf: &RowLeaf,
    flags: &ReconcileFlags,
    ctx: &VisibilityCtx,
    write_block: &dyn Fn(&[u8]) -> Result<BlockAddr>,
) -> Result<ReconcileResult> {
    row::reconcile(leaf, flags, ctx, write_block)
}

pub fn reconcile_col_var_leaf(
    leaf: &ColVarLeaf,
    flags: &ReconcileFlags,
    ctx: &VisibilityCtx,
    write_block: &dyn Fn(&[u8]) -> Result<BlockAddr>,
) -> Result<ReconcileResult> {
    column::reconcile_var(leaf, flags, ctx, write_block)
}

pub fn reconcile_col_fix_leaf(
    leaf: &ColFixLeaf,
    flags: &ReconcileFlags,
    ctx: &VisibilityCtx,
    write_block: &dyn Fn(&[u8]) -> Result<BlockAddr>,
) -> Result<ReconcileResult> {
    column::reconcile_fix(leaf, flags, ctx, write_block)
}

/// Asserts no transient cell type (`ValueOverflowRemoved`) escapes to an
/// on-disk image.
pub(crate) fn assert_not_transient(cell_type: CellType) {
    debug_assert!(
        !cell_type.is_transient(),
        "transient cell type must never reach an on-disk block image"
    );
}

/// Classify one chain's history (newest-first) into a disk choice plus a
/// save list. Shared by the row and column paths — both resolve a chain's
/// history the same way once they have one.
pub(crate) fn classify_chain(
    entries: &[(crate::common::TxnId, Option<Vec<u8>>)],
    ctx: &VisibilityCtx,
) -> (
    Option<(crate::common::TxnId, Option<Vec<u8>>)>,
    Vec<(crate::common::TxnId, Option<Vec<u8>>)>,
) {
    let mut saved = Vec::new();
    let mut disk_choice = None;
    for (txn, value) in entries {
        if (ctx.is_aborted)(*txn) {
            continue;
        }
        if disk_choice.is_none() {
            if (ctx.is_committed)(*txn) {
                disk_choice = Some((*txn, value.clone()));
                if (ctx.visible_all)(*txn) {
                    break; // nothing older is reachable by any live cursor
                }
            } else {
                // Active and newer than any committed value seen so far:
                // its owning txn may still commit, so it must survive.
                saved.push((*txn, value.clone()));
            }
        } else {
            // Strictly older than the chosen disk value: a reader whose
            // snapshot predates the disk choice may still need this.
            saved.push((*txn, value.clone()));
        }
    }
    (disk_choice, saved)
}
