//! The seam between the cache's victim walker and whatever owns pages
//! (`btree::Tree`). Keeping this a trait, rather than having the cache
//! reach into `btree` internals directly, keeps victim selection
//! decoupled from page ownership.

use crate::common::PageId;
use crate::error::Result;

/// One of the four outcomes reconciliation-driven eviction can produce
/// for a dirty page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionKind {
    /// Clean page, no hazard records: just free its memory.
    CleanDiscard,
    /// All updates globally visible: reconcile to block(s), discard memory.
    ReconcileAndDiscard,
    /// Updates not globally visible, caller permits it: reconcile into
    /// disk images kept in memory, re-instantiate as smaller pages.
    SplitRestore,
    /// Updates committed-but-not-globally-visible: newest value goes to
    /// disk, older versions spill to the lookaside store.
    LookasideEviction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    Evicted(EvictionKind),
    /// Left dirty: lookaside was the only option but was refused (a
    /// concurrent checkpoint on this tree), or eviction lost a race.
    LeftDirty,
}

/// Implemented by whatever owns a tree's resident pages — queried by the
/// eviction walker to pick victims and asked to actually evict them.
pub trait Evictable {
    /// All currently-resident page ids eligible for consideration (the
    /// walker itself applies the root/checkpoint-pinning skip rules).
    fn candidates(&self) -> Vec<PageId>;

    fn memory_footprint(&self, page: PageId) -> usize;

    fn read_generation(&self, page: PageId) -> u64;

    fn is_dirty(&self, page: PageId) -> bool;

    /// True for the tree's root and other internal pages the walker must
    /// skip unless dirty.
    fn is_root_or_pinned(&self, page: PageId) -> bool;

    /// Attempt to evict `page`, choosing among the four kinds based on
    /// visibility. Returns the outcome so the walker's stats can track
    /// which kind fired.
    fn evict(&self, page: PageId) -> Result<EvictOutcome>;
}
