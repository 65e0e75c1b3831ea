//! The B+tree itself: page residency, fault-in, and the eviction seam
//! that drives reconciliation.
//!
//! `Tree` owns one [`PageArena`] of resident pages and the root
//! [`Ref`] pointing into it (or onto disk, before the root is first
//! touched). Everything else — cursors, row/column mutation — builds on
//! the primitives here: [`Tree::descend_to_leaf`] for reads/writes,
//! [`Tree::evict`] (via the [`Evictable`] impl) for the cache's victim
//! walker.

pub mod insert_list;
pub mod page;
pub mod ref_;
pub mod update;

mod cursor;
pub use cursor::Cursor;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::block::{BlockAddr, BlockManager};
use crate::cache::{Evictable, EvictOutcome, EvictionKind, LookasideKey, LookasideRecord, PageCache};
use crate::common::{PageId, TxnId};
use crate::error::{Error, Result};
use crate::reconcile::{
    reconcile_col_fix_leaf, reconcile_col_var_leaf, reconcile_row_leaf, BoundaryImage,
    ReconcileFlags, ReconcileResult, SavedUpdate, VisibilityCtx,
};
use crate::storage::page::{Cell, CellType, PageImage, PageKind};
use crate::txn::TxnManager;

use insert_list::InsertList;
use page::{ColFixLeaf, ColVarLeaf, Internal, Page, RowLeaf, RunCell, Slot};
use ref_::{PageArena, PageArenaId, Ref, RefState};

/// Bookkeeping `Tree` keeps alongside each resident page, indexed by the
/// page's [`PageArenaId`]. `parent` is looked up by promoted-key match
/// rather than cached index, since a sibling split can shift every
/// other child's position within `Internal::refs`.
#[derive(Debug, Clone, Copy)]
struct PageMeta {
    parent: Option<PageArenaId>,
    origin_addr: Option<BlockAddr>,
}

/// One open B+tree: a page arena, the root ref, and the handles it needs
/// to fault pages in and reconcile them back out.
pub struct Tree {
    id: u64,
    arena: PageArena,
    meta: RwLock<HashMap<usize, PageMeta>>,
    root: RwLock<Ref>,
    block_mgr: Arc<BlockManager>,
    cache: Arc<PageCache>,
    txn: Arc<TxnManager>,
    leaf_page_max: usize,
    overflow_threshold: usize,
    /// Governs the SplitRestore/LookasideEviction choice for boundaries
    /// that could not be written clean. Disabled while a checkpoint holds
    /// this tree's generation behind the global one — wiring that comparison in is left
    /// to the connection/checkpoint layer; this flag is the hook it uses.
    lookaside_enabled: AtomicBool,
}

impl Tree {
    /// Create a brand-new, empty tree whose root is a single resident
    /// leaf of `kind`.
    pub fn create(
        id: u64,
        kind: PageKind,
        block_mgr: Arc<BlockManager>,
        cache: Arc<PageCache>,
        txn: Arc<TxnManager>,
        leaf_page_max: usize,
        overflow_threshold: usize,
    ) -> Self {
        let arena = PageArena::new();
        let root_id = arena.insert(Self::new_empty_leaf_of(kind));
        let meta = RwLock::new(HashMap::new());
        meta.write().insert(root_id.0, PageMeta { parent: None, origin_addr: None });
        Tree {
            id,
            arena,
            meta,
            root: RwLock::new(Ref::resident(Vec::new(), root_id)),
            block_mgr,
            cache,
            txn,
            leaf_page_max,
            overflow_threshold,
            lookaside_enabled: AtomicBool::new(true),
        }
    }

    /// Reopen a tree whose root lives at `root_addr`. The root is not
    /// faulted in until first touched.
    pub fn open(
        id: u64,
        root_addr: BlockAddr,
        block_mgr: Arc<BlockManager>,
        cache: Arc<PageCache>,
        txn: Arc<TxnManager>,
        leaf_page_max: usize,
        overflow_threshold: usize,
    ) -> Self {
        Tree {
            id,
            arena: PageArena::new(),
            meta: RwLock::new(HashMap::new()),
            root: RwLock::new(Ref::on_disk(Vec::new(), root_addr)),
            block_mgr,
            cache,
            txn,
            leaf_page_max,
            overflow_threshold,
            lookaside_enabled: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The root's on-disk address, if it is not currently resident.
    /// `None` means the root has never been reconciled (a fresh tree) or
    /// is dirty in memory — callers that need a durable root address must
    /// evict it first (the checkpoint path, not yet wired here).
    pub fn root_addr(&self) -> Option<BlockAddr> {
        match self.root.read().state() {
            RefState::Disk(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn disable_lookaside(&self) {
        self.lookaside_enabled.store(false, Ordering::Relaxed);
    }

    pub fn enable_lookaside(&self) {
        self.lookaside_enabled.store(true, Ordering::Relaxed);
    }

    fn to_arena_id(page: PageId) -> PageArenaId {
        PageArenaId(page.0 as usize)
    }

    fn to_page_id(id: PageArenaId) -> PageId {
        PageId::new(id.0 as u64)
    }

    fn new_empty_leaf_of(kind: PageKind) -> Page {
        match kind {
            PageKind::ColVarLeaf => Page::new_col_var_leaf(),
            PageKind::ColFixLeaf => Page::new_col_fix_leaf(8),
            _ => Page::new_row_leaf(),
        }
    }

    /// Descend from the root to the leaf covering `key`, faulting in
    /// every page along the path that isn't already resident.
    pub(crate) fn descend_to_leaf(&self, key: &[u8]) -> Result<PageArenaId> {
        let mut current = retry_busy(|| self.fault_in_root())?;
        loop {
            let kind = self.arena.with_page(current, |p| p.kind())?;
            if kind.is_leaf() {
                self.arena.with_page(current, |p| p.touch(self.cache.touch()))?;
                return Ok(current);
            }
            let idx = self
                .arena
                .with_page(current, |p| {
                    let internal = p.as_internal().expect("descent hit a non-internal page");
                    internal.read().descend_index(key)
                })?
                .ok_or(Error::NotFound)?;
            current = retry_busy(|| self.fault_in_child(current, idx))?;
        }
    }

    pub(crate) fn arena(&self) -> &PageArena {
        &self.arena
    }

    pub(crate) fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub(crate) fn txn_manager(&self) -> &TxnManager {
        &self.txn
    }

    pub(crate) fn overflow_threshold(&self) -> usize {
        self.overflow_threshold
    }

    pub(crate) fn block_manager(&self) -> &BlockManager {
        &self.block_mgr
    }

    fn fault_in_root(&self) -> Result<PageArenaId> {
        match self.root.read().state() {
            RefState::Mem(id) => Ok(id),
            RefState::Disk(addr) => {
                let transitioned = self
                    .root
                    .read()
                    .try_transition(|s| matches!(s, RefState::Disk(_)), RefState::Locked);
                if !transitioned {
                    return Err(Error::Busy);
                }
                let bytes = self.block_mgr.read(&addr)?;
                let (header, cells) = PageImage::parse(&bytes)?;
                let page = self.build_page_from_cells(header.kind, header.recno, &cells, &[])?;
                page.set_memory_footprint(bytes.len());
                page.touch(self.cache.touch());
                let id = self.arena.insert(page);
                self.meta
                    .write()
                    .insert(id.0, PageMeta { parent: None, origin_addr: Some(addr) });
                self.root.read().set_state(RefState::Mem(id));
                Ok(id)
            }
            RefState::Deleted => Err(Error::NotFound),
            RefState::Locked | RefState::Reading | RefState::Split => Err(Error::Busy),
        }
    }

    fn fault_in_child(&self, parent: PageArenaId, ref_index: usize) -> Result<PageArenaId> {
        let current = self.arena.with_page(parent, |p| {
            let internal = p.as_internal().expect("parent must be internal");
            internal.read().refs[ref_index].state()
        })?;
        match current {
            RefState::Mem(id) => Ok(id),
            RefState::Disk(addr) => {
                let transitioned = self.arena.with_page(parent, |p| {
                    let internal = p.as_internal().expect("parent must be internal");
                    internal.read().refs[ref_index]
                        .try_transition(|s| matches!(s, RefState::Disk(_)), RefState::Locked)
                })?;
                if !transitioned {
                    return Err(Error::Busy);
                }
                let bytes = self.block_mgr.read(&addr)?;
                let (header, cells) = PageImage::parse(&bytes)?;
                let page = self.build_page_from_cells(header.kind, header.recno, &cells, &[])?;
                page.set_memory_footprint(bytes.len());
                page.touch(self.cache.touch());
                let new_id = self.arena.insert(page);
                self.meta.write().insert(
                    new_id.0,
                    PageMeta { parent: Some(parent), origin_addr: Some(addr) },
                );
                self.arena.with_page(parent, |p| {
                    let internal = p.as_internal().expect("parent must be internal");
                    internal.read().refs[ref_index].set_state(RefState::Mem(new_id));
                })?;
                Ok(new_id)
            }
            RefState::Deleted => Err(Error::NotFound),
            RefState::Locked | RefState::Reading | RefState::Split => Err(Error::Busy),
        }
    }

    /// Find the slot within `parent`'s refs currently pointing at
    /// `child_arena`. Looked up by state match rather than cached index
    /// since splices can shift sibling indices (see [`PageMeta`]).
    fn find_ref_index(&self, parent_arena: PageArenaId, child_arena: PageArenaId) -> Result<usize> {
        self.arena
            .with_page(parent_arena, |p| {
                let internal = p.as_internal().expect("parent must be internal");
                let g = internal.read();
                g.refs
                    .iter()
                    .position(|r| matches!(r.state(), RefState::Mem(id) if id == child_arena))
            })?
            .ok_or_else(|| Error::Corruption("dangling parent-child link".into()))
    }

    fn build_page_from_cells(
        &self,
        kind: PageKind,
        recno: u64,
        cells: &[Cell],
        saved: &[SavedUpdate],
    ) -> Result<Page> {
        if kind.is_internal() {
            self.build_internal_page(kind, cells)
        } else {
            self.build_leaf_page(kind, recno, cells, saved)
        }
    }

    fn build_internal_page(&self, kind: PageKind, cells: &[Cell]) -> Result<Page> {
        let mut internal = Internal::default();
        for cell in cells {
            let (addr_cookie, promoted_key) = cell.split_addr()?;
            let addr = BlockAddr::from_bytes(addr_cookie)?;
            internal.refs.push(Ref::on_disk(promoted_key.to_vec(), addr));
        }
        Ok(if kind == PageKind::ColInternal {
            Page::from_col_internal(internal)
        } else {
            Page::from_internal(internal)
        })
    }

    fn build_leaf_page(
        &self,
        kind: PageKind,
        recno: u64,
        cells: &[Cell],
        saved: &[SavedUpdate],
    ) -> Result<Page> {
        match kind {
            PageKind::RowLeaf => {
                let mut leaf = RowLeaf::default();
                for cell in cells {
                    match cell.cell_type {
                        CellType::KeyValue => {
                            let (k, v) = cell.split_key_value()?;
                            leaf.slots.push(Slot::new(k.to_vec(), v.map(|b| b.to_vec())));
                        }
                        CellType::Deleted => {
                            let (k, _) = cell.split_key_value()?;
                            leaf.slots.push(Slot::new(k.to_vec(), None));
                        }
                        CellType::ValueOverflow => {
                            let (k, addr_cookie) = cell.split_key_value_overflow()?;
                            let addr = BlockAddr::from_bytes(addr_cookie)?;
                            let value = self.block_mgr.read(&addr)?;
                            leaf.slots.push(Slot::new(k.to_vec(), Some(value)));
                        }
                        other => {
                            return Err(Error::Corruption(format!(
                                "unexpected cell type {other:?} in row leaf"
                            )))
                        }
                    }
                }
                for s in saved.iter().rev() {
                    if let Some(slot) = leaf.slots.iter().find(|sl| sl.key == s.key) {
                        slot.chain.prepend(s.txn_id, s.value.clone());
                    } else {
                        leaf.inserts
                            .chain_or_insert(s.key.clone())
                            .prepend(s.txn_id, s.value.clone());
                    }
                }
                Ok(Page::from_row_leaf(leaf))
            }
            PageKind::ColVarLeaf => {
                let mut leaf = ColVarLeaf::default();
                let mut cur = recno;
                for cell in cells {
                    let (count, value) = cell.split_run_length()?;
                    leaf.cells.push(RunCell {
                        start_recno: cur,
                        count,
                        value: Some(value.to_vec()),
                    });
                    cur += count;
                }
                for s in saved.iter().rev() {
                    let recno_key = recno_from_key(&s.key)?;
                    leaf.inserts
                        .chain_or_insert(recno_key)
                        .prepend(s.txn_id, s.value.clone());
                }
                Ok(Page::from_col_var_leaf(leaf))
            }
            PageKind::ColFixLeaf => {
                let cell = cells
                    .first()
                    .ok_or_else(|| Error::Corruption("col-fix leaf missing bitmap cell".into()))?;
                let (key, value) = cell.split_key_value()?;
                let bit_width = key.first().copied().unwrap_or(0);
                let mut leaf = ColFixLeaf {
                    base_recno: recno,
                    bit_width,
                    bits: value.map(|b| b.to_vec()).unwrap_or_default(),
                    updates: InsertList::new(),
                };
                for s in saved.iter().rev() {
                    let recno_key = recno_from_key(&s.key)?;
                    leaf.updates
                        .chain_or_insert(recno_key)
                        .prepend(s.txn_id, s.value.clone());
                }
                Ok(Page::from_col_fix_leaf(leaf))
            }
            _ => Err(Error::Unsupported(
                "build_leaf_page called with a non-leaf page kind".into(),
            )),
        }
    }

    fn clean_discard(&self, arena_id: PageArenaId, addr: BlockAddr) -> Result<EvictOutcome> {
        let parent = self.meta.read().get(&arena_id.0).and_then(|m| m.parent);
        match parent {
            Some(p_arena) => {
                let idx = self.find_ref_index(p_arena, arena_id)?;
                self.arena.with_page(p_arena, |p| {
                    let internal = p.as_internal().expect("parent must be internal");
                    internal.read().refs[idx].set_state(RefState::Disk(addr));
                })?;
            }
            None => {
                *self.root.write() = Ref::on_disk(Vec::new(), addr);
            }
        }
        self.arena.take(arena_id)?;
        self.meta.write().remove(&arena_id.0);
        Ok(EvictOutcome::Evicted(EvictionKind::CleanDiscard))
    }

    /// Internal pages are serialized directly as `Addr` cells rather than
    /// through `reconcile`, which only covers leaf kinds. An internal page
    /// can only be written once every child ref is already on disk;
    /// otherwise eviction is deferred until the children flush first.
    fn evict_internal(&self, arena_id: PageArenaId) -> Result<EvictOutcome> {
        let (kind, refs_snapshot) = self.arena.with_page(arena_id, |p| {
            let internal = p.as_internal().expect("must be internal");
            let g = internal.read();
            (
                p.kind(),
                g.refs
                    .iter()
                    .map(|r| (r.promoted_key.clone(), r.state()))
                    .collect::<Vec<_>>(),
            )
        })?;

        if !refs_snapshot.iter().all(|(_, s)| matches!(s, RefState::Disk(_))) {
            return Ok(EvictOutcome::LeftDirty);
        }

        let mut image = PageImage::new(kind, 0, 0);
        for (key, state) in &refs_snapshot {
            if let RefState::Disk(addr) = state {
                image.push_cell(&Cell::addr(&addr.to_bytes(), key));
            }
        }
        let addr = self.block_mgr.write(&image.finish())?;

        let parent = self.meta.read().get(&arena_id.0).and_then(|m| m.parent);
        match parent {
            Some(p_arena) => {
                let idx = self.find_ref_index(p_arena, arena_id)?;
                self.arena.with_page(p_arena, |p| {
                    let internal = p.as_internal().expect("parent must be internal");
                    internal.read().refs[idx].set_state(RefState::Disk(addr));
                })?;
            }
            None => {
                *self.root.write() = Ref::on_disk(Vec::new(), addr);
            }
        }
        self.arena.take(arena_id)?;
        self.meta.write().remove(&arena_id.0);
        Ok(EvictOutcome::Evicted(EvictionKind::ReconcileAndDiscard))
    }

    fn evict_leaf(&self, arena_id: PageArenaId, kind: PageKind) -> Result<EvictOutcome> {
        let page = self.arena.take(arena_id)?;
        let write_block = |bytes: &[u8]| self.block_mgr.write(bytes);
        let is_committed = |t: TxnId| self.txn.is_committed(t);
        let is_aborted = |t: TxnId| self.txn.is_aborted(t);
        let visible_all = |t: TxnId| self.txn.visible_all(t);
        let ctx = VisibilityCtx {
            is_committed: &is_committed,
            is_aborted: &is_aborted,
            visible_all: &visible_all,
            max_page_size: self.leaf_page_max,
            overflow_threshold: self.overflow_threshold,
        };

        let result = match kind {
            PageKind::RowLeaf => {
                let guard = page.as_row_leaf().expect("row leaf body").read();
                reconcile_row_leaf(&guard, &ReconcileFlags::eviction(), &ctx, &write_block)?
            }
            PageKind::ColVarLeaf => {
                let guard = page.as_col_var_leaf().expect("col-var leaf body").read();
                reconcile_col_var_leaf(&guard, &ReconcileFlags::eviction(), &ctx, &write_block)?
            }
            PageKind::ColFixLeaf => {
                let guard = page.as_col_fix_leaf().expect("col-fix leaf body").read();
                reconcile_col_fix_leaf(&guard, &ReconcileFlags::eviction(), &ctx, &write_block)?
            }
            _ => unreachable!("evict_leaf called with a non-leaf page kind"),
        };

        self.apply_reconcile_result(arena_id, kind, result)
    }

    /// Install a reconciled leaf's boundaries into its parent (or the
    /// tree root), choosing the eviction kind the overall result earns.
    fn apply_reconcile_result(
        &self,
        evicted_id: PageArenaId,
        kind: PageKind,
        result: ReconcileResult,
    ) -> Result<EvictOutcome> {
        let parent = self.meta.read().get(&evicted_id.0).and_then(|m| m.parent);

        let mut refs: Vec<Ref> = Vec::with_capacity(result.boundaries.len().max(1));
        let mut resident: Vec<Option<PageArenaId>> = Vec::with_capacity(result.boundaries.len().max(1));
        let mut spilled = false;
        let mut restored_any = false;

        for boundary in result.boundaries {
            match boundary.image {
                BoundaryImage::Written(addr) => {
                    refs.push(Ref::on_disk(boundary.first_key, addr));
                    resident.push(None);
                }
                BoundaryImage::InMemory(image) => {
                    if boundary.saved.is_empty() {
                        let addr = self.block_mgr.write(&image.finish())?;
                        refs.push(Ref::on_disk(boundary.first_key, addr));
                        resident.push(None);
                    } else if self.lookaside_enabled.load(Ordering::Relaxed) {
                        let addr = self.block_mgr.write(&image.finish())?;
                        for (i, s) in boundary.saved.iter().enumerate() {
                            self.cache.lookaside().insert(
                                LookasideKey {
                                    tree_id: self.id,
                                    block_addr: addr.offset,
                                    counter: i as u64,
                                    onpage_txn: s.txn_id,
                                    source_key: s.key.clone(),
                                },
                                LookasideRecord {
                                    txn_id: s.txn_id,
                                    value: s.value.clone(),
                                },
                            );
                        }
                        spilled = true;
                        refs.push(Ref::on_disk(boundary.first_key, addr));
                        resident.push(None);
                    } else {
                        restored_any = true;
                        let recno = image.recno();
                        let cells = image.cells()?;
                        let page = self.build_leaf_page(kind, recno, &cells, &boundary.saved)?;
                        page.mark_dirty();
                        page.set_memory_footprint(image.len());
                        let id = self.arena.insert(page);
                        refs.push(Ref::resident(boundary.first_key, id));
                        resident.push(Some(id));
                    }
                }
            }
        }

        match parent {
            Some(p_arena) => {
                let idx = self.find_ref_index(p_arena, evicted_id)?;
                self.arena.with_page(p_arena, |p| {
                    let internal = p.as_internal().expect("parent must be internal");
                    internal.write().refs.splice(idx..idx + 1, refs);
                    p.mark_dirty();
                })?;
                for id in resident.into_iter().flatten() {
                    self.meta
                        .write()
                        .insert(id.0, PageMeta { parent: Some(p_arena), origin_addr: None });
                }
            }
            None => self.replace_root(refs, resident, kind)?,
        }

        self.meta.write().remove(&evicted_id.0);

        let outcome = if spilled {
            EvictionKind::LookasideEviction
        } else if restored_any {
            EvictionKind::SplitRestore
        } else {
            EvictionKind::ReconcileAndDiscard
        };
        Ok(EvictOutcome::Evicted(outcome))
    }

    /// Install reconciled refs as the new root: one ref replaces the root
    /// directly, more than one grows the tree by a level, and zero
    /// collapses it back to an empty leaf.
    fn replace_root(
        &self,
        mut refs: Vec<Ref>,
        resident: Vec<Option<PageArenaId>>,
        leaf_kind: PageKind,
    ) -> Result<()> {
        match refs.len() {
            0 => {
                let page = Self::new_empty_leaf_of(leaf_kind);
                let id = self.arena.insert(page);
                self.meta.write().insert(id.0, PageMeta { parent: None, origin_addr: None });
                *self.root.write() = Ref::resident(Vec::new(), id);
            }
            1 => {
                let r = refs.remove(0);
                if let Some(id) = resident.into_iter().next().flatten() {
                    self.meta.write().insert(id.0, PageMeta { parent: None, origin_addr: None });
                }
                *self.root.write() = r;
            }
            _ => {
                let internal_kind = if leaf_kind.is_column_store() {
                    PageKind::ColInternal
                } else {
                    PageKind::RowInternal
                };
                let page = if internal_kind == PageKind::ColInternal {
                    Page::from_col_internal(Internal { refs })
                } else {
                    Page::from_internal(Internal { refs })
                };
                page.mark_dirty();
                let new_root_id = self.arena.insert(page);
                for id in resident.into_iter().flatten() {
                    self.meta
                        .write()
                        .insert(id.0, PageMeta { parent: Some(new_root_id), origin_addr: None });
                }
                self.meta
                    .write()
                    .insert(new_root_id.0, PageMeta { parent: None, origin_addr: None });
                *self.root.write() = Ref::resident(Vec::new(), new_root_id);
            }
        }
        Ok(())
    }
}

impl Evictable for Tree {
    fn candidates(&self) -> Vec<PageId> {
        self.meta.read().keys().map(|&idx| PageId::new(idx as u64)).collect()
    }

    fn memory_footprint(&self, page: PageId) -> usize {
        self.arena
            .with_page(Self::to_arena_id(page), |p| p.memory_footprint())
            .unwrap_or(0)
    }

    fn read_generation(&self, page: PageId) -> u64 {
        self.arena
            .with_page(Self::to_arena_id(page), |p| p.read_generation())
            .unwrap_or(0)
    }

    fn is_dirty(&self, page: PageId) -> bool {
        self.arena
            .with_page(Self::to_arena_id(page), |p| p.is_dirty())
            .unwrap_or(false)
    }

    fn is_root_or_pinned(&self, page: PageId) -> bool {
        let id = Self::to_arena_id(page);
        let is_root = matches!(self.root.read().state(), RefState::Mem(r) if r == id);
        let pinned = self.arena.with_page(id, |p| p.is_pinned()).unwrap_or(false);
        is_root || pinned
    }

    fn evict(&self, page: PageId) -> Result<EvictOutcome> {
        let arena_id = Self::to_arena_id(page);
        let (dirty, pinned, kind) = self
            .arena
            .with_page(arena_id, |p| (p.is_dirty(), p.is_pinned(), p.kind()))?;
        if pinned {
            return Ok(EvictOutcome::LeftDirty);
        }
        if !dirty {
            let origin = self.meta.read().get(&arena_id.0).and_then(|m| m.origin_addr);
            if let Some(addr) = origin {
                return self.clean_discard(arena_id, addr);
            }
        }
        if kind.is_internal() {
            self.evict_internal(arena_id)
        } else {
            self.evict_leaf(arena_id, kind)
        }
    }
}

fn recno_from_key(key: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::Corruption("expected an 8-byte recno key".into()))?;
    Ok(u64::from_be_bytes(arr))
}

/// Spin past `Error::Busy` (a concurrent fault-in or split in flight),
/// retrying until the racing operation finishes.
fn retry_busy<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    loop {
        match f() {
            Err(Error::Busy) => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::IsolationLevel;
    use tempfile::tempdir;

    fn new_tree(dir: &std::path::Path) -> Tree {
        let block_mgr = Arc::new(BlockManager::create(dir.join("t.db")).unwrap());
        let cache = Arc::new(PageCache::new(10 * 1024 * 1024));
        let txn = Arc::new(TxnManager::new());
        Tree::create(1, PageKind::RowLeaf, block_mgr, cache, txn, 32 * 1024, 4096)
    }

    #[test]
    fn fresh_tree_has_a_resident_root() {
        let dir = tempdir().unwrap();
        let tree = new_tree(dir.path());
        assert!(matches!(tree.root.read().state(), RefState::Mem(_)));
    }

    #[test]
    fn clean_page_faulted_from_disk_discards_without_reconciling() {
        let dir = tempdir().unwrap();
        let block_mgr = Arc::new(BlockManager::create(dir.path().join("t.db")).unwrap());
        let mut image = PageImage::new(PageKind::RowLeaf, 0, 0);
        image.push_cell(&Cell::key_value(b"a", b"1"));
        let addr = block_mgr.write(&image.finish()).unwrap();

        let cache = Arc::new(PageCache::new(10 * 1024 * 1024));
        let txn = Arc::new(TxnManager::new());
        let tree = Tree::open(1, addr, block_mgr, cache, txn, 32 * 1024, 4096);

        let root_id = tree.fault_in_root().unwrap();
        assert!(!tree.arena.with_page(root_id, |p| p.is_dirty()).unwrap());

        let outcome = tree.evict(Tree::to_page_id(root_id)).unwrap();
        assert_eq!(outcome, EvictOutcome::Evicted(EvictionKind::CleanDiscard));
        assert!(matches!(tree.root.read().state(), RefState::Disk(a) if a == addr));
        assert!(tree.meta.read().is_empty());
    }

    #[test]
    fn dirty_empty_root_reconciles_on_evict() {
        let dir = tempdir().unwrap();
        let tree = new_tree(dir.path());
        let root_id = tree.fault_in_root().unwrap();
        tree.arena.with_page(root_id, |p| p.mark_dirty()).unwrap();

        let outcome = tree.evict(Tree::to_page_id(root_id)).unwrap();
        assert_eq!(outcome, EvictOutcome::Evicted(EvictionKind::ReconcileAndDiscard));
        assert!(matches!(tree.root.read().state(), RefState::Disk(_)));
    }

    #[test]
    fn uncommitted_insert_evicts_via_lookaside_by_default() {
        let dir = tempdir().unwrap();
        let tree = new_tree(dir.path());
        let root_id = tree.fault_in_root().unwrap();

        let mut writer = tree.txn.begin(IsolationLevel::Snapshot);
        let writer_id = tree.txn.assign_id_if_needed(&mut writer);

        tree.arena
            .with_page(root_id, |p| {
                let leaf = p.as_row_leaf().unwrap();
                leaf.write()
                    .inserts
                    .chain_or_insert(b"new".to_vec())
                    .prepend(writer_id, Some(b"value".to_vec()));
                p.mark_dirty();
            })
            .unwrap();

        let outcome = tree.evict(Tree::to_page_id(root_id)).unwrap();
        assert_eq!(outcome, EvictOutcome::Evicted(EvictionKind::LookasideEviction));
        assert!(matches!(tree.root.read().state(), RefState::Disk(_)));
        assert_eq!(tree.cache.lookaside().len(), 1);
    }

    #[test]
    fn uncommitted_insert_splits_restore_when_lookaside_disabled() {
        let dir = tempdir().unwrap();
        let tree = new_tree(dir.path());
        tree.disable_lookaside();
        let root_id = tree.fault_in_root().unwrap();

        let mut writer = tree.txn.begin(IsolationLevel::Snapshot);
        let writer_id = tree.txn.assign_id_if_needed(&mut writer);

        tree.arena
            .with_page(root_id, |p| {
                let leaf = p.as_row_leaf().unwrap();
                leaf.write()
                    .inserts
                    .chain_or_insert(b"new".to_vec())
                    .prepend(writer_id, Some(b"value".to_vec()));
                p.mark_dirty();
            })
            .unwrap();

        let outcome = tree.evict(Tree::to_page_id(root_id)).unwrap();
        assert_eq!(outcome, EvictOutcome::Evicted(EvictionKind::SplitRestore));
        assert!(matches!(tree.root.read().state(), RefState::Mem(_)));
        assert!(tree.cache.lookaside().is_empty());
    }

    #[test]
    fn descend_to_leaf_finds_the_only_page_in_a_fresh_tree() {
        let dir = tempdir().unwrap();
        let tree = new_tree(dir.path());
        let id = tree.descend_to_leaf(b"whatever").unwrap();
        assert!(matches!(tree.root.read().state(), RefState::Mem(r) if r == id));
    }
}
