//! Parent-to-child pointers and the page arena they index into.

use parking_lot::RwLock;

use crate::block::BlockAddr;
use crate::error::{Error, Result};

use super::page::Page;

/// Identifies a slot in a [`PageArena`]. Stable for the page's residency;
/// recycled once the slot is freed on eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageArenaId(pub usize);

/// A resident or evicted child. `state` is the single source of truth
/// for whether the child may be
/// touched. Readers are expected to check `state` *again* after
/// publishing a hazard record, to resolve races with a concurrent
/// evictor.
#[derive(Debug, Clone)]
pub enum RefState {
    /// Not resident; `addr` names the on-disk block.
    Disk(BlockAddr),
    /// Resident in `arena[id]`.
    Mem(PageArenaId),
    /// Transiently locked for a state transition (split, fault-in).
    Locked,
    /// A fault-in read is in flight.
    Reading,
    /// The child has been deleted; see the page-deletion record handling
    /// in reconcile's "empty page" edge case.
    Deleted,
    /// A split is in flight; the parent must retry its descent.
    Split,
}

/// One parent-to-child pointer. Parent pages exclusively own their refs;
/// a ref conditionally owns its child page (only while `state` is
/// `Mem`/`Locked` and no split is in progress).
#[derive(Debug)]
pub struct Ref {
    /// Promoted key (row store) or starting recno, big-endian encoded
    /// (column store). The 0th ref on a row-internal page carries an
    /// empty key — logically "negative infinity", never consulted by
    /// search, truncated to a single byte on write.
    pub promoted_key: Vec<u8>,
    state: RwLock<RefState>,
}

impl Ref {
    pub fn on_disk(promoted_key: Vec<u8>, addr: BlockAddr) -> Self {
        Ref {
            promoted_key,
            state: RwLock::new(RefState::Disk(addr)),
        }
    }

    pub fn resident(promoted_key: Vec<u8>, id: PageArenaId) -> Self {
        Ref {
            promoted_key,
            state: RwLock::new(RefState::Mem(id)),
        }
    }

    pub fn state(&self) -> RefState {
        self.state.read().clone()
    }

    pub fn set_state(&self, state: RefState) {
        *self.state.write() = state;
    }

    /// CAS-style transition: only applies `to` if the current state
    /// matches `from` (compared structurally via the discriminant, since
    /// `Disk`/`Mem` carry data that legitimately differs run to run).
    pub fn try_transition(&self, matches_from: impl Fn(&RefState) -> bool, to: RefState) -> bool {
        let mut guard = self.state.write();
        if matches_from(&guard) {
            *guard = to;
            true
        } else {
            false
        }
    }
}

/// A fixed-growth slab of resident pages, indexed by [`PageArenaId`].
/// `Tree` owns exactly one; refs name slots in it rather than holding raw
/// pointers, so eviction can invalidate a slot without invalidating other
/// refs' memory.
#[derive(Debug, Default)]
pub struct PageArena {
    slots: RwLock<Vec<Option<Page>>>,
    free: RwLock<Vec<usize>>,
}

impl PageArena {
    pub fn new() -> Self {
        PageArena::default()
    }

    pub fn insert(&self, page: Page) -> PageArenaId {
        if let Some(idx) = self.free.write().pop() {
            self.slots.write()[idx] = Some(page);
            return PageArenaId(idx);
        }
        let mut slots = self.slots.write();
        slots.push(Some(page));
        PageArenaId(slots.len() - 1)
    }

    pub fn with_page<R>(&self, id: PageArenaId, f: impl FnOnce(&Page) -> R) -> Result<R> {
        let slots = self.slots.read();
        match slots.get(id.0).and_then(|s| s.as_ref()) {
            Some(page) => Ok(f(page)),
            None => Err(Error::Unsupported("dangling page arena id".into())),
        }
    }

    /// Evict: free the slot, returning the page so the caller (reconcile)
    /// can finish writing it out.
    pub fn take(&self, id: PageArenaId) -> Result<Page> {
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(id.0)
            .ok_or_else(|| Error::Unsupported("dangling page arena id".into()))?;
        let page = slot
            .take()
            .ok_or_else(|| Error::Unsupported("page arena slot already empty".into()))?;
        self.free.write().push(id.0);
        Ok(page)
    }

    pub fn len(&self) -> usize {
        self.slots.read().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageKind;

    #[test]
    fn arena_insert_then_take_frees_slot() {
        let arena = PageArena::new();
        let id = arena.insert(Page::new_row_leaf());
        assert_eq!(arena.len(), 1);
        assert_eq!(
            arena.with_page(id, |p| p.kind()).unwrap(),
            PageKind::RowLeaf
        );
        arena.take(id).unwrap();
        assert_eq!(arena.len(), 0);
        assert!(arena.with_page(id, |_| ()).is_err());
    }

    #[test]
    fn freed_slots_are_reused() {
        let arena = PageArena::new();
        let a = arena.insert(Page::new_row_leaf());
        arena.take(a).unwrap();
        let b = arena.insert(Page::new_row_leaf());
        assert_eq!(a, b);
    }

    #[test]
    fn ref_transitions_atomically() {
        let r = Ref::resident(Vec::new(), PageArenaId(0));
        let ok = r.try_transition(|s| matches!(s, RefState::Mem(_)), RefState::Locked);
        assert!(ok);
        assert!(matches!(r.state(), RefState::Locked));
        let fail = r.try_transition(|s| matches!(s, RefState::Mem(_)), RefState::Split);
        assert!(!fail);
    }
}
