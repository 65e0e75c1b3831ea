//! The row-store cursor: the public read/write entry point built on top
//! of [`Tree::descend_to_leaf`].
//!
//! A cursor owns a key buffer and a value buffer. `search`/`search_near`
//! populate the value buffer on success; `insert`/`update`/`remove`
//! consume whatever is currently staged in them. Positioning failures
//! always reset the cursor rather than leaving it pointed at stale state.
//!
//! Scoped to row-store trees (`PageKind::RowLeaf`/`RowInternal`):
//! column-store trees are fully reconciled and evicted by the rest of
//! this crate, but this cursor only understands byte-string keys, not
//! the recno addressing column leaves use. Opening one against a
//! column-store tree returns [`Error::Unsupported`].

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::TxnId;
use crate::error::{Error, Result};
use crate::storage::page::PageKind;
use crate::txn::Txn;

use super::page::RowLeaf;
use super::ref_::PageArenaId;
use super::update::Visible;
use super::Tree;

#[derive(Debug, Clone)]
struct Position {
    leaf: PageArenaId,
    key: Vec<u8>,
}

/// A cursor over one row-store [`Tree`], bound to the transaction it was
/// opened under.
pub struct Cursor {
    tree: Arc<Tree>,
    txn: Arc<Mutex<Txn>>,
    overwrite: bool,
    key_buf: Vec<u8>,
    value_buf: Vec<u8>,
    position: Option<Position>,
}

impl Cursor {
    /// Open a cursor on `tree` under `txn`, with the `overwrite` cursor
    /// config.
    pub fn open(tree: Arc<Tree>, txn: Arc<Mutex<Txn>>, overwrite: bool) -> Result<Self> {
        let root_id = tree.fault_in_root()?;
        let kind = tree.arena().with_page(root_id, |p| p.kind())?;
        if kind != PageKind::RowLeaf && kind != PageKind::RowInternal {
            return Err(Error::Unsupported(
                "btree::Cursor only supports row-store trees".into(),
            ));
        }
        Ok(Cursor {
            tree,
            txn,
            overwrite,
            key_buf: Vec::new(),
            value_buf: Vec::new(),
            position: None,
        })
    }

    pub fn key(&self) -> &[u8] {
        &self.key_buf
    }

    pub fn value(&self) -> &[u8] {
        &self.value_buf
    }

    pub fn set_key(&mut self, key: Vec<u8>) {
        self.key_buf = key;
    }

    pub fn set_value(&mut self, value: Vec<u8>) {
        self.value_buf = value;
    }

    /// Discard any current position without touching the transaction.
    pub fn reset(&mut self) {
        self.position = None;
    }

    /// No further positioning is possible after this; dropping the
    /// cursor is equivalent, this just documents the end of its use.
    pub fn close(&mut self) {
        self.reset();
    }

    /// Exact-match lookup. On success, `value()` holds the visible value
    /// and the cursor is positioned there for subsequent `next`/`prev`.
    pub fn search(&mut self) -> Result<()> {
        let leaf_id = self.tree.descend_to_leaf(&self.key_buf)?;
        let txn = self.txn.lock();
        let found = self.tree.arena().with_page(leaf_id, |page| {
            let body = page.as_row_leaf().expect("row-store cursor on a non-row page");
            let leaf = body.read();
            visible_value(&self.tree, &leaf, &txn, &self.key_buf)
        })?;
        match found {
            Visible::Value(v) => {
                self.value_buf = v;
                self.position = Some(Position {
                    leaf: leaf_id,
                    key: self.key_buf.clone(),
                });
                Ok(())
            }
            _ => {
                self.position = None;
                Err(Error::NotFound)
            }
        }
    }

    /// Position on the closest visible key to the current key buffer.
    /// Returns -1/0/1 for found-less-than / found-equal / found-greater,
    /// preferring the nearest key at or after the target.
    pub fn search_near(&mut self) -> Result<i32> {
        let leaf_id = self.tree.descend_to_leaf(&self.key_buf)?;
        let txn = self.txn.lock();
        let target = self.key_buf.clone();

        if let Some((k, v)) = self.tree.arena().with_page(leaf_id, |page| {
            let body = page.as_row_leaf().expect("row-store cursor on a non-row page");
            let leaf = body.read();
            first_visible_from(&self.tree, &leaf, &txn, Some(target.as_slice()), true)
        })? {
            let exact = if k == target { 0 } else { 1 };
            self.key_buf = k.clone();
            self.value_buf = v;
            self.position = Some(Position { leaf: leaf_id, key: k });
            return Ok(exact);
        }

        let mut current = leaf_id;
        loop {
            match next_leaf(&self.tree, current)? {
                Some(id) => {
                    current = id;
                    if let Some((k, v)) = self.tree.arena().with_page(id, |page| {
                        let body = page.as_row_leaf().expect("row-store cursor on a non-row page");
                        let leaf = body.read();
                        first_visible_from(&self.tree, &leaf, &txn, None, true)
                    })? {
                        self.key_buf = k.clone();
                        self.value_buf = v;
                        self.position = Some(Position { leaf: id, key: k });
                        return Ok(1);
                    }
                }
                None => break,
            }
        }

        if let Some((k, v)) = self.tree.arena().with_page(leaf_id, |page| {
            let body = page.as_row_leaf().expect("row-store cursor on a non-row page");
            let leaf = body.read();
            last_visible_from(&self.tree, &leaf, &txn, Some(target.as_slice()), true)
        })? {
            self.key_buf = k.clone();
            self.value_buf = v;
            self.position = Some(Position { leaf: leaf_id, key: k });
            return Ok(-1);
        }

        let mut current = leaf_id;
        loop {
            match prev_leaf(&self.tree, current)? {
                Some(id) => {
                    current = id;
                    if let Some((k, v)) = self.tree.arena().with_page(id, |page| {
                        let body = page.as_row_leaf().expect("row-store cursor on a non-row page");
                        let leaf = body.read();
                        last_visible_from(&self.tree, &leaf, &txn, None, false)
                    })? {
                        self.key_buf = k.clone();
                        self.value_buf = v;
                        self.position = Some(Position { leaf: id, key: k });
                        return Ok(-1);
                    }
                }
                None => break,
            }
        }

        self.position = None;
        Err(Error::NotFound)
    }

    /// Advance to the next visible key in ascending order. With no current
    /// position, starts at the smallest key in the tree.
    pub fn next(&mut self) -> Result<()> {
        let txn = self.txn.lock();
        let (mut leaf_id, mut from) = match &self.position {
            Some(p) => (p.leaf, Some(p.key.clone())),
            None => (descend_leftmost(&self.tree, self.tree.fault_in_root()?)?, None),
        };
        loop {
            let found = self.tree.arena().with_page(leaf_id, |page| {
                let body = page.as_row_leaf().expect("row-store cursor on a non-row page");
                let leaf = body.read();
                match &from {
                    Some(k) => first_visible_from(&self.tree, &leaf, &txn, Some(k.as_slice()), false),
                    None => first_visible_from(&self.tree, &leaf, &txn, None, true),
                }
            })?;
            if let Some((k, v)) = found {
                self.key_buf = k.clone();
                self.value_buf = v;
                self.position = Some(Position { leaf: leaf_id, key: k });
                return Ok(());
            }
            match next_leaf(&self.tree, leaf_id)? {
                Some(id) => {
                    leaf_id = id;
                    from = None;
                }
                None => {
                    self.position = None;
                    return Err(Error::NotFound);
                }
            }
        }
    }

    /// Move to the previous visible key in descending order. With no
    /// current position, starts at the largest key in the tree.
    pub fn prev(&mut self) -> Result<()> {
        let txn = self.txn.lock();
        let (mut leaf_id, mut upto) = match &self.position {
            Some(p) => (p.leaf, Some(p.key.clone())),
            None => (descend_rightmost(&self.tree, self.tree.fault_in_root()?)?, None),
        };
        loop {
            let found = self.tree.arena().with_page(leaf_id, |page| {
                let body = page.as_row_leaf().expect("row-store cursor on a non-row page");
                let leaf = body.read();
                match &upto {
                    Some(k) => last_visible_from(&self.tree, &leaf, &txn, Some(k.as_slice()), false),
                    None => last_visible_from(&self.tree, &leaf, &txn, None, false),
                }
            })?;
            if let Some((k, v)) = found {
                self.key_buf = k.clone();
                self.value_buf = v;
                self.position = Some(Position { leaf: leaf_id, key: k });
                return Ok(());
            }
            match prev_leaf(&self.tree, leaf_id)? {
                Some(id) => {
                    leaf_id = id;
                    upto = None;
                }
                None => {
                    self.position = None;
                    return Err(Error::NotFound);
                }
            }
        }
    }

    /// Insert the staged key/value. Fails with `DuplicateKey` unless the
    /// cursor's `overwrite` config is set, in which case it upserts
    ///.
    pub fn insert(&mut self) -> Result<()> {
        let overwrite = self.overwrite;
        self.write(|present| present && !overwrite, false)
    }

    /// Overwrite an existing key. Fails with `NotFound` if it is absent.
    pub fn update(&mut self) -> Result<()> {
        self.write(|_| false, true)
    }

    /// Tombstone the staged key. Fails with `NotFound` if it is absent or
    /// already deleted under this transaction's view.
    pub fn remove(&mut self) -> Result<()> {
        let leaf_id = self.tree.descend_to_leaf(&self.key_buf)?;
        let mut txn = self.txn.lock();
        let txn_id = self.tree.txn_manager().assign_id_if_needed(&mut txn);
        let key = self.key_buf.clone();

        let existed = self.tree.arena().with_page(leaf_id, |page| {
            let body = page.as_row_leaf().expect("row-store cursor on a non-row page");
            let mut leaf = body.write();
            let existing = visible_value(&self.tree, &leaf, &txn, &key);
            if matches!(existing, Visible::NotFound | Visible::Deleted) {
                return false;
            }
            write_row(&mut leaf, &key, None, txn_id);
            page.mark_dirty();
            page.note_deleted();
            true
        })?;

        if !existed {
            self.position = None;
            return Err(Error::NotFound);
        }
        txn.record_modified(Tree::to_page_id(leaf_id));
        self.position = Some(Position { leaf: leaf_id, key });
        Ok(())
    }

    /// Shared insert/update path. `rejects_if_present` decides whether an
    /// existing visible value blocks the write (insert without
    /// overwrite); `requires_present` decides whether a missing value
    /// blocks it (update).
    fn write(
        &mut self,
        rejects_if_present: impl Fn(bool) -> bool,
        requires_present: bool,
    ) -> Result<()> {
        let leaf_id = self.tree.descend_to_leaf(&self.key_buf)?;
        let mut txn = self.txn.lock();
        let txn_id = self.tree.txn_manager().assign_id_if_needed(&mut txn);
        let key = self.key_buf.clone();
        let value = self.value_buf.clone();

        let result = self.tree.arena().with_page(leaf_id, |page| {
            let body = page.as_row_leaf().expect("row-store cursor on a non-row page");
            let mut leaf = body.write();
            let existing = visible_value(&self.tree, &leaf, &txn, &key);
            let present = !matches!(existing, Visible::NotFound | Visible::Deleted);
            if rejects_if_present(present) {
                return Err(Error::DuplicateKey);
            }
            if requires_present && !present {
                return Err(Error::NotFound);
            }
            write_row(&mut leaf, &key, Some(value), txn_id);
            page.mark_dirty();
            Ok(())
        })?;
        if let Err(err) = result {
            self.position = None;
            return Err(err);
        }
        txn.record_modified(Tree::to_page_id(leaf_id));
        self.position = Some(Position { leaf: leaf_id, key });
        Ok(())
    }
}

fn write_row(leaf: &mut RowLeaf, key: &[u8], value: Option<Vec<u8>>, txn_id: TxnId) {
    if let Ok(idx) = leaf.slots.binary_search_by(|s| s.key.as_slice().cmp(key)) {
        leaf.slots[idx].chain.prepend(txn_id, value);
    } else {
        leaf.inserts.chain_or_insert(key.to_vec()).prepend(txn_id, value);
    }
}

fn visible_value(tree: &Tree, leaf: &RowLeaf, txn: &Txn, key: &[u8]) -> Visible {
    let is_visible = |u: TxnId| tree.txn_manager().is_visible(txn, u);
    if let Some(chain) = leaf.inserts.get(&key.to_vec()) {
        let v = chain.visible(&is_visible);
        if !matches!(v, Visible::NotFound) {
            return v;
        }
    }
    if let Ok(idx) = leaf.slots.binary_search_by(|s| s.key.as_slice().cmp(key)) {
        return leaf.slots[idx].visible(&is_visible);
    }
    Visible::NotFound
}

fn merged_keys(leaf: &RowLeaf) -> Vec<Vec<u8>> {
    let mut set: BTreeSet<Vec<u8>> = leaf.slots.iter().map(|s| s.key.clone()).collect();
    for (k, _) in leaf.inserts.iter() {
        set.insert(k.clone());
    }
    set.into_iter().collect()
}

/// Smallest visible key in `leaf` that is `>= from` (inclusive) or `> from`
/// (exclusive). `from: None` means unbounded (every key qualifies). Skips
/// tombstones and not-yet-visible inserts.
fn first_visible_from(
    tree: &Tree,
    leaf: &RowLeaf,
    txn: &Txn,
    from: Option<&[u8]>,
    inclusive: bool,
) -> Option<(Vec<u8>, Vec<u8>)> {
    for k in merged_keys(leaf) {
        if let Some(from) = from {
            if inclusive {
                if k.as_slice() < from {
                    continue;
                }
            } else if k.as_slice() <= from {
                continue;
            }
        }
        if let Visible::Value(v) = visible_value(tree, leaf, txn, &k) {
            return Some((k, v));
        }
    }
    None
}

/// Largest visible key in `leaf` that is `<= upto` (inclusive) or `< upto`
/// (exclusive). `upto: None` means unbounded (every key qualifies). Skips
/// tombstones and not-yet-visible inserts.
fn last_visible_from(
    tree: &Tree,
    leaf: &RowLeaf,
    txn: &Txn,
    upto: Option<&[u8]>,
    inclusive: bool,
) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut keys = merged_keys(leaf);
    keys.reverse();
    for k in keys {
        if let Some(upto) = upto {
            if inclusive {
                if k.as_slice() > upto {
                    continue;
                }
            } else if k.as_slice() >= upto {
                continue;
            }
        }
        if let Visible::Value(v) = visible_value(tree, leaf, txn, &k) {
            return Some((k, v));
        }
    }
    None
}

fn descend_leftmost(tree: &Tree, mut current: PageArenaId) -> Result<PageArenaId> {
    loop {
        let kind = tree.arena().with_page(current, |p| p.kind())?;
        if kind.is_leaf() {
            return Ok(current);
        }
        current = tree.fault_in_child(current, 0)?;
    }
}

fn descend_rightmost(tree: &Tree, mut current: PageArenaId) -> Result<PageArenaId> {
    loop {
        let kind = tree.arena().with_page(current, |p| p.kind())?;
        if kind.is_leaf() {
            return Ok(current);
        }
        let last = tree.arena().with_page(current, |p| {
            let internal = p.as_internal().expect("internal page expected");
            internal.read().refs.len().saturating_sub(1)
        })?;
        current = tree.fault_in_child(current, last)?;
    }
}

fn next_leaf(tree: &Tree, leaf: PageArenaId) -> Result<Option<PageArenaId>> {
    let mut current = leaf;
    loop {
        let parent = tree.meta.read().get(&current.0).and_then(|m| m.parent);
        let Some(parent_id) = parent else {
            return Ok(None);
        };
        let idx = tree.find_ref_index(parent_id, current)?;
        let count = tree.arena().with_page(parent_id, |p| {
            let internal = p.as_internal().expect("internal page expected");
            internal.read().refs.len()
        })?;
        if idx + 1 < count {
            let child = tree.fault_in_child(parent_id, idx + 1)?;
            return Ok(Some(descend_leftmost(tree, child)?));
        }
        current = parent_id;
    }
}

fn prev_leaf(tree: &Tree, leaf: PageArenaId) -> Result<Option<PageArenaId>> {
    let mut current = leaf;
    loop {
        let parent = tree.meta.read().get(&current.0).and_then(|m| m.parent);
        let Some(parent_id) = parent else {
            return Ok(None);
        };
        let idx = tree.find_ref_index(parent_id, current)?;
        if idx > 0 {
            let child = tree.fault_in_child(parent_id, idx - 1)?;
            return Ok(Some(descend_rightmost(tree, child)?));
        }
        current = parent_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockManager;
    use crate::cache::PageCache;
    use crate::txn::{IsolationLevel, TxnManager};
    use tempfile::tempdir;

    fn new_cursor_env(dir: &std::path::Path) -> (Arc<Tree>, Arc<TxnManager>) {
        let block_mgr = Arc::new(BlockManager::create(dir.join("t.db")).unwrap());
        let cache = Arc::new(PageCache::new(10 * 1024 * 1024));
        let txn_mgr = Arc::new(TxnManager::new());
        let tree = Arc::new(Tree::create(
            1,
            PageKind::RowLeaf,
            block_mgr,
            cache,
            txn_mgr.clone(),
            32 * 1024,
            4096,
        ));
        (tree, txn_mgr)
    }

    #[test]
    fn insert_then_search_round_trips() {
        let dir = tempdir().unwrap();
        let (tree, txn_mgr) = new_cursor_env(dir.path());
        let txn = Arc::new(Mutex::new(txn_mgr.begin(IsolationLevel::Snapshot)));
        let mut cursor = Cursor::open(tree, txn, false).unwrap();

        cursor.set_key(b"a".to_vec());
        cursor.set_value(b"1".to_vec());
        cursor.insert().unwrap();

        cursor.set_key(b"a".to_vec());
        cursor.search().unwrap();
        assert_eq!(cursor.value(), b"1");
    }

    #[test]
    fn duplicate_insert_without_overwrite_fails() {
        let dir = tempdir().unwrap();
        let (tree, txn_mgr) = new_cursor_env(dir.path());
        let txn = Arc::new(Mutex::new(txn_mgr.begin(IsolationLevel::Snapshot)));
        let mut cursor = Cursor::open(tree, txn, false).unwrap();

        cursor.set_key(b"a".to_vec());
        cursor.set_value(b"1".to_vec());
        cursor.insert().unwrap();

        cursor.set_key(b"a".to_vec());
        cursor.set_value(b"2".to_vec());
        assert!(matches!(cursor.insert(), Err(Error::DuplicateKey)));
    }

    #[test]
    fn remove_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let (tree, txn_mgr) = new_cursor_env(dir.path());
        let txn = Arc::new(Mutex::new(txn_mgr.begin(IsolationLevel::Snapshot)));
        let mut cursor = Cursor::open(tree, txn, false).unwrap();

        cursor.set_key(b"missing".to_vec());
        assert!(matches!(cursor.remove(), Err(Error::NotFound)));
    }

    #[test]
    fn forward_iteration_visits_keys_in_order() {
        let dir = tempdir().unwrap();
        let (tree, txn_mgr) = new_cursor_env(dir.path());
        let txn = Arc::new(Mutex::new(txn_mgr.begin(IsolationLevel::Snapshot)));
        let mut cursor = Cursor::open(tree, txn, false).unwrap();

        for (k, v) in [(b"b".to_vec(), b"2".to_vec()), (b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())] {
            cursor.set_key(k.clone());
            cursor.set_value(v.clone());
            cursor.insert().unwrap();
        }

        cursor.reset();
        let mut seen = Vec::new();
        while cursor.next().is_ok() {
            seen.push(cursor.key().to_vec());
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn reverse_iteration_visits_keys_in_order() {
        let dir = tempdir().unwrap();
        let (tree, txn_mgr) = new_cursor_env(dir.path());
        let txn = Arc::new(Mutex::new(txn_mgr.begin(IsolationLevel::Snapshot)));
        let mut cursor = Cursor::open(tree, txn, false).unwrap();

        for (k, v) in [(b"b".to_vec(), b"2".to_vec()), (b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())] {
            cursor.set_key(k.clone());
            cursor.set_value(v.clone());
            cursor.insert().unwrap();
        }

        cursor.reset();
        let mut seen = Vec::new();
        while cursor.prev().is_ok() {
            seen.push(cursor.key().to_vec());
        }
        assert_eq!(seen, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn removed_key_is_skipped_by_iteration() {
        let dir = tempdir().unwrap();
        let (tree, txn_mgr) = new_cursor_env(dir.path());
        let txn = Arc::new(Mutex::new(txn_mgr.begin(IsolationLevel::Snapshot)));
        let mut cursor = Cursor::open(tree, txn, false).unwrap();

        cursor.set_key(b"a".to_vec());
        cursor.set_value(b"1".to_vec());
        cursor.insert().unwrap();
        cursor.set_key(b"b".to_vec());
        cursor.set_value(b"2".to_vec());
        cursor.insert().unwrap();

        cursor.set_key(b"a".to_vec());
        cursor.remove().unwrap();

        cursor.reset();
        let mut seen = Vec::new();
        while cursor.next().is_ok() {
            seen.push(cursor.key().to_vec());
        }
        assert_eq!(seen, vec![b"b".to_vec()]);
    }

    #[test]
    fn search_near_returns_successor_when_exact_absent() {
        let dir = tempdir().unwrap();
        let (tree, txn_mgr) = new_cursor_env(dir.path());
        let txn = Arc::new(Mutex::new(txn_mgr.begin(IsolationLevel::Snapshot)));
        let mut cursor = Cursor::open(tree, txn, false).unwrap();

        cursor.set_key(b"a".to_vec());
        cursor.set_value(b"1".to_vec());
        cursor.insert().unwrap();
        cursor.set_key(b"c".to_vec());
        cursor.set_value(b"3".to_vec());
        cursor.insert().unwrap();

        cursor.set_key(b"b".to_vec());
        let exact = cursor.search_near().unwrap();
        assert_eq!(exact, 1);
        assert_eq!(cursor.key(), b"c");
    }
}
