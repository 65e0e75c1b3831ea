//! Per-slot "insert list": newly inserted keys not yet folded into a
//! page's on-disk image.
//!
//! A `BTreeMap` gives the ordered, greater-than-searchable structure a
//! lock-free skip list would, without the hand-rolled pointer chasing;
//! insert/lookup calls take a page lock already, so a lock-free
//! structure buys nothing an ordered map doesn't here — the
//! same trade the block manager's extent lists make.

use std::collections::BTreeMap;

use super::update::UpdateChain;

#[derive(Debug, Default)]
pub struct InsertList<K: Ord + Clone> {
    entries: BTreeMap<K, UpdateChain>,
}

impl<K: Ord + Clone> InsertList<K> {
    pub fn new() -> Self {
        InsertList {
            entries: BTreeMap::new(),
        }
    }

    pub fn chain_or_insert(&mut self, key: K) -> &UpdateChain {
        self.entries.entry(key).or_insert_with(UpdateChain::new)
    }

    pub fn get(&self, key: &K) -> Option<&UpdateChain> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<UpdateChain> {
        self.entries.remove(key)
    }

    /// The first entry with key >= `key` — used by `search_near` and the
    /// "deleted-cell run" skip-ahead.
    pub fn first_at_or_after(&self, key: &K) -> Option<(&K, &UpdateChain)> {
        self.entries.range(key.clone()..).next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &UpdateChain)> {
        self.entries.iter()
    }

    /// Splits off every entry with key >= `key` into a new list, leaving
    /// the smaller keys behind — used when a leaf outgrows its split
    /// threshold.
    pub fn split_off(&mut self, key: &K) -> InsertList<K> {
        InsertList {
            entries: self.entries.split_off(key),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TxnId;

    #[test]
    fn chain_or_insert_reuses_existing_chain() {
        let mut list: InsertList<Vec<u8>> = InsertList::new();
        list.chain_or_insert(b"a".to_vec())
            .prepend(TxnId::new(1), Some(b"1".to_vec()));
        list.chain_or_insert(b"a".to_vec())
            .prepend(TxnId::new(2), Some(b"2".to_vec()));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn first_at_or_after_finds_successor() {
        let mut list: InsertList<u64> = InsertList::new();
        list.chain_or_insert(10);
        list.chain_or_insert(30);
        let (k, _) = list.first_at_or_after(&20).unwrap();
        assert_eq!(*k, 30);
    }
}
