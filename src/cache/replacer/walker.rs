use std::collections::VecDeque;

use crate::common::PageId;
use crate::error::Result;

use super::super::evictable::{EvictOutcome, Evictable};
use super::super::stats::CacheStats;

/// Walks a tree's candidate pages round-robin, scoring each by
/// `footprint / (read_generation + 1)` so a big, long-untouched page beats
/// a small, recently-touched one, and fills a bounded victim queue for
/// workers to drain.
pub struct EvictionWalker {
    queue_capacity: usize,
    position: usize,
}

impl EvictionWalker {
    pub fn new(queue_capacity: usize) -> Self {
        EvictionWalker {
            queue_capacity,
            position: 0,
        }
    }

    /// One walk pass: scores `tree`'s candidates (skipping root/pinned
    /// pages unless dirty), returns up to `queue_capacity` victims,
    /// ordered best-first, and advances the round-robin cursor so the
    /// next pass starts roughly where this one left off.
    pub fn select_victims(&mut self, tree: &dyn Evictable) -> Vec<PageId> {
        let mut candidates = tree.candidates();
        if candidates.is_empty() {
            return Vec::new();
        }
        self.position %= candidates.len();
        candidates.rotate_left(self.position);

        let mut scored: Vec<(PageId, u64)> = candidates
            .into_iter()
            .filter(|&p| !tree.is_root_or_pinned(p) || tree.is_dirty(p))
            .map(|p| {
                let footprint = tree.memory_footprint(p) as u64;
                let gen = tree.read_generation(p);
                let score = footprint / (gen + 1);
                (p, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.truncate(self.queue_capacity);

        self.position = self.position.wrapping_add(scored.len()).max(1);
        scored.into_iter().map(|(p, _)| p).collect()
    }

    /// Drain a victim queue, asking `tree` to evict each and recording the
    /// outcome in `stats`. Returns the number actually evicted.
    pub fn drain(
        &self,
        tree: &dyn Evictable,
        victims: VecDeque<PageId>,
        stats: &CacheStats,
    ) -> Result<usize> {
        let mut evicted = 0;
        for page in victims {
            let footprint = tree.memory_footprint(page) as i64;
            let is_internal = tree.is_root_or_pinned(page);
            match tree.evict(page)? {
                EvictOutcome::Evicted(_) => {
                    stats.page_discarded(footprint, is_internal);
                    evicted += 1;
                }
                EvictOutcome::LeftDirty => {}
            }
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct FakeTree {
        pages: Mutex<HashMap<PageId, (usize, u64, bool, bool)>>, // footprint, gen, dirty, pinned
    }

    impl Evictable for FakeTree {
        fn candidates(&self) -> Vec<PageId> {
            self.pages.lock().keys().copied().collect()
        }
        fn memory_footprint(&self, page: PageId) -> usize {
            self.pages.lock()[&page].0
        }
        fn read_generation(&self, page: PageId) -> u64 {
            self.pages.lock()[&page].1
        }
        fn is_dirty(&self, page: PageId) -> bool {
            self.pages.lock()[&page].2
        }
        fn is_root_or_pinned(&self, page: PageId) -> bool {
            self.pages.lock()[&page].3
        }
        fn evict(&self, page: PageId) -> Result<EvictOutcome> {
            self.pages.lock().remove(&page);
            Ok(EvictOutcome::Evicted(
                super::super::evictable::EvictionKind::CleanDiscard,
            ))
        }
    }

    #[test]
    fn selects_high_footprint_low_generation_first() {
        let mut pages = HashMap::new();
        pages.insert(PageId::new(1), (100, 10, false, false));
        pages.insert(PageId::new(2), (10_000, 1, false, false));
        let tree = FakeTree {
            pages: Mutex::new(pages),
        };
        let mut walker = EvictionWalker::new(10);
        let victims = walker.select_victims(&tree);
        assert_eq!(victims[0], PageId::new(2));
    }

    #[test]
    fn skips_pinned_clean_pages() {
        let mut pages = HashMap::new();
        pages.insert(PageId::new(1), (100, 1, false, true)); // pinned & clean
        pages.insert(PageId::new(2), (100, 1, true, true)); // pinned but dirty
        let tree = FakeTree {
            pages: Mutex::new(pages),
        };
        let mut walker = EvictionWalker::new(10);
        let victims = walker.select_victims(&tree);
        assert_eq!(victims, vec![PageId::new(2)]);
    }

    #[test]
    fn drain_updates_stats() {
        let mut pages = HashMap::new();
        pages.insert(PageId::new(1), (4096, 1, false, false));
        let tree = FakeTree {
            pages: Mutex::new(pages),
        };
        let stats = CacheStats::new();
        stats.page_instantiated(4096, false);
        let walker = EvictionWalker::new(10);
        let evicted = walker
            .drain(&tree, VecDeque::from(vec![PageId::new(1)]), &stats)
            .unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(stats.bytes_in_use(), 0);
    }
}
