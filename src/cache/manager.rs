//! Ties the cache's stats, eviction policy, victim walker, and lookaside
//! store into one handle shared by every open tree.
//!
//! Actual background-thread scheduling (an "eviction server") is left to
//! `conn`: this type only knows how to run one eviction pass to
//! completion. That keeps the cache module testable without spinning
//! real OS threads, decoupling eviction logic from whatever thread
//! calls into it.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::Result;

use super::evictable::Evictable;
use super::lookaside::{LookasidePolicy, LookasideStore};
use super::policy::EvictionPolicy;
use super::replacer::EvictionWalker;
use super::stats::{CacheStats, ReadGenerationClock};

pub struct PageCache {
    stats: CacheStats,
    policy: EvictionPolicy,
    gen_clock: ReadGenerationClock,
    lookaside: LookasideStore,
    lookaside_policy: LookasidePolicy,
    walker: Mutex<EvictionWalker>,
}

impl PageCache {
    pub fn new(cache_size_bytes: u64) -> Self {
        PageCache {
            stats: CacheStats::new(),
            policy: EvictionPolicy::new(cache_size_bytes),
            gen_clock: ReadGenerationClock::new(),
            lookaside: LookasideStore::create(),
            lookaside_policy: LookasidePolicy::default(),
            walker: Mutex::new(EvictionWalker::new(128)),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn lookaside(&self) -> &LookasideStore {
        &self.lookaside
    }

    pub fn lookaside_policy(&self) -> &LookasidePolicy {
        &self.lookaside_policy
    }

    /// Bump the shared read-generation clock; called on every page touch
    /// so the walker can tell hot pages from cold ones.
    pub fn touch(&self) -> u64 {
        self.gen_clock.bump()
    }

    /// True once `bytes_in_use` has crossed the trigger threshold — callers
    /// on the hot path (cursor operations) should run a bounded pass before
    /// proceeding.2 "application-thread eviction".
    pub fn needs_opportunistic_eviction(&self) -> bool {
        self.policy.exceeds_trigger(self.stats.bytes_in_use().max(0) as u64)
    }

    /// Runs eviction passes against `tree` until `bytes_in_use` drops back
    /// to the target threshold or a pass makes no further progress.
    /// Returns the total number of pages evicted.
    pub fn run_eviction_pass(&self, tree: &dyn Evictable) -> Result<usize> {
        let mut total = 0;
        loop {
            let in_use = self.stats.bytes_in_use().max(0) as u64;
            if self.policy.is_below_target(in_use) {
                break;
            }
            let victims = self.walker.lock().select_victims(tree);
            if victims.is_empty() {
                break;
            }
            let evicted = self
                .walker
                .lock()
                .drain(tree, VecDeque::from(victims), &self.stats)?;
            if evicted == 0 {
                break;
            }
            total += evicted;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::evictable::{EvictOutcome, EvictionKind};
    use crate::common::PageId;
    use std::collections::HashMap;

    struct FakeTree {
        pages: Mutex<HashMap<PageId, usize>>,
    }

    impl Evictable for FakeTree {
        fn candidates(&self) -> Vec<PageId> {
            self.pages.lock().keys().copied().collect()
        }
        fn memory_footprint(&self, page: PageId) -> usize {
            self.pages.lock()[&page]
        }
        fn read_generation(&self, _page: PageId) -> u64 {
            0
        }
        fn is_dirty(&self, _page: PageId) -> bool {
            false
        }
        fn is_root_or_pinned(&self, _page: PageId) -> bool {
            false
        }
        fn evict(&self, page: PageId) -> Result<EvictOutcome> {
            self.pages.lock().remove(&page);
            Ok(EvictOutcome::Evicted(EvictionKind::CleanDiscard))
        }
    }

    #[test]
    fn eviction_pass_drains_until_below_target() {
        let cache = PageCache::new(1000);
        let mut pages = HashMap::new();
        for i in 0..20 {
            pages.insert(PageId::new(i), 100);
            cache.stats.page_instantiated(100, false);
        }
        let tree = FakeTree {
            pages: Mutex::new(pages),
        };
        assert!(cache.needs_opportunistic_eviction());
        let evicted = cache.run_eviction_pass(&tree).unwrap();
        assert!(evicted > 0);
        assert!(cache.policy.is_below_target(cache.stats.bytes_in_use().max(0) as u64));
    }

    #[test]
    fn touch_advances_clock() {
        let cache = PageCache::new(1000);
        let a = cache.touch();
        let b = cache.touch();
        assert!(b > a);
    }
}
