//! Engine-wide default sizes.
//!
//! These are the compiled-in defaults consulted when a `Session`/`Connection`
//! config string (parsed by [`crate::config`]) omits the corresponding key.

/// Minimum unit of block-manager allocation, in bytes. All extents and block
/// writes are rounded up to a multiple of this.
pub const DEFAULT_ALLOCATION_SIZE: usize = 4096;

/// Default maximum size of a reconciled leaf page image before a split
/// boundary is forced.
pub const DEFAULT_LEAF_PAGE_MAX: usize = 32 * 1024;

/// Default maximum size of a reconciled internal page image.
pub const DEFAULT_INTERNAL_PAGE_MAX: usize = 4 * 1024;

/// Values at or above this fraction of `leaf_page_max` are written as
/// overflow items rather than inline cells.
pub const DEFAULT_OVERFLOW_SIZE_THRESHOLD_PCT: u8 = 25;

/// Default soft eviction target, as a percentage of the configured cache
/// size. Below this, the eviction worker is idle.
pub const DEFAULT_EVICTION_TARGET_PCT: u8 = 80;

/// Default hard eviction trigger. Above this, application threads perform
/// opportunistic eviction inline before returning from cursor operations.
pub const DEFAULT_EVICTION_TRIGGER_PCT: u8 = 95;

/// Page-level counter of skipped tombstones past which a leaf is marked
/// evict-soon even without memory pressure.
pub const DELETE_EVICT_THRESHOLD: u32 = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_size_is_power_of_two() {
        assert!(DEFAULT_ALLOCATION_SIZE.is_power_of_two());
    }

    #[test]
    fn target_is_below_trigger() {
        assert!(DEFAULT_EVICTION_TARGET_PCT < DEFAULT_EVICTION_TRIGGER_PCT);
    }

    #[test]
    fn leaf_page_max_exceeds_internal() {
        assert!(DEFAULT_LEAF_PAGE_MAX >= DEFAULT_INTERNAL_PAGE_MAX);
    }
}
