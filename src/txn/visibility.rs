//! Visibility predicates.

use crate::common::TxnId;

use super::transaction::{IsolationLevel, Snapshot};

/// Is `u` visible given `snapshot` under `isolation`?
///
/// Aborted updates are never visible regardless of isolation; callers pass
/// `aborted` for the update being tested.
pub fn is_visible(isolation: IsolationLevel, snapshot: &Snapshot, u: TxnId, aborted: bool) -> bool {
    if aborted {
        return false;
    }
    match isolation {
        IsolationLevel::ReadUncommitted => true,
        IsolationLevel::ReadCommitted | IsolationLevel::Snapshot => {
            u < snapshot.min || (u < snapshot.max && !snapshot.ids.contains(&u))
        }
    }
}

/// `visible_all(u)` ≡ `u < oldest_id` — every active reader's snapshot
/// already excludes or supersedes `u`. Memory for an update satisfying
/// this may be freed once no hazard pointer references the page.
pub fn visible_all(u: TxnId, oldest_id: TxnId) -> bool {
    u < oldest_id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(min: u64, max: u64, ids: &[u64]) -> Snapshot {
        Snapshot {
            min: TxnId::new(min),
            max: TxnId::new(max),
            ids: ids.iter().map(|&i| TxnId::new(i)).collect(),
        }
    }

    #[test]
    fn read_uncommitted_sees_everything_but_aborted() {
        let snapshot = snap(5, 5, &[]);
        assert!(is_visible(
            IsolationLevel::ReadUncommitted,
            &snapshot,
            TxnId::new(100),
            false
        ));
        assert!(!is_visible(
            IsolationLevel::ReadUncommitted,
            &snapshot,
            TxnId::new(100),
            true
        ));
    }

    #[test]
    fn snapshot_isolation_excludes_concurrent_active_txns() {
        let snapshot = snap(10, 20, &[15]);
        assert!(is_visible(
            IsolationLevel::Snapshot,
            &snapshot,
            TxnId::new(5),
            false
        ));
        assert!(!is_visible(
            IsolationLevel::Snapshot,
            &snapshot,
            TxnId::new(15),
            false
        ));
        assert!(is_visible(
            IsolationLevel::Snapshot,
            &snapshot,
            TxnId::new(18),
            false
        ));
        assert!(!is_visible(
            IsolationLevel::Snapshot,
            &snapshot,
            TxnId::new(20),
            false
        ));
    }

    #[test]
    fn visible_all_is_below_oldest_id() {
        assert!(visible_all(TxnId::new(4), TxnId::new(5)));
        assert!(!visible_all(TxnId::new(5), TxnId::new(5)));
    }
}
