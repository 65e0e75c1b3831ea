//! MVCC / transaction layer: snapshot visibility rules consumed by the
//! btree, cache, and reconciler.

mod manager;
mod transaction;
mod visibility;

pub use manager::TxnManager;
pub use transaction::{IsolationLevel, Snapshot, Txn, TxnState};
pub use visibility::{is_visible, visible_all};
