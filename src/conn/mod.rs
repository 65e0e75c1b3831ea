//! Public entry points: opening a database directory, and the per-thread
//! session surface built on top of it.
//!
//! This is the only module callers outside this crate are expected to
//! use directly; everything below (`btree`, `cache`, `reconcile`, `block`,
//! `txn`) is reachable but exists to make `Connection`/`Session` work.

mod connection;
mod metadata;
mod session;
mod uri;

pub use connection::Connection;
pub use session::Session;
pub use uri::{Scheme, Uri};
