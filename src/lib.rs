//! ArchEngine core — an embedded, transactional key/value storage engine.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         conn (§6 API)                            │
//! │        Connection::open → Session → Cursor / transactions        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   txn (MVCC)        │  collab (pluggable: compressor, WAL, ...)  │
//! ├──────────────────────┴────────────────────────────────────────┤
//! │                 btree (pages, update chains, Cursor)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   cache (eviction, lookaside)  │  reconcile (page → block)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │               block (extents, checkpoints, the file)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                   storage::page (on-disk format)                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything above the line sits on `btree::Tree`: cursors drive reads
//! and writes against resident pages; eviction (`cache`) and checkpoints
//! (`conn::Session::checkpoint`) drive pages through `reconcile` and out
//! through `block::BlockManager` to disk. MVCC visibility (`txn`) is the
//! thread tying update chains, reconciliation, and cursor reads together.
//!
//! # Modules
//! - [`common`] — shared identifiers (`PageId`, `TxnId`) and size constants
//! - [`error`] — the engine's error taxonomy (`Result`, `Error`)
//! - [`config`] — configuration-string parsing and per-method validation
//! - [`storage::page`] — on-disk page header and cell encoding
//! - [`block`] — extent lists, the block manager, checkpoints
//! - [`cache`] — the page cache, eviction policy, and lookaside store
//! - [`btree`] — page residency, update chains, and the cursor API
//! - [`reconcile`] — turning in-memory pages into on-disk blocks
//! - [`txn`] — MVCC snapshots and visibility
//! - [`collab`] — collaborator trait contracts (compressor, encryptor,
//!   collator, extractor, WAL, event handler)
//! - [`conn`] — `Connection`/`Session`: the public entry point
//!
//! # Quick start
//! ```no_run
//! use archengine_core::conn::Connection;
//!
//! let conn = Connection::open("./db", "create=true").unwrap();
//! let mut session = conn.open_session();
//! session.create("table:accounts", "").unwrap();
//!
//! session.begin_transaction("").unwrap();
//! {
//!     let mut cursor = session.open_cursor("table:accounts", "").unwrap();
//!     cursor.set_key(b"alice".to_vec());
//!     cursor.set_value(b"100".to_vec());
//!     cursor.insert().unwrap();
//! }
//! session.commit_transaction("").unwrap();
//! session.checkpoint("").unwrap();
//! ```

pub mod block;
pub mod btree;
pub mod cache;
pub mod collab;
pub mod common;
pub mod config;
pub mod conn;
pub mod error;
pub mod reconcile;
pub mod storage;
pub mod txn;

pub use common::{PageId, TxnId};
pub use conn::{Connection, Session};
pub use error::{Error, Result};
