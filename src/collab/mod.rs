//! Collaborator trait contracts: the pluggable interfaces a
//! connection can be extended with, plus the minimal default
//! implementations the engine uses when none is configured.
//!
//! This module deliberately stops at the trait boundary. Concrete
//! compression, encryption, and WAL record codecs are out of scope
//!; what lives here is the shape every such plug-in must
//! have so the rest of the engine (reconciliation, the block manager,
//! the connection) can call through it uniformly.

mod collator;
mod event;
mod wal;

pub use collator::{Collator, DefaultCollator};
pub use event::{EventHandler, TracingEventHandler};
pub use wal::WriteAheadLog;

use crate::error::Result;

/// Transforms a page image's raw bytes before they reach the block
/// manager, and back on read. No concrete algorithm ships here — only
/// the extension point.
pub trait Compressor: Send + Sync {
    fn name(&self) -> &str;

    /// Compress `src`, appending to `dst`. Returns `false` if the result
    /// would not be smaller, in which case the caller stores `src` raw.
    fn compress(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<bool>;

    fn decompress(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<()>;
}

/// Transforms a page image's bytes for confidentiality. Runs after
/// compression on write, before decompression on read — the ordering a
/// real engine's `__wt_bm_write`/`__wt_bm_read` pipeline uses.
pub trait Encryptor: Send + Sync {
    fn name(&self) -> &str;

    fn encrypt(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<()>;

    fn decrypt(&self, src: &[u8], dst: &mut Vec<u8>) -> Result<()>;
}

/// Extracts one or more index keys from a primary key/value pair.
/// Out of scope for the btree engine itself (no index layer here), but
/// the trait is part of the collaborator surface a schema layer built
/// on this crate would plug into.
pub trait Extractor: Send + Sync {
    fn extract(&self, key: &[u8], value: &[u8]) -> Result<Vec<Vec<u8>>>;
}
