//! A reconciliation boundary: one emitted chunk of a page's disk image.

use crate::block::BlockAddr;
use crate::common::TxnId;
use crate::storage::page::PageImage;

/// A single update this boundary could not safely drop, preserved for
/// split-restore (the owning txn may still commit or roll back) or
/// lookaside (a concurrent reader's snapshot still needs it).
#[derive(Debug, Clone)]
pub struct SavedUpdate {
    pub key: Vec<u8>,
    pub txn_id: TxnId,
    pub value: Option<Vec<u8>>,
}

/// Either a block already written to disk, or an in-memory image kept
/// resident because some of its updates could not be written out yet.
#[derive(Debug, Clone)]
pub enum BoundaryImage {
    Written(BlockAddr),
    InMemory(Box<PageImage>),
}

#[derive(Debug, Clone)]
pub struct Boundary {
    pub image: BoundaryImage,
    pub first_key: Vec<u8>,
    /// Non-empty only when this boundary could not be written clean —
    /// split-restore/lookaside material for the keys it covers.
    pub saved: Vec<SavedUpdate>,
}

impl Boundary {
    pub fn is_clean(&self) -> bool {
        self.saved.is_empty() && matches!(self.image, BoundaryImage::Written(_))
    }
}
