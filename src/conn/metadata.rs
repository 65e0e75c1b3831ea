//! The metadata tree and the turtle bootstrap file.
//!
//! Every created table gets a row in one reserved tree (`metadata:`)
//! recording the id it was assigned. That tree is a `Tree` like any
//! other, which raises the obvious bootstrapping problem: where is *its*
//! root address recorded? The answer is the turtle file, a one-line file
//! outside the tree itself; this module reuses the same trick for each
//! table's own root cookie rather than inventing a second format.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::block::{BlockAddr, BlockManager};
use crate::btree::Tree;
use crate::cache::PageCache;
use crate::error::{Error, Result};
use crate::storage::page::PageKind;
use crate::txn::TxnManager;

pub const METADATA_FILE_NAME: &str = "metadata.ae";
pub const TURTLE_FILE_NAME: &str = "turtle.ae";
pub const METADATA_TREE_ID: u64 = 0;

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::Corruption("root cookie file has an odd number of hex digits".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| Error::Corruption("root cookie file is not valid hex".into()))
        })
        .collect()
}

/// Read a one-line root-cookie file (the turtle file, or a per-table
/// equivalent), if it exists.
pub fn read_root_cookie(path: &Path) -> Result<Option<BlockAddr>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let bytes = decode_hex(trimmed)?;
    Ok(Some(BlockAddr::from_bytes(&bytes)?))
}

/// Durably record a tree's current root address via rename-into-place, so
/// a crash mid-write never leaves a half-written cookie behind.
pub fn write_root_cookie(path: &Path, addr: BlockAddr) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, encode_hex(&addr.to_bytes()))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Open (creating if absent) the reserved metadata tree and its backing
/// file, recovering its root from the turtle file when one exists.
pub fn open_metadata_tree(
    home: &Path,
    cache: Arc<PageCache>,
    txn: Arc<TxnManager>,
    leaf_page_max: usize,
    overflow_threshold: usize,
) -> Result<(Arc<Tree>, Arc<BlockManager>)> {
    let data_path = home.join(METADATA_FILE_NAME);
    let turtle_path = home.join(TURTLE_FILE_NAME);
    let existing_root = read_root_cookie(&turtle_path)?;

    let block_mgr = Arc::new(if data_path.exists() {
        BlockManager::open(&data_path)?
    } else {
        BlockManager::create(&data_path)?
    });

    let tree = match existing_root {
        Some(addr) if addr.is_valid() => Tree::open(
            METADATA_TREE_ID,
            addr,
            block_mgr.clone(),
            cache,
            txn,
            leaf_page_max,
            overflow_threshold,
        ),
        _ => Tree::create(
            METADATA_TREE_ID,
            PageKind::RowLeaf,
            block_mgr.clone(),
            cache,
            txn,
            leaf_page_max,
            overflow_threshold,
        ),
    };
    Ok((Arc::new(tree), block_mgr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn root_cookie_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("turtle.ae");
        assert!(read_root_cookie(&path).unwrap().is_none());

        let addr = BlockAddr {
            offset: 4096,
            size: 512,
            checksum: 0xdead_beef,
        };
        write_root_cookie(&path, addr).unwrap();
        assert_eq!(read_root_cookie(&path).unwrap(), Some(addr));
    }

    #[test]
    fn fresh_metadata_tree_has_no_turtle_file_yet() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(PageCache::new(1024 * 1024));
        let txn = Arc::new(TxnManager::new());
        let (tree, _bm) = open_metadata_tree(dir.path(), cache, txn, 32 * 1024, 4096).unwrap();
        assert_eq!(tree.id(), METADATA_TREE_ID);
        assert!(!dir.path().join(TURTLE_FILE_NAME).exists());
    }
}
