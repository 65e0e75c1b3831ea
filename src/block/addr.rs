//! Address cookies: `(offset, size, checksum)`, carried by `btree::Ref` and
//! internal-page `Addr` cells to name an on-disk block.

use crate::error::{Error, Result};

/// Names a block within the file: offset, size, and checksum for the
/// referencing page to store. A fixed 16-byte encoding rather than a
/// packed cookie, since this crate does not target byte-for-byte
/// on-disk compatibility with any other engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockAddr {
    pub offset: u64,
    pub size: u32,
    pub checksum: u32,
}

impl BlockAddr {
    pub const ENCODED_SIZE: usize = 16;

    /// Sentinel meaning "no block" — an empty tree's root, or a ref that
    /// has never been reconciled.
    pub const INVALID: BlockAddr = BlockAddr {
        offset: 0,
        size: 0,
        checksum: 0,
    };

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        out[0..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_SIZE {
            return Err(Error::Corruption(format!(
                "address cookie has wrong length: {}",
                bytes.len()
            )));
        }
        Ok(BlockAddr {
            offset: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            size: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            checksum: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let addr = BlockAddr {
            offset: 8192,
            size: 4096,
            checksum: 0xCAFEBABE,
        };
        let bytes = addr.to_bytes();
        assert_eq!(BlockAddr::from_bytes(&bytes).unwrap(), addr);
    }

    #[test]
    fn invalid_is_not_valid() {
        assert!(!BlockAddr::INVALID.is_valid());
        assert!(BlockAddr {
            offset: 1,
            ..BlockAddr::INVALID
        }
        .is_valid());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(BlockAddr::from_bytes(&[0u8; 10]).is_err());
    }
}
