//! Fixed header every on-disk page image begins with.
//!
//! Compressed or encrypted payloads never cover this header — the block
//! manager reads it uncompressed to learn how to decode the remainder.

/// Discriminates the five in-memory page representations.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    #[default]
    Invalid = 0,
    RowLeaf = 1,
    RowInternal = 2,
    ColFixLeaf = 3,
    ColVarLeaf = 4,
    ColInternal = 5,
}

impl PageKind {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PageKind::RowLeaf,
            2 => PageKind::RowInternal,
            3 => PageKind::ColFixLeaf,
            4 => PageKind::ColVarLeaf,
            5 => PageKind::ColInternal,
            _ => PageKind::Invalid,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            PageKind::RowLeaf | PageKind::ColFixLeaf | PageKind::ColVarLeaf
        )
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, PageKind::RowInternal | PageKind::ColInternal)
    }

    pub fn is_column_store(&self) -> bool {
        matches!(
            self,
            PageKind::ColFixLeaf | PageKind::ColVarLeaf | PageKind::ColInternal
        )
    }
}

/// Per-page disk flags, packed into [`PageHeader::flags`].
pub mod flags {
    pub const COMPRESSED: u8 = 0b0000_0001;
    pub const ENCRYPTED: u8 = 0b0000_0010;
    /// Set when every entry on the page is a deleted tombstone; lets
    /// reconciliation special-case the "empty page" edge case (§4.3).
    pub const EMPTY_ALL_DELETED: u8 = 0b0000_0100;
}

/// Fixed-size header preceding a page's cells on disk.
///
/// # Layout (34 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     alloc_size  (bytes allocated on disk for this image)
/// 4       4     mem_size    (decompressed in-memory size)
/// 8       1     kind        (PageKind as u8)
/// 9       4     entry_count
/// 13      8     recno       (starting record number; 0 for row stores)
/// 21      8     write_gen
/// 29      1     flags       (PageFlags)
/// 30      4     checksum    (CRC32, little-endian, of the remainder)
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub alloc_size: u32,
    pub mem_size: u32,
    pub kind: PageKind,
    pub entry_count: u32,
    pub recno: u64,
    pub write_gen: u64,
    pub flags: u8,
    pub checksum: u32,
}

impl PageHeader {
    pub const SIZE: usize = 34;

    const OFF_ALLOC_SIZE: usize = 0;
    const OFF_MEM_SIZE: usize = 4;
    const OFF_KIND: usize = 8;
    const OFF_ENTRY_COUNT: usize = 9;
    const OFF_RECNO: usize = 13;
    const OFF_WRITE_GEN: usize = 21;
    const OFF_FLAGS: usize = 29;
    const OFF_CHECKSUM: usize = 30;

    pub fn new(kind: PageKind) -> Self {
        PageHeader {
            kind,
            ..Default::default()
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");
        PageHeader {
            alloc_size: u32::from_le_bytes(data[Self::OFF_ALLOC_SIZE..Self::OFF_ALLOC_SIZE + 4].try_into().unwrap()),
            mem_size: u32::from_le_bytes(data[Self::OFF_MEM_SIZE..Self::OFF_MEM_SIZE + 4].try_into().unwrap()),
            kind: PageKind::from_u8(data[Self::OFF_KIND]),
            entry_count: u32::from_le_bytes(data[Self::OFF_ENTRY_COUNT..Self::OFF_ENTRY_COUNT + 4].try_into().unwrap()),
            recno: u64::from_le_bytes(data[Self::OFF_RECNO..Self::OFF_RECNO + 8].try_into().unwrap()),
            write_gen: u64::from_le_bytes(data[Self::OFF_WRITE_GEN..Self::OFF_WRITE_GEN + 8].try_into().unwrap()),
            flags: data[Self::OFF_FLAGS],
            checksum: u32::from_le_bytes(data[Self::OFF_CHECKSUM..Self::OFF_CHECKSUM + 4].try_into().unwrap()),
        }
    }

    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");
        data[Self::OFF_ALLOC_SIZE..Self::OFF_ALLOC_SIZE + 4].copy_from_slice(&self.alloc_size.to_le_bytes());
        data[Self::OFF_MEM_SIZE..Self::OFF_MEM_SIZE + 4].copy_from_slice(&self.mem_size.to_le_bytes());
        data[Self::OFF_KIND] = self.kind as u8;
        data[Self::OFF_ENTRY_COUNT..Self::OFF_ENTRY_COUNT + 4].copy_from_slice(&self.entry_count.to_le_bytes());
        data[Self::OFF_RECNO..Self::OFF_RECNO + 8].copy_from_slice(&self.recno.to_le_bytes());
        data[Self::OFF_WRITE_GEN..Self::OFF_WRITE_GEN + 8].copy_from_slice(&self.write_gen.to_le_bytes());
        data[Self::OFF_FLAGS] = self.flags;
        data[Self::OFF_CHECKSUM..Self::OFF_CHECKSUM + 4].copy_from_slice(&self.checksum.to_le_bytes());
    }

    /// CRC32 over `image` with the checksum field zeroed, matching
    /// `compute_checksum`/`verify_checksum`'s "hash around itself" pattern.
    pub fn compute_checksum(image: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&image[..Self::OFF_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&image[Self::OFF_CHECKSUM + 4..]);
        hasher.finalize()
    }

    pub fn verify_checksum(&self, image: &[u8]) -> bool {
        self.checksum == Self::compute_checksum(image)
    }
}
