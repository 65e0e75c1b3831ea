//! Variable-length cells making up a page's body.

use crate::error::{Error, Result};

/// Discriminates what a [`Cell`]'s payload means.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    /// Inline key/value pair (row store) or value (column store).
    KeyValue = 1,
    /// Key stored as an overflow item; payload is the overflow address cookie.
    KeyOverflow = 2,
    /// Value stored as an overflow item; payload is the overflow address cookie.
    ValueOverflow = 3,
    /// Transient marker left in an in-memory page after an overflow value's
    /// blocks are queued for free but are not yet globally visible. Must
    /// never be written to disk — see `CellType::is_transient`.
    ValueOverflowRemoved = 4,
    /// Tombstone: the key existed but was removed.
    Deleted = 5,
    /// Internal-page ref cell: child address cookie plus promoted key
    /// (row) or starting recno (column).
    Addr = 6,
    /// Column-store run-length-encoded repeat of the previous value.
    RunLength = 7,
}

impl CellType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            1 => CellType::KeyValue,
            2 => CellType::KeyOverflow,
            3 => CellType::ValueOverflow,
            4 => CellType::ValueOverflowRemoved,
            5 => CellType::Deleted,
            6 => CellType::Addr,
            7 => CellType::RunLength,
            other => return Err(Error::Corruption(format!("unknown cell type {other}"))),
        })
    }

    /// Cell types that must never reach an on-disk block image (resolves
    /// the "transient cell types on disk" open question).
    pub fn is_transient(&self) -> bool {
        matches!(self, CellType::ValueOverflowRemoved)
    }
}

/// One encoded entry in a page's body.
///
/// `data` holds the type-specific payload: for `KeyValue`/`Deleted` it is a
/// length-prefixed `(key, value)` pair (key empty for pure column-store
/// values); for `*Overflow` it is the block manager's address cookie bytes;
/// for `Addr` it is `(address cookie, promoted key or recno)`; for
/// `RunLength` it is `(repeat count as u64 LE, value bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub cell_type: CellType,
    pub data: Vec<u8>,
}

impl Cell {
    pub fn key_value(key: &[u8], value: &[u8]) -> Self {
        let mut data = Vec::with_capacity(key.len() + value.len() + 10);
        write_varint(&mut data, key.len() as u64);
        data.extend_from_slice(key);
        write_varint(&mut data, value.len() as u64);
        data.extend_from_slice(value);
        Cell {
            cell_type: CellType::KeyValue,
            data,
        }
    }

    pub fn deleted(key: &[u8]) -> Self {
        let mut data = Vec::with_capacity(key.len() + 5);
        write_varint(&mut data, key.len() as u64);
        data.extend_from_slice(key);
        Cell {
            cell_type: CellType::Deleted,
            data,
        }
    }

    pub fn overflow(cell_type: CellType, addr_cookie: &[u8]) -> Self {
        debug_assert!(matches!(
            cell_type,
            CellType::KeyOverflow | CellType::ValueOverflow
        ));
        Cell {
            cell_type,
            data: addr_cookie.to_vec(),
        }
    }

    /// A row-store cell whose value lives in a dedicated overflow block:
    /// inline key, followed by the value's address cookie.
    pub fn key_value_overflow(key: &[u8], value_addr_cookie: &[u8]) -> Self {
        let mut data = Vec::with_capacity(key.len() + value_addr_cookie.len() + 5);
        write_varint(&mut data, key.len() as u64);
        data.extend_from_slice(key);
        data.extend_from_slice(value_addr_cookie);
        Cell {
            cell_type: CellType::ValueOverflow,
            data,
        }
    }

    /// Split a `ValueOverflow` cell back into its key and the value's
    /// address cookie bytes.
    pub fn split_key_value_overflow(&self) -> Result<(&[u8], &[u8])> {
        if self.cell_type != CellType::ValueOverflow {
            return Err(Error::Corruption("not a value-overflow cell".into()));
        }
        let mut cursor = &self.data[..];
        let key_len = read_varint(&mut cursor)? as usize;
        split_at(cursor, key_len)
    }

    pub fn addr(addr_cookie: &[u8], promoted_key: &[u8]) -> Self {
        let mut data = Vec::with_capacity(addr_cookie.len() + promoted_key.len() + 10);
        write_varint(&mut data, addr_cookie.len() as u64);
        data.extend_from_slice(addr_cookie);
        data.extend_from_slice(promoted_key);
        Cell {
            cell_type: CellType::Addr,
            data,
        }
    }

    pub fn run_length(count: u64, value: &[u8]) -> Self {
        let mut data = Vec::with_capacity(value.len() + 10);
        write_varint(&mut data, count);
        data.extend_from_slice(value);
        Cell {
            cell_type: CellType::RunLength,
            data,
        }
    }

    /// Split a `KeyValue`/`Deleted` cell's payload back into its key and
    /// (possibly absent) value.
    pub fn split_key_value(&self) -> Result<(&[u8], Option<&[u8]>)> {
        let mut cursor = &self.data[..];
        let key_len = read_varint(&mut cursor)? as usize;
        let (key, rest) = split_at(cursor, key_len)?;
        match self.cell_type {
            CellType::Deleted => Ok((key, None)),
            CellType::KeyValue => {
                let mut cursor = rest;
                let val_len = read_varint(&mut cursor)? as usize;
                let (value, _) = split_at(cursor, val_len)?;
                Ok((key, Some(value)))
            }
            _ => Err(Error::Corruption("not a key/value cell".into())),
        }
    }

    /// Split an `Addr` cell into its address cookie and promoted key/recno.
    pub fn split_addr(&self) -> Result<(&[u8], &[u8])> {
        if self.cell_type != CellType::Addr {
            return Err(Error::Corruption("not an addr cell".into()));
        }
        let mut cursor = &self.data[..];
        let addr_len = read_varint(&mut cursor)? as usize;
        split_at(cursor, addr_len)
    }

    /// Split a `RunLength` cell into its repeat count and value bytes.
    pub fn split_run_length(&self) -> Result<(u64, &[u8])> {
        if self.cell_type != CellType::RunLength {
            return Err(Error::Corruption("not a run-length cell".into()));
        }
        let mut cursor = &self.data[..];
        let count = read_varint(&mut cursor)?;
        Ok((count, cursor))
    }

    /// Serialize as `[type: u8][len: varint][data]`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.cell_type as u8);
        write_varint(out, self.data.len() as u64);
        out.extend_from_slice(&self.data);
    }

    /// Decode one cell from the front of `input`, returning the cell and
    /// the number of bytes consumed.
    pub fn decode(input: &[u8]) -> Result<(Self, usize)> {
        if input.is_empty() {
            return Err(Error::Corruption("empty cell buffer".into()));
        }
        let cell_type = CellType::from_u8(input[0])?;
        let mut cursor = &input[1..];
        let remaining_before = cursor.len();
        let len = read_varint(&mut cursor)? as usize;
        let consumed_by_len = remaining_before - cursor.len();
        let (data, _) = split_at(cursor, len)?;
        let total = 1 + consumed_by_len + len;
        Ok((
            Cell {
                cell_type,
                data: data.to_vec(),
            },
            total,
        ))
    }
}

fn split_at(buf: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if buf.len() < len {
        return Err(Error::Corruption("cell payload truncated".into()));
    }
    Ok(buf.split_at(len))
}

/// LEB128 varint encoding, used for cell length prefixes.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub fn read_varint(cursor: &mut &[u8]) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let &byte = cursor
            .first()
            .ok_or_else(|| Error::Corruption("truncated varint".into()))?;
        *cursor = &cursor[1..];
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::Corruption("varint too long".into()));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip() {
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, v);
            let mut cursor = &buf[..];
            assert_eq!(read_varint(&mut cursor).unwrap(), v);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn key_value_roundtrip() {
        let cell = Cell::key_value(b"hello", b"world");
        let (k, v) = cell.split_key_value().unwrap();
        assert_eq!(k, b"hello");
        assert_eq!(v, Some(&b"world"[..]));
    }

    #[test]
    fn deleted_cell_has_no_value() {
        let cell = Cell::deleted(b"gone");
        let (k, v) = cell.split_key_value().unwrap();
        assert_eq!(k, b"gone");
        assert_eq!(v, None);
    }

    #[test]
    fn addr_cell_roundtrip() {
        let cell = Cell::addr(&[1, 2, 3, 4], b"promoted");
        let (addr, key) = cell.split_addr().unwrap();
        assert_eq!(addr, &[1, 2, 3, 4]);
        assert_eq!(key, b"promoted");
    }

    #[test]
    fn run_length_cell_roundtrip() {
        let cell = Cell::run_length(42, b"v");
        let (count, value) = cell.split_run_length().unwrap();
        assert_eq!(count, 42);
        assert_eq!(value, b"v");
    }

    #[test]
    fn encode_decode_roundtrip() {
        let cell = Cell::key_value(b"k", b"v");
        let mut buf = Vec::new();
        cell.encode(&mut buf);
        let (decoded, consumed) = Cell::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, cell);
    }

    #[test]
    fn key_value_overflow_roundtrip() {
        let cell = Cell::key_value_overflow(b"bigkey", &[9, 9, 9, 9]);
        let (key, addr) = cell.split_key_value_overflow().unwrap();
        assert_eq!(key, b"bigkey");
        assert_eq!(addr, &[9, 9, 9, 9]);
    }

    #[test]
    fn transient_type_is_flagged() {
        assert!(CellType::ValueOverflowRemoved.is_transient());
        assert!(!CellType::KeyValue.is_transient());
        assert!(!CellType::ValueOverflow.is_transient());
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        let cell = Cell::key_value(b"longer-key", b"longer-value");
        let mut buf = Vec::new();
        cell.encode(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(Cell::decode(&buf).is_err());
    }
}
