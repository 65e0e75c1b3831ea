//! Write-ahead log interface: the shape a durability layer above this
//! crate would implement. Record encoding and the recovery scan that
//! replays records are out of scope — only the interface lives here.

use crate::error::Result;

/// A log sequence number: (file number, offset within that file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn {
    pub file: u32,
    pub offset: u64,
}

impl Lsn {
    pub const ZERO: Lsn = Lsn { file: 0, offset: 0 };
}

/// A durability log a connection can be configured to write to. No
/// concrete implementation ships in this crate; callers
/// needing durability beyond checkpoints supply their own.
pub trait WriteAheadLog: Send + Sync {
    /// Open (or create) the log at its configured location.
    fn open(&self) -> Result<()>;

    /// Append one opaque record, returning the LSN it was written at.
    fn write_record(&self, record: &[u8]) -> Result<Lsn>;

    /// Force every record written so far to stable storage.
    fn sync(&self) -> Result<()>;

    /// Replay records from `start` (inclusive) onward, invoking `visit`
    /// for each with its LSN.
    fn scan(&self, start: Lsn, visit: &mut dyn FnMut(Lsn, &[u8]) -> Result<()>) -> Result<()>;

    /// Reclaim log files wholly older than `checkpoint_lsn`.
    fn archive(&self, checkpoint_lsn: Lsn) -> Result<()>;

    fn close(&self) -> Result<()>;
}
