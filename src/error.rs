//! Error taxonomy for the storage engine core.
//!
//! The engine distinguishes *expected outcomes* (`NotFound`, `DuplicateKey`,
//! `Busy`, `Rollback`) from *hard failures* (`Io`, `Corruption`, `Config`,
//! `Unsupported`, `Panic`). Expected outcomes are returned straight to the
//! caller. Hard failures are logged via `tracing` at construction time
//! (`Error::log`) before they propagate, per the §7 propagation policy.

use thiserror::Error;

/// Convenient `Result` alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every error the engine can return.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested key absent.
    #[error("key not found")]
    NotFound,

    /// Insert collided with an existing key under non-overwrite semantics.
    #[error("duplicate key")]
    DuplicateKey,

    /// Transient contention on a handle, checkpoint, or lookaside sweep.
    /// The caller may retry.
    #[error("resource busy, retry")]
    Busy,

    /// Transaction conflict or deadlock; the caller's transaction must abort.
    #[error("transaction rolled back")]
    Rollback,

    /// Any I/O failure from the underlying file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checksum mismatch or other on-disk invariant violation.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Invalid configuration string or option.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Operation not valid for this object type or mode.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Unrecoverable invariant violation. Sticky: once observed, every
    /// subsequent operation on the owning connection returns `Panic`.
    #[error("connection panicked: {0}")]
    Panic(String),
}

impl Error {
    /// True for errors a caller is expected to handle as normal control flow
    /// rather than treat as a hard failure.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::NotFound | Error::DuplicateKey | Error::Busy | Error::Rollback
        )
    }

    /// Emit this error through `tracing` at the severity its kind warrants,
    /// then return it unchanged. Call at the point an `Io`/`Corruption`/
    /// `Config`/`Panic` error is first constructed.
    pub fn log(self) -> Self {
        match &self {
            Error::Io(e) => tracing::warn!(error = %e, "I/O error"),
            Error::Corruption(msg) => tracing::error!(%msg, "corruption detected"),
            Error::Config(msg) => tracing::warn!(%msg, "invalid configuration"),
            Error::Panic(msg) => tracing::error!(%msg, "connection panicked"),
            _ => {}
        }
        self
    }
}

/// Printable cause chain (error + `source()` chain), for the default event
/// handler to hand to its printable-message callback.
pub fn cause_chain(err: &Error) -> String {
    use std::error::Error as _;

    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}
