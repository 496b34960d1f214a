//! Error types for the LeafDB storage engine.
//!
//! The engine surfaces typed, matchable error kinds: callers distinguish a
//! missing bucket from a corrupted page without string inspection. The only
//! automatic recovery in the engine is the two-meta selection at open; every
//! other failure propagates to the caller unchanged.

use thiserror::Error;

/// Result type for LeafDB operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying file, mapping, or sync operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The file contents violate the on-disk format: bad magic, page size
    /// mismatch, wrong page kind, truncated entry, or a broken overflow or
    /// freelist chain.
    #[error("corrupted database: {0}")]
    Corruption(&'static str),

    /// Operation on a transaction that has already been committed or
    /// rolled back.
    #[error("transaction has already been finalized")]
    TxClosed,

    /// Write operation on a read-only transaction.
    #[error("transaction is read-only")]
    TxReadOnly,

    /// `create_bucket` on a name that already exists.
    #[error("bucket already exists")]
    BucketExists,

    /// Bucket lookup or delete on a name that does not exist.
    #[error("bucket not found")]
    BucketNotFound,

    /// Empty bucket name.
    #[error("bucket name required")]
    NameRequired,

    /// Key does not fit a branch page.
    #[error("key too large: {size} bytes (max: {max})")]
    KeyTooLarge {
        /// Actual size of the key.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Value length exceeds the addressable range of a leaf entry.
    #[error("value too large: {size} bytes (max: {max})")]
    ValueTooLarge {
        /// Actual size of the value.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}
