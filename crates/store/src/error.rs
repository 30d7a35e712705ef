//! Error types for the graphvault storage engine.

use std::{io, time::Duration};

use graphvault_types::config::ConfigError;
use snafu::Snafu;

/// Block identifier type: the block's position in the backing medium.
pub type BlockId = u64;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the underlying block channel.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// Read or write of a block id that is not allocated.
    #[snafu(display("Block {block_id} not found"))]
    NotFound {
        /// The missing block ID.
        block_id: BlockId,
    },

    /// Block or payload size does not match the channel's block size.
    #[snafu(display("Block size mismatch: expected {expected} bytes, got {actual}"))]
    SizeMismatch {
        /// The channel's block size.
        expected: usize,
        /// The size that was supplied or found.
        actual: usize,
    },

    /// The channel or store has been closed.
    #[snafu(display("Store is closed"))]
    Closed,

    /// Block size outside the supported range.
    #[snafu(display("Invalid block size: {size}"))]
    InvalidBlockSize {
        /// The rejected block size.
        size: usize,
    },

    /// Free of a block that the committed snapshot still references.
    #[snafu(display("Block {block_id} is referenced by the committed snapshot"))]
    BlockInUse {
        /// The referenced block ID.
        block_id: BlockId,
    },

    /// Write transaction could not be acquired within its wait budget.
    #[snafu(display("Timed out after {waited:?} waiting for the write lock"))]
    LockTimeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// Read-to-write promotion failed: another writer is active or the
    /// reader's snapshot is no longer the latest.
    #[snafu(display("Promotion conflict: snapshot is stale or a writer is active"))]
    PromotionConflict,

    /// Operation not supported by this backend.
    #[snafu(display("Unsupported operation: {operation}"))]
    UnsupportedOperation {
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// Store contents are corrupted or have an invalid format.
    #[snafu(display("Corrupted store: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// Block checksum verification failed.
    #[snafu(display("Block {block_id} checksum mismatch"))]
    BlockChecksumMismatch {
        /// The block whose checksum failed.
        block_id: BlockId,
    },

    /// Invalid magic number in the store header.
    #[snafu(display("Invalid store magic number"))]
    InvalidMagic,

    /// Unsupported store format version.
    #[snafu(display("Unsupported format version: {version}"))]
    UnsupportedVersion {
        /// The unsupported version number.
        version: u16,
    },

    /// Quad cannot be stored.
    #[snafu(display("Invalid quad: {reason}"))]
    InvalidQuad {
        /// Why the quad was rejected.
        reason: String,
    },

    /// Transaction was aborted after a failure and can no longer be used.
    #[snafu(display("Transaction aborted"))]
    TransactionAborted,

    /// Quad operation attempted outside a transaction.
    #[snafu(display("Not in a transaction"))]
    NotInTransaction,

    /// `begin` called while a transaction is already active.
    #[snafu(display("Already in a transaction"))]
    AlreadyInTransaction,

    /// Write operation attempted in a read transaction that cannot promote.
    #[snafu(display("Read-only transaction"))]
    ReadOnlyTransaction,

    /// Configuration rejected at open time.
    #[snafu(display("Invalid configuration: {source}"))]
    Config {
        /// The validation failure.
        source: ConfigError,
    },
}

impl Error {
    /// Returns true for failures a caller can resolve by retrying.
    ///
    /// Lock timeouts may be retried as-is; promotion conflicts must be
    /// retried as a fresh write transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. } | Error::PromotionConflict)
    }
}

// Provide automatic conversion from io::Error to Error::Io for ergonomic ? usage
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<ConfigError> for Error {
    fn from(source: ConfigError) -> Self {
        Error::Config { source }
    }
}

/// Block kinds, stored in the first byte of every formatted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockKind {
    /// Free/unused block.
    Free = 0,
    /// B-tree branch (internal) node.
    BTreeBranch = 1,
    /// B-tree leaf node.
    BTreeLeaf = 2,
}

impl TryFrom<u8> for BlockKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Free),
            1 => Ok(Self::BTreeBranch),
            2 => Ok(Self::BTreeLeaf),
            _ => Err(Error::Corrupted { reason: format!("Invalid block kind: {}", value) }),
        }
    }
}
