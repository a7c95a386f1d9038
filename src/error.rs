//! Error taxonomy for the controller and every component it composes.
//!
//! Every fallible operation in this crate returns `Result<T, NandError>`.
//! Components lower in the stack (ECC, cache, executor) return the same
//! enum rather than their own local error types so the controller never has
//! to translate between incompatible error worlds — it only adds context
//! (block/page) before surfacing an error to the caller.

use thiserror::Error;

/// The full error taxonomy exposed by this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NandError {
    /// A logical or physical address fell outside the addressable range.
    #[error("address out of range: {0}")]
    OutOfRange(String),

    /// The targeted physical block is marked bad.
    #[error("block {block} is marked bad")]
    BadBlock {
        /// The physical block that was rejected.
        block: u32,
    },

    /// The ECC codec could not recover the payload.
    #[error("uncorrectable error in codeword")]
    Uncorrectable,

    /// Caller-supplied input exceeded the codec's data capacity.
    #[error("input too large: {actual} bytes exceeds capacity of {capacity} bytes")]
    InputTooLarge {
        /// Size of the input the caller supplied.
        actual: usize,
        /// Maximum size the codec accepts.
        capacity: usize,
    },

    /// `decompress` was given a buffer it could not parse.
    #[error("invalid compressed data")]
    InvalidCompressedData,

    /// The transport reported a failure not covered by a more specific kind.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport did not respond within its allotted time.
    #[error("operation timed out")]
    Timeout,

    /// A cooperative cancellation flag was observed at a task boundary.
    #[error("operation cancelled")]
    Cancelled,

    /// The executor (or controller) has been shut down and rejects new work.
    #[error("shut down")]
    ShutDown,

    /// The bad-block manager scanned every block without finding a good one.
    #[error("no good blocks available")]
    NoGoodBlocks,

    /// A persisted record failed its signature/version check.
    #[error("corrupt record: {reason}")]
    Corrupt {
        /// What about the record was wrong.
        reason: String,
    },
}

/// Convenience alias used throughout the crate.
pub type NandResult<T> = Result<T, NandError>;
