// src/error.rs
//! Error taxonomy for TetherDB
//!
//! Errors are organized by *kind*, not by the module that produced them:
//! semantic errors (`InvalidArgument`, `InvalidQuery`), coordination errors
//! (`LockAcquisitionFailure`, `CoordinationTimeout`, `ModificationConflict`,
//! `MasterIndexError`) and storage-origin errors (`BlobNotFound`,
//! `PermissionDenied`, `QuotaExceeded`, `InvalidFormat`, `Io`).
//!
//! Only the transient category (`Io`, `QuotaExceeded`) is ever retried
//! internally; see [`TetherDbError::is_transient`].

use thiserror::Error;

/// All errors produced by tetherdb-core
#[derive(Error, Debug)]
pub enum TetherDbError {
    /// Malformed caller input (wrong type, missing required value) detected
    /// at a public API boundary. Never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Semantically invalid query or update expression (unsupported operator,
    /// non-numeric operand for an arithmetic operator, ...). Never retried.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The cross-instance collection lock could not be acquired within the
    /// configured number of attempts.
    #[error("Failed to acquire lock for collection '{collection}': {reason}")]
    LockAcquisitionFailure { collection: String, reason: String },

    /// A coordinated operation exceeded its overall time budget.
    #[error("Coordination timed out: {0}")]
    CoordinationTimeout(String),

    /// Failure while reading, writing or mutating the shared master index,
    /// including corrupted persisted JSON.
    #[error("Master index error: {0}")]
    MasterIndexError(String),

    /// Local and remote modification tokens diverged and could not be
    /// silently resolved.
    #[error("Modification conflict: {0}")]
    ModificationConflict(String),

    /// The process-local advisory lock could not be acquired in time.
    #[error("Process lock timed out after {0} ms")]
    LockTimeout(u64),

    /// Requested blob does not exist in the storage substrate.
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// The storage substrate rejected the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota exhausted or rate limited by the storage substrate. Transient.
    #[error("Quota exceeded or rate limited: {0}")]
    QuotaExceeded(String),

    /// Persisted data could not be parsed (e.g. malformed JSON blob).
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Generic I/O failure. Transient.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure outside of persisted-blob parsing.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Insert of a document whose `_id` is already present.
    #[error("Document with _id '{0}' already exists")]
    DocumentExists(String),
}

impl TetherDbError {
    /// Whether the storage retry policy may retry this error.
    ///
    /// Only generic I/O failures and quota/rate-limit responses are
    /// considered transient. `BlobNotFound`, `PermissionDenied` and
    /// `InvalidFormat` are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TetherDbError::Io(_) | TetherDbError::QuotaExceeded(_)
        )
    }
}

impl From<serde_json::Error> for TetherDbError {
    fn from(err: serde_json::Error) -> Self {
        TetherDbError::Serialization(err.to_string())
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, TetherDbError>;
