//! Error types for blockrepo_core.

use crate::hash::Cid;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using blockrepo_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store and maintenance operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Block file is corrupted or unreadable as a block.
    #[error("Corrupted block at {path}: {reason}")]
    CorruptedBlock { path: PathBuf, reason: String },

    /// Invalid content identifier format or encoding.
    #[error("Invalid cid: {reason}")]
    InvalidCid { reason: String },

    /// Block not found in store.
    #[error("Block not found: {cid}")]
    BlockNotFound { cid: Cid },

    /// Store is invalid or not initialized.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Invalid pin name or format.
    #[error("Invalid pin: {reason}")]
    InvalidPin { reason: String },

    /// Pin not found.
    #[error("Pin not found: {name}")]
    PinNotFound { name: String },

    /// Invalid link node entry.
    #[error("Invalid link entry: {reason}")]
    InvalidLinkEntry { reason: String },

    /// Unsupported algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// The exclusive GC token is held by another sweep or by writers.
    #[error("repo lock busy: another gc run or writer holds the repo")]
    LockBusy,

    /// The mark phase could not compute the retain set.
    #[error("Failed to compute reachable set: {reason}")]
    Reachability { reason: String },

    /// A single block could not be deleted during a sweep.
    #[error("Failed to delete block {cid}: {reason}")]
    DeletionFailed { cid: Cid, reason: String },

    /// A gc run finished but some deletions failed.
    #[error("encountered errors during gc run ({} blocks not removed): {first}", failed.len())]
    GcIncomplete { first: Box<Error>, failed: Vec<Cid> },

    /// Some keys could not be enumerated, so their blocks were never examined.
    #[error("{count} keys could not be enumerated")]
    EnumerationFailed { count: usize },

    /// The operation was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,

    /// A gc run was cancelled; `failed` lists deletions that failed before the stop.
    #[error("gc run cancelled ({} blocks failed to delete before the stop)", failed.len())]
    GcCancelled { failed: Vec<Cid> },

    /// The engine task ended without sending its terminal report.
    #[error("result stream closed without a terminal report")]
    StreamAborted,
}

impl Error {
    /// Create a CorruptedBlock error.
    pub fn corrupted_block(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptedBlock {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidCid error.
    pub fn invalid_cid(reason: impl Into<String>) -> Self {
        Error::InvalidCid {
            reason: reason.into(),
        }
    }

    /// Create a BlockNotFound error.
    pub fn block_not_found(cid: Cid) -> Self {
        Error::BlockNotFound { cid }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidPin error.
    pub fn invalid_pin(reason: impl Into<String>) -> Self {
        Error::InvalidPin {
            reason: reason.into(),
        }
    }

    /// Create a PinNotFound error.
    pub fn pin_not_found(name: impl Into<String>) -> Self {
        Error::PinNotFound { name: name.into() }
    }

    /// Create an InvalidLinkEntry error.
    pub fn invalid_link_entry(reason: impl Into<String>) -> Self {
        Error::InvalidLinkEntry {
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Create a Reachability error.
    pub fn reachability(reason: impl Into<String>) -> Self {
        Error::Reachability {
            reason: reason.into(),
        }
    }

    /// Create a DeletionFailed error.
    pub fn deletion_failed(cid: Cid, reason: impl Into<String>) -> Self {
        Error::DeletionFailed {
            cid,
            reason: reason.into(),
        }
    }

    /// Returns true if this error means the block is simply absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::BlockNotFound { .. } => true,
            Error::Io { source } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}
