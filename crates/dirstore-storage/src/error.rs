use std::io;
use std::path::PathBuf;
use std::sync::PoisonError;

use dirstore_types::TreeName;

/// Errors produced by storage engines.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error from the underlying files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A storage file failed its integrity checks.
    #[error("corrupt storage file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The transaction lost a race with a concurrent writer and may be retried.
    #[error("transaction aborted by a conflicting writer")]
    Conflict,

    /// A lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// The storage was used outside its valid lifecycle. Not recoverable.
    #[error("storage misuse: {0}")]
    Misuse(MisuseKind),

    /// Invalid storage configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }

    /// Whether this error reports a programming defect.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::Misuse(_))
    }
}

impl<T> From<PoisonError<T>> for StorageError {
    fn from(e: PoisonError<T>) -> Self {
        Self::LockPoisoned(e.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Ways the storage lifecycle can be violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MisuseKind {
    #[error("storage is not open")]
    NotOpen,

    #[error("storage is already open")]
    AlreadyOpen,

    #[error("an import is in progress")]
    ImportInProgress,

    #[error("storage must be closed first")]
    StillOpen,

    #[error("tree {0} was not created for this import")]
    TreeNotDeclared(TreeName),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
