use dirstore_storage::StorageError;
use dirstore_types::TypeError;

/// Errors produced by indexes.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The DN cannot be indexed here, or a stored key does not decode.
    #[error(transparent)]
    InvalidDn(#[from] TypeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A stored value is not an encoded entry ID.
    #[error("value under key {key:02x?} is {len} bytes, not an entry ID")]
    CorruptValue { key: Vec<u8>, len: usize },
}

impl IndexError {
    /// Whether repeating the operation in a new transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_retryable())
    }
}

/// Result alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
