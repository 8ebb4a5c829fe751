//! The storage SPI: the contract every engine implements.
//!
//! Indexes are written against these traits only, so they work unchanged on
//! any engine. Transactions exist only for the duration of a
//! [`Storage::read`] or [`Storage::write`] closure, and cursors borrow the
//! transaction they were opened from, so neither can outlive its scope.

use dirstore_types::TreeName;

use crate::error::{StorageError, StorageResult};

/// Lifecycle state of a storage handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageMode {
    /// Neither open for transactions nor importing.
    Closed,
    /// An [`Importer`] is alive; transactional access is refused.
    Importing,
    /// Transactional access is available.
    Open,
}

/// Point-in-time summary of a storage handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageStatus {
    pub mode: StorageMode,
    /// Number of trees in the committed state.
    pub trees: usize,
    /// Number of records across all trees.
    pub records: u64,
}

/// Forward-only cursor over typed key/value pairs.
///
/// A new cursor is positioned before its first record; the first call to
/// [`next`](Self::next) moves onto it.
pub trait SequentialCursor {
    type Key: ?Sized;
    type Value: ?Sized;

    /// Advance to the next record. Returns `false` once exhausted.
    fn next(&mut self) -> StorageResult<bool>;

    /// Whether the cursor currently points at a record.
    fn is_defined(&self) -> bool;

    /// Key of the current record.
    fn key(&self) -> Option<&Self::Key>;

    /// Value of the current record.
    fn value(&self) -> Option<&Self::Value>;
}

/// Raw cursor over one tree, ordered by unsigned byte comparison of keys.
///
/// A positioning call that finds nothing leaves the cursor undefined and
/// exhausted until it is positioned again.
pub trait Cursor: SequentialCursor<Key = [u8], Value = [u8]> {
    /// Position on exactly `key`.
    fn position_to_key(&mut self, key: &[u8]) -> StorageResult<bool>;

    /// Position on `key`, or on the first key after it.
    fn position_to_key_or_next(&mut self, key: &[u8]) -> StorageResult<bool>;

    /// Position on the last key of the tree.
    fn position_to_last_key(&mut self) -> StorageResult<bool>;
}

/// Read access to a consistent snapshot.
pub trait ReadableTransaction {
    /// Read the value stored under `key`. Missing trees read as empty.
    fn read(&self, tree: &TreeName, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Open a cursor over `tree`. A missing tree yields an empty cursor.
    fn open_cursor(&self, tree: &TreeName) -> StorageResult<Box<dyn Cursor + '_>>;

    /// Number of records in `tree`, `None` if the tree does not exist.
    fn record_count(&self, tree: &TreeName) -> StorageResult<Option<u64>>;

    /// Whether `tree` exists in this snapshot.
    fn tree_exists(&self, tree: &TreeName) -> StorageResult<bool>;
}

/// Read-write access inside a write transaction.
///
/// Writes are buffered and become visible to other transactions only when
/// the enclosing [`Storage::write`] commits. Reads through this transaction
/// observe its own buffered writes.
pub trait WriteableTransaction: ReadableTransaction {
    /// Ensure `tree` exists, creating it if `create_on_demand` is set.
    /// Returns whether the tree exists afterwards.
    fn open_tree(&mut self, tree: &TreeName, create_on_demand: bool) -> StorageResult<bool>;

    /// Drop `tree` and all of its records. Returns whether it existed.
    fn delete_tree(&mut self, tree: &TreeName) -> StorageResult<bool>;

    /// Insert or overwrite a record, creating the tree if needed.
    fn put(&mut self, tree: &TreeName, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Delete a record. Returns whether it existed.
    fn delete(&mut self, tree: &TreeName, key: &[u8]) -> StorageResult<bool>;

    /// Read-modify-write a single record.
    ///
    /// `f` receives the current value and returns the new one; `None` deletes
    /// the record. Returns whether the stored value changed.
    fn update(
        &mut self,
        tree: &TreeName,
        key: &[u8],
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> StorageResult<bool> {
        let current = self.read(tree, key)?;
        let next = f(current.as_deref());
        if next == current {
            return Ok(false);
        }
        match next {
            Some(value) => self.put(tree, key, &value)?,
            None => {
                self.delete(tree, key)?;
            }
        }
        Ok(true)
    }
}

/// Bulk loader used to populate trees before transactional access begins.
///
/// Import and transactional modes are mutually exclusive. Dropping an
/// importer that was not [`finish`](Self::finish)ed finishes it and logs any
/// failure, so the storage always leaves import mode.
pub trait Importer {
    /// Declare a tree that subsequent [`put`](Self::put)s may target.
    fn create_tree(&mut self, tree: &TreeName) -> StorageResult<()>;

    /// Insert or overwrite a record in a created or pre-existing tree.
    fn put(&mut self, tree: &TreeName, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Read back a record written during this import.
    fn read(&self, tree: &TreeName, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Publish the imported data and leave import mode.
    fn finish(self: Box<Self>) -> StorageResult<()>;
}

/// A transactional key-value engine.
///
/// All implementations must satisfy these invariants:
/// - A read closure sees the state committed when it started, and nothing
///   committed later.
/// - A write closure's changes commit atomically when it returns `Ok` and
///   are discarded when it returns `Err`.
/// - Writers are serialized; readers never block on writers.
/// - `close` is safe to call in any state and releases file handles.
pub trait Storage: Send + Sync {
    /// Make the storage available for transactions.
    fn open(&self) -> StorageResult<()>;

    /// Leave transactional mode and release held resources.
    fn close(&self) -> StorageResult<()>;

    /// Run a read-only operation against a snapshot.
    fn read<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadableTransaction) -> Result<T, E>,
        E: From<StorageError>;

    /// Run a mutating operation inside a write transaction.
    fn write<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteableTransaction) -> Result<T, E>,
        E: From<StorageError>;

    /// Enter import mode. Fails if the storage is open.
    fn start_import(&self) -> StorageResult<Box<dyn Importer + '_>>;

    /// Names of all committed trees.
    fn list_trees(&self) -> StorageResult<Vec<TreeName>>;

    /// Current lifecycle state and sizes.
    fn status(&self) -> StorageResult<StorageStatus>;

    /// Delete all persisted data. The storage must be closed.
    fn remove_storage_files(&self) -> StorageResult<()>;
}
