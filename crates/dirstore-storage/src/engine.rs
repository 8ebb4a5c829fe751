//! Snapshot-isolated transaction core shared by the memory and file engines.
//!
//! The engine owns the lifecycle state machine, the committed trees and the
//! writer lock. Durability is the caller's concern: [`Engine::write`] hands
//! the commit's mutations to a hook before publishing them, and a failing
//! hook aborts the commit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use dirstore_types::TreeName;

use crate::cursor::ViewCursor;
use crate::error::{MisuseKind, StorageError, StorageResult};
use crate::spi::{
    Cursor, Importer, ReadableTransaction, StorageMode, StorageStatus, WriteableTransaction,
};
use crate::trees::{Mutation, Pending, TreeView, Trees};

pub(crate) struct Engine {
    mode: RwLock<StorageMode>,
    committed: RwLock<Arc<Trees>>,
    writer: Mutex<()>,
}

impl Engine {
    pub(crate) fn new() -> Self {
        Self {
            mode: RwLock::new(StorageMode::Closed),
            committed: RwLock::new(Arc::new(Trees::default())),
            writer: Mutex::new(()),
        }
    }

    /// The writer lock guards no data, so a writer that panicked leaves
    /// nothing inconsistent behind and poisoning is ignored.
    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mode(&self) -> StorageResult<StorageMode> {
        Ok(*self.mode.read()?)
    }

    /// Closed → Open.
    pub(crate) fn open(&self) -> StorageResult<()> {
        let mut mode = self.mode.write()?;
        match *mode {
            StorageMode::Closed => {
                *mode = StorageMode::Open;
                Ok(())
            }
            StorageMode::Open => Err(StorageError::Misuse(MisuseKind::AlreadyOpen)),
            StorageMode::Importing => Err(StorageError::Misuse(MisuseKind::ImportInProgress)),
        }
    }

    /// Open → Closed. Returns whether the engine was open.
    ///
    /// Waits for an in-flight writer so a commit is never cut in half.
    pub(crate) fn close(&self) -> StorageResult<bool> {
        let _writer = self.lock_writer();
        let mut mode = self.mode.write()?;
        match *mode {
            StorageMode::Open => {
                *mode = StorageMode::Closed;
                Ok(true)
            }
            StorageMode::Importing => {
                warn!("close requested while an import is in progress; ignoring");
                Ok(false)
            }
            StorageMode::Closed => Ok(false),
        }
    }

    pub(crate) fn ensure_open(&self) -> StorageResult<()> {
        match self.mode()? {
            StorageMode::Open => Ok(()),
            StorageMode::Importing => Err(StorageError::Misuse(MisuseKind::ImportInProgress)),
            StorageMode::Closed => Err(StorageError::Misuse(MisuseKind::NotOpen)),
        }
    }

    pub(crate) fn ensure_closed(&self) -> StorageResult<()> {
        match self.mode()? {
            StorageMode::Closed => Ok(()),
            StorageMode::Importing => Err(StorageError::Misuse(MisuseKind::ImportInProgress)),
            StorageMode::Open => Err(StorageError::Misuse(MisuseKind::StillOpen)),
        }
    }

    pub(crate) fn snapshot(&self) -> StorageResult<Arc<Trees>> {
        Ok(Arc::clone(&*self.committed.read()?))
    }

    /// Replace the committed state wholesale (recovery, close, removal).
    pub(crate) fn replace(&self, trees: Trees) -> StorageResult<()> {
        *self.committed.write()? = Arc::new(trees);
        Ok(())
    }

    pub(crate) fn status(&self) -> StorageResult<StorageStatus> {
        let snapshot = self.snapshot()?;
        Ok(StorageStatus {
            mode: self.mode()?,
            trees: snapshot.len(),
            records: snapshot.record_count(),
        })
    }

    pub(crate) fn read<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadableTransaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.ensure_open()?;
        let txn = SnapshotTxn {
            trees: self.snapshot()?,
        };
        op(&txn)
    }

    /// Run `op` in a write transaction. On success the mutations go through
    /// `durable` and are then published; any failure publishes nothing.
    pub(crate) fn write<T, E, F, D>(&self, op: F, durable: D) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteableTransaction) -> Result<T, E>,
        E: From<StorageError>,
        D: FnOnce(&[Mutation]) -> StorageResult<()>,
    {
        let _writer = self.lock_writer();
        self.ensure_open()?;

        let mut txn = WriteTxn {
            base: self.snapshot()?,
            pending: Pending::default(),
        };
        let value = match op(&mut txn) {
            Ok(value) => value,
            Err(e) => {
                debug!("write transaction rolled back");
                return Err(e);
            }
        };

        // Release the base snapshot before publishing so unshared trees are
        // updated in place.
        let WriteTxn { base, pending } = txn;
        drop(base);
        let mutations = pending.into_mutations();
        if mutations.is_empty() {
            return Ok(value);
        }
        durable(&mutations)?;

        let count = mutations.len();
        let mut committed = self.committed.write().map_err(StorageError::from)?;
        Arc::make_mut(&mut committed).apply(mutations);
        debug!(mutations = count, "write transaction committed");
        Ok(value)
    }

    /// Run `f` with the latest committed state while holding the writer lock,
    /// so no commit can interleave.
    pub(crate) fn exclusive<R>(&self, f: impl FnOnce(&Trees) -> StorageResult<R>) -> StorageResult<R> {
        let _writer = self.lock_writer();
        let snapshot = self.snapshot()?;
        f(&snapshot)
    }

    /// Closed → Importing. Returns the trees the import starts from.
    pub(crate) fn begin_import(&self) -> StorageResult<Trees> {
        let mut mode = self.mode.write()?;
        match *mode {
            StorageMode::Closed => {
                *mode = StorageMode::Importing;
                drop(mode);
                Ok(self.snapshot()?.as_ref().clone())
            }
            StorageMode::Open => Err(StorageError::Misuse(MisuseKind::StillOpen)),
            StorageMode::Importing => Err(StorageError::Misuse(MisuseKind::ImportInProgress)),
        }
    }

    /// Importing → Closed, publishing `trees` if given.
    pub(crate) fn end_import(&self, trees: Option<Trees>) -> StorageResult<()> {
        if let Some(trees) = trees {
            self.replace(trees)?;
        }
        *self.mode.write()? = StorageMode::Closed;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Engine");
        if let Ok(status) = self.status() {
            s.field("mode", &status.mode)
                .field("trees", &status.trees)
                .field("records", &status.records);
        }
        s.finish()
    }
}

/// Read transaction: a pinned snapshot of the committed trees.
struct SnapshotTxn {
    trees: Arc<Trees>,
}

impl ReadableTransaction for SnapshotTxn {
    fn read(&self, tree: &TreeName, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .trees
            .get(tree)
            .and_then(|data| data.get(key))
            .cloned())
    }

    fn open_cursor(&self, tree: &TreeName) -> StorageResult<Box<dyn Cursor + '_>> {
        let view = self.trees.get(tree).map(TreeView::committed);
        Ok(Box::new(ViewCursor::new(view)))
    }

    fn record_count(&self, tree: &TreeName) -> StorageResult<Option<u64>> {
        Ok(self.trees.get(tree).map(|data| data.len() as u64))
    }

    fn tree_exists(&self, tree: &TreeName) -> StorageResult<bool> {
        Ok(self.trees.contains(tree))
    }
}

/// Write transaction: a base snapshot plus buffered writes.
struct WriteTxn {
    base: Arc<Trees>,
    pending: Pending,
}

impl ReadableTransaction for WriteTxn {
    fn read(&self, tree: &TreeName, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .pending
            .view(&self.base, tree)
            .and_then(|view| view.get(key))
            .map(<[u8]>::to_vec))
    }

    fn open_cursor(&self, tree: &TreeName) -> StorageResult<Box<dyn Cursor + '_>> {
        Ok(Box::new(ViewCursor::new(self.pending.view(&self.base, tree))))
    }

    fn record_count(&self, tree: &TreeName) -> StorageResult<Option<u64>> {
        Ok(self.pending.view(&self.base, tree).map(|view| view.len()))
    }

    fn tree_exists(&self, tree: &TreeName) -> StorageResult<bool> {
        Ok(self.pending.exists(&self.base, tree))
    }
}

impl WriteableTransaction for WriteTxn {
    fn open_tree(&mut self, tree: &TreeName, create_on_demand: bool) -> StorageResult<bool> {
        if create_on_demand {
            self.pending.create_tree(&self.base, tree);
        }
        Ok(self.pending.exists(&self.base, tree))
    }

    fn delete_tree(&mut self, tree: &TreeName) -> StorageResult<bool> {
        Ok(self.pending.delete_tree(&self.base, tree))
    }

    fn put(&mut self, tree: &TreeName, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.pending.put(&self.base, tree, key, value);
        Ok(())
    }

    fn delete(&mut self, tree: &TreeName, key: &[u8]) -> StorageResult<bool> {
        Ok(self.pending.delete(&self.base, tree, key))
    }
}

/// Persists a finished import before it is published.
pub(crate) trait ImportSink {
    fn persist(&self, trees: &Trees) -> StorageResult<()>;
}

/// Importer shared by both engines; the sink decides what "finished" means
/// on disk.
pub(crate) struct EngineImporter<'a> {
    engine: &'a Engine,
    sink: Box<dyn ImportSink + 'a>,
    /// `None` once finished.
    trees: Option<Trees>,
    records: u64,
}

impl<'a> EngineImporter<'a> {
    pub(crate) fn start(engine: &'a Engine, sink: Box<dyn ImportSink + 'a>) -> StorageResult<Self> {
        let trees = engine.begin_import()?;
        debug!(trees = trees.len(), "import started");
        Ok(Self {
            engine,
            sink,
            trees: Some(trees),
            records: 0,
        })
    }

    fn trees_mut(&mut self) -> StorageResult<&mut Trees> {
        self.trees
            .as_mut()
            .ok_or(StorageError::Misuse(MisuseKind::NotOpen))
    }

    fn complete(&mut self) -> StorageResult<()> {
        let Some(trees) = self.trees.take() else {
            return Ok(());
        };
        if let Err(e) = self.sink.persist(&trees) {
            self.engine.end_import(None)?;
            return Err(e);
        }
        let (tree_count, records) = (trees.len(), self.records);
        self.engine.end_import(Some(trees))?;
        info!(trees = tree_count, records, "import finished");
        Ok(())
    }
}

impl Importer for EngineImporter<'_> {
    fn create_tree(&mut self, tree: &TreeName) -> StorageResult<()> {
        self.trees_mut()?.create_tree(tree);
        Ok(())
    }

    fn put(&mut self, tree: &TreeName, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let trees = self.trees_mut()?;
        if !trees.contains(tree) {
            return Err(StorageError::Misuse(MisuseKind::TreeNotDeclared(tree.clone())));
        }
        trees.insert(tree, key.to_vec(), value.to_vec());
        self.records += 1;
        Ok(())
    }

    fn read(&self, tree: &TreeName, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .trees
            .as_ref()
            .and_then(|trees| trees.get(tree))
            .and_then(|data| data.get(key))
            .cloned())
    }

    fn finish(mut self: Box<Self>) -> StorageResult<()> {
        self.complete()
    }
}

impl Drop for EngineImporter<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.complete() {
            error!(error = %e, "import failed to finish");
        }
    }
}
