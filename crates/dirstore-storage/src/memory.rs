use tracing::info;

use dirstore_types::TreeName;

use crate::engine::{Engine, EngineImporter, ImportSink};
use crate::error::{StorageError, StorageResult};
use crate::spi::{Importer, ReadableTransaction, Storage, StorageStatus, WriteableTransaction};
use crate::trees::Trees;

/// Volatile storage engine.
///
/// Data survives `close`/`open` cycles of the same handle and is lost when
/// the handle is dropped. Each handle is independent; there is no shared
/// global instance.
#[derive(Debug)]
pub struct MemoryStorage {
    engine: Engine,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Nothing to persist: publishing is all a memory import needs.
struct Volatile;

impl ImportSink for Volatile {
    fn persist(&self, _trees: &Trees) -> StorageResult<()> {
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn open(&self) -> StorageResult<()> {
        self.engine.open()?;
        info!(backend = "memory", "storage opened");
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        if self.engine.close()? {
            info!(backend = "memory", "storage closed");
        }
        Ok(())
    }

    fn read<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadableTransaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.engine.read(op)
    }

    fn write<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteableTransaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.engine.write(op, |_| Ok(()))
    }

    fn start_import(&self) -> StorageResult<Box<dyn Importer + '_>> {
        Ok(Box::new(EngineImporter::start(&self.engine, Box::new(Volatile))?))
    }

    fn list_trees(&self) -> StorageResult<Vec<TreeName>> {
        Ok(self.engine.snapshot()?.names())
    }

    fn status(&self) -> StorageResult<StorageStatus> {
        self.engine.status()
    }

    fn remove_storage_files(&self) -> StorageResult<()> {
        self.engine.ensure_closed()?;
        self.engine.replace(Trees::default())
    }
}
