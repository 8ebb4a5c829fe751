use dirstore_types::TreeName;

use crate::config::{Backend, StorageConfig};
use crate::error::{StorageError, StorageResult};
use crate::file::FileStorage;
use crate::memory::MemoryStorage;
use crate::spi::{Importer, ReadableTransaction, Storage, StorageStatus, WriteableTransaction};

/// Storage engine chosen at runtime from a [`StorageConfig`].
///
/// [`Storage`] has generic methods and so cannot be a trait object; this
/// enum is the runtime-selected engine instead.
#[derive(Debug)]
pub enum AnyStorage {
    Memory(MemoryStorage),
    File(FileStorage),
}

impl AnyStorage {
    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(match config.backend {
            Backend::Memory => Self::Memory(MemoryStorage::new()),
            Backend::File => Self::File(FileStorage::from_config(config)),
        })
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Memory(_) => Backend::Memory,
            Self::File(_) => Backend::File,
        }
    }
}

macro_rules! delegate {
    ($self:ident, $storage:ident => $call:expr) => {
        match $self {
            AnyStorage::Memory($storage) => $call,
            AnyStorage::File($storage) => $call,
        }
    };
}

impl Storage for AnyStorage {
    fn open(&self) -> StorageResult<()> {
        delegate!(self, s => s.open())
    }

    fn close(&self) -> StorageResult<()> {
        delegate!(self, s => s.close())
    }

    fn read<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&dyn ReadableTransaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        delegate!(self, s => s.read(op))
    }

    fn write<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn WriteableTransaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        delegate!(self, s => s.write(op))
    }

    fn start_import(&self) -> StorageResult<Box<dyn Importer + '_>> {
        delegate!(self, s => s.start_import())
    }

    fn list_trees(&self) -> StorageResult<Vec<TreeName>> {
        delegate!(self, s => s.list_trees())
    }

    fn status(&self) -> StorageResult<StorageStatus> {
        delegate!(self, s => s.status())
    }

    fn remove_storage_files(&self) -> StorageResult<()> {
        delegate!(self, s => s.remove_storage_files())
    }
}
