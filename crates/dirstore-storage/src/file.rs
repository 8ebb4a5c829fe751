use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use dirstore_types::TreeName;

use crate::checkpoint::{self, Checkpoint};
use crate::config::{StorageConfig, SyncMode, DEFAULT_CHECKPOINT_THRESHOLD};
use crate::engine::{Engine, EngineImporter, ImportSink};
use crate::error::{MisuseKind, StorageError, StorageResult};
use crate::journal::{Journal, JournalBatch};
use crate::spi::{
    Importer, ReadableTransaction, Storage, StorageMode, StorageStatus, WriteableTransaction,
};
use crate::trees::Trees;

const JOURNAL_FILE: &str = "journal.wal";
const CHECKPOINT_FILE: &str = "checkpoint.db";

/// Tuning for [`FileStorage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileOptions {
    pub sync_mode: SyncMode,
    /// Journal size in bytes after which a commit triggers a checkpoint.
    pub checkpoint_threshold: u64,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
        }
    }
}

impl From<&StorageConfig> for FileOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            sync_mode: config.sync_mode,
            checkpoint_threshold: config.checkpoint_threshold,
        }
    }
}

/// Journal handle and commit sequence, present while the storage is open.
struct Durable {
    journal: Journal,
    seq: u64,
}

/// Durable storage engine rooted at a directory.
///
/// Every commit is appended to `journal.wal` before it becomes visible.
/// Once the journal outgrows the checkpoint threshold, and on close, the
/// committed trees are written to `checkpoint.db` and the journal is
/// truncated. Opening loads the checkpoint and replays the journal batches
/// it does not cover.
pub struct FileStorage {
    dir: PathBuf,
    options: FileOptions,
    engine: Engine,
    durable: Mutex<Option<Durable>>,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>, options: FileOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
            engine: Engine::new(),
            durable: Mutex::new(None),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.db_directory.clone(), FileOptions::from(config))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    /// Load the checkpoint and replay the journal on top of it.
    fn recover(&self) -> StorageResult<(Trees, Durable)> {
        fs::create_dir_all(&self.dir)?;
        let checkpoint_path = self.checkpoint_path();
        checkpoint::remove_stale_tmp(&checkpoint_path)?;
        let Checkpoint { last_seq, mut trees } = checkpoint::read(&checkpoint_path)?;

        let (journal, batches) = Journal::open(&self.journal_path(), self.options.sync_mode)?;
        let mut seq = last_seq;
        let mut replayed = 0usize;
        for batch in batches {
            // Left behind when a crash hit between checkpoint and truncate.
            if batch.seq <= seq {
                continue;
            }
            seq = batch.seq;
            trees.apply(batch.mutations);
            replayed += 1;
        }

        info!(
            dir = %self.dir.display(),
            checkpoint_seq = last_seq,
            replayed,
            seq,
            trees = trees.len(),
            records = trees.record_count(),
            "recovered storage state"
        );
        Ok((trees, Durable { journal, seq }))
    }

    /// Write the committed trees to a checkpoint and truncate the journal.
    ///
    /// A no-op unless the storage is open.
    pub fn checkpoint(&self) -> StorageResult<()> {
        self.engine.exclusive(|trees| {
            let durable = self.durable.lock()?;
            let Some(durable) = durable.as_ref() else {
                return Ok(());
            };
            checkpoint::write(&self.checkpoint_path(), durable.seq, trees)?;
            durable.journal.truncate()?;
            debug!(seq = durable.seq, "checkpoint complete");
            Ok(())
        })
    }

    fn journal_len(&self) -> StorageResult<u64> {
        let durable = self.durable.lock()?;
        match durable.as_ref() {
            Some(durable) => durable.journal.offset(),
            None => Ok(0),
        }
    }

    fn checkpoint_if_needed(&self) {
        let due = match self.journal_len() {
            Ok(len) => len >= self.options.checkpoint_threshold,
            Err(e) => {
                warn!(error = %e, "cannot read journal size");
                false
            }
        };
        if due {
            if let Err(e) = self.checkpoint() {
                warn!(error = %e, "checkpoint failed; the journal still holds every commit");
            }
        }
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("dir", &self.dir)
            .field("options", &self.options)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Import finish for the file engine: the imported trees become the new
/// checkpoint and the journal it supersedes is removed.
struct CheckpointSink {
    checkpoint_path: PathBuf,
    journal_path: PathBuf,
    last_seq: u64,
}

impl ImportSink for CheckpointSink {
    fn persist(&self, trees: &Trees) -> StorageResult<()> {
        checkpoint::write(&self.checkpoint_path, self.last_seq, trees)?;
        match fs::remove_file(&self.journal_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Storage for FileStorage {
    fn open(&self) -> StorageResult<()> {
        let mut durable = self.durable.lock()?;
        match self.engine.mode()? {
            StorageMode::Closed => {}
            StorageMode::Open => return Err(StorageError::Misuse(MisuseKind::AlreadyOpen)),
            StorageMode::Importing => {
                return Err(StorageError::Misuse(MisuseKind::ImportInProgress))
            }
        }

        let (trees, recovered) = self.recover()?;
        self.engine.replace(trees)?;
        self.engine.open()?;
        *durable = Some(recovered);
        info!(backend = "file", dir = %self.dir.display(), "storage opened");
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        if self.engine.mode()? != StorageMode::Open {
            self.engine.close()?;
            return Ok(());
        }

        // The journal handle is released whatever else fails.
        let checkpointed = self.checkpoint();
        let closed = self.engine.close();
        let released = self
            .durable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let synced = released.map_or(Ok(()), |durable| durable.journal.sync());
        let was_open = closed?;
        checkpointed?;
        synced?;
        if was_open {
            info!(backend = "file", dir = %self.dir.display(), "storage closed");
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
        let value = self.engine.write(op, |mutations| {
            let mut durable = self.durable.lock()?;
            let durable = durable
                .as_mut()
                .ok_or(StorageError::Misuse(MisuseKind::NotOpen))?;
            let batch = JournalBatch {
                seq: durable.seq + 1,
                mutations: mutations.to_vec(),
            };
            durable.journal.append(&batch)?;
            durable.seq = batch.seq;
            Ok(())
        })?;
        self.checkpoint_if_needed();
        Ok(value)
    }

    fn start_import(&self) -> StorageResult<Box<dyn Importer + '_>> {
        let _durable = self.durable.lock()?;
        self.engine.ensure_closed()?;

        // Start from what is on disk, not from whatever this handle last saw.
        let (trees, recovered) = self.recover()?;
        let sink = CheckpointSink {
            checkpoint_path: self.checkpoint_path(),
            journal_path: recovered.journal.path().to_path_buf(),
            last_seq: recovered.seq,
        };
        drop(recovered);
        self.engine.replace(trees)?;
        Ok(Box::new(EngineImporter::start(&self.engine, Box::new(sink))?))
    }

    fn list_trees(&self) -> StorageResult<Vec<TreeName>> {
        Ok(self.engine.snapshot()?.names())
    }

    fn status(&self) -> StorageResult<StorageStatus> {
        self.engine.status()
    }

    fn remove_storage_files(&self) -> StorageResult<()> {
        let _durable = self.durable.lock()?;
        self.engine.ensure_closed()?;
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.engine.replace(Trees::default())?;
        info!(dir = %self.dir.display(), "storage files removed");
        Ok(())
    }
}
