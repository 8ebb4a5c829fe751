use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SyncMode;
use crate::error::{StorageError, StorageResult};
use crate::trees::Mutation;

/// One committed write transaction.
///
/// On-disk framing:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized JournalBatch)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalBatch {
    /// Commit sequence number, strictly increasing across checkpoints.
    pub seq: u64,
    pub mutations: Vec<Mutation>,
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct JournalWriter {
    writer: BufWriter<File>,
    /// Length of the valid prefix of the file.
    offset: u64,
    /// A failed append could not be cut back off the file.
    damaged: bool,
}

/// Append-only log of committed batches.
///
/// Recovery reads front to back and stops at the first entry that is
/// truncated, fails its CRC or does not decode. Everything after that point
/// is a torn write and is cut off, so a later append never follows garbage.
pub(crate) struct Journal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    sync_mode: SyncMode,
}

impl Journal {
    /// Open (or create) the journal at `path` and recover its valid batches.
    pub(crate) fn open(path: &Path, sync_mode: SyncMode) -> StorageResult<(Self, Vec<JournalBatch>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let file_len = file.metadata()?.len();

        let (batches, valid_len) = Self::recover(path)?;
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "discarding torn journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let journal = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter {
                writer: BufWriter::new(file),
                offset: valid_len,
                damaged: false,
            }),
            sync_mode,
        };
        Ok((journal, batches))
    }

    /// Append a batch. Returns the byte offset it was written at.
    pub(crate) fn append(&self, batch: &JournalBatch) -> StorageResult<u64> {
        let payload = bincode::serialize(batch)?;
        let length = payload.len() as u32;
        let crc = crc32fast::hash(&payload);

        let mut w = self.writer.lock()?;
        if w.damaged {
            return Err(StorageError::Corrupt {
                path: self.path.clone(),
                reason: "a failed append left bytes that could not be removed".into(),
            });
        }
        let entry_offset = w.offset;

        let written = (|| {
            w.writer.write_all(&length.to_le_bytes())?;
            w.writer.write_all(&crc.to_le_bytes())?;
            w.writer.write_all(&payload)?;
            w.writer.flush()?;
            if self.sync_mode == SyncMode::EveryWrite {
                w.writer.get_ref().sync_data()?;
            }
            Ok::<_, io::Error>(())
        })();
        if let Err(e) = written {
            if let Err(cut) = self.cut_back(&mut w) {
                warn!(
                    path = %self.path.display(),
                    offset = entry_offset,
                    error = %cut,
                    "cannot remove partial journal entry; refusing further appends"
                );
                w.damaged = true;
            }
            return Err(e.into());
        }

        w.offset += HEADER_SIZE as u64 + payload.len() as u64;

        debug!(
            seq = batch.seq,
            offset = entry_offset,
            len = payload.len(),
            "journal append"
        );
        Ok(entry_offset)
    }

    /// Discard whatever a failed append left behind, buffered or on disk, so
    /// the next entry starts at `w.offset`.
    fn cut_back(&self, w: &mut JournalWriter) -> io::Result<()> {
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut w.writer, BufWriter::new(file));
        // Unflushed bytes go with the old writer instead of reaching the file.
        drop(stale.into_parts());
        w.writer.get_ref().set_len(w.offset)?;
        w.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Read the valid prefix of the journal file at `path`.
    ///
    /// Returns the decoded batches and the byte length they occupy.
    fn recover(path: &Path) -> StorageResult<(Vec<JournalBatch>, u64)> {
        let mut file = BufReader::new(File::open(path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut batches = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
                warn!(offset, length, file_len, "invalid journal entry length; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated journal entry; stopping recovery");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "journal CRC mismatch; stopping recovery"
                );
                break;
            }

            match bincode::deserialize::<JournalBatch>(&payload) {
                Ok(batch) => batches.push(batch),
                Err(e) => {
                    warn!(offset, error = %e, "undecodable journal entry; stopping recovery");
                    break;
                }
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        debug!(recovered = batches.len(), valid_len = offset, "journal recovery complete");
        Ok((batches, offset))
    }

    /// Drop every batch. Called once a checkpoint covers them.
    pub(crate) fn truncate(&self) -> StorageResult<()> {
        let mut w = self.writer.lock()?;
        w.writer.flush()?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        file.set_len(0)?;
        file.sync_all()?;

        w.writer = BufWriter::new(file);
        w.offset = 0;
        w.damaged = false;

        debug!("journal truncated");
        Ok(())
    }

    /// Bytes currently in the journal.
    pub(crate) fn offset(&self) -> StorageResult<u64> {
        Ok(self.writer.lock()?.offset)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered bytes and fsync.
    pub(crate) fn sync(&self) -> StorageResult<()> {
        let mut w = self.writer.lock()?;
        w.writer.flush()?;
        w.writer.get_ref().sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish_non_exhaustive()
    }
}
