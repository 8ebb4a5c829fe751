//! Full snapshots of the committed trees.
//!
//! ```text
//! [4 bytes: magic b"DSCK"]
//! [4 bytes: format version (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [8 bytes: payload length (little-endian u64)]
//! [N bytes: bincode (last_seq, [(tree, records)])]
//! ```
//!
//! A checkpoint is written to a temporary sibling, fsynced and renamed over
//! the previous one, so a crash leaves either the old or the new file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use dirstore_types::TreeName;

use crate::error::{StorageError, StorageResult};
use crate::trees::{TreeData, Trees};

const MAGIC: &[u8; 4] = b"DSCK";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 20;

/// Committed state recovered from a checkpoint file.
#[derive(Debug, Default)]
pub(crate) struct Checkpoint {
    /// Sequence number of the last journal batch the snapshot includes.
    pub(crate) last_seq: u64,
    pub(crate) trees: Trees,
}

pub(crate) fn write(path: &Path, last_seq: u64, trees: &Trees) -> StorageResult<()> {
    let records: Vec<(&TreeName, &TreeData)> = trees.iter().collect();
    let payload = bincode::serialize(&(last_seq, records))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);

    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        // Persist the rename itself. Not every platform can open a directory.
        if let Ok(dir) = File::open(parent) {
            if let Err(e) = dir.sync_all() {
                warn!(dir = %parent.display(), error = %e, "cannot sync checkpoint directory");
            }
        }
    }

    debug!(
        path = %path.display(),
        last_seq,
        trees = trees.len(),
        bytes = bytes.len(),
        "checkpoint written"
    );
    Ok(())
}

/// Load the checkpoint at `path`; a missing file is an empty state.
pub(crate) fn read(path: &Path) -> StorageResult<Checkpoint> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Checkpoint::default()),
        Err(e) => return Err(e.into()),
    };
    let corrupt = |reason: String| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < HEADER_SIZE {
        return Err(corrupt(format!("file is {} bytes, shorter than its header", bytes.len())));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic".into()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let expected_crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[12..HEADER_SIZE]);
    let len = u64::from_le_bytes(len);

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() as u64 != len {
        return Err(corrupt(format!(
            "payload is {} bytes, header says {len}",
            payload.len()
        )));
    }
    let actual_crc = crc32fast::hash(payload);
    if actual_crc != expected_crc {
        return Err(corrupt(format!(
            "CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        )));
    }

    let (last_seq, records): (u64, Vec<(TreeName, TreeData)>) =
        bincode::deserialize(payload).map_err(|e| corrupt(e.to_string()))?;
    Ok(Checkpoint {
        last_seq,
        trees: Trees::from_data(records),
    })
}

/// Remove a leftover temporary file from an interrupted checkpoint.
pub(crate) fn remove_stale_tmp(path: &Path) -> StorageResult<()> {
    match fs::remove_file(tmp_path(path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
