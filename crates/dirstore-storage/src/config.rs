//! Storage configuration, loadable from TOML.
//!
//! ```toml
//! backend = "file"
//! db-directory = "/var/lib/dirstore"
//! sync-mode = "every-write"
//! checkpoint-threshold = 4194304
//! ```
//!
//! Every key is optional; absent keys take their [`Default`] value.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Which engine backs the storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Volatile in-memory trees.
    Memory,
    /// Journaled trees under `db_directory`.
    #[default]
    File,
}

/// When journal appends reach stable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every commit.
    EveryWrite,
    /// Leave flushing to the OS page cache.
    #[default]
    OsDefault,
}

/// Default journal size that triggers a checkpoint: 4 MiB.
pub const DEFAULT_CHECKPOINT_THRESHOLD: u64 = 4 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Directory holding the journal and checkpoint files.
    pub db_directory: PathBuf,
    pub sync_mode: SyncMode,
    /// Journal size in bytes after which a commit triggers a checkpoint.
    pub checkpoint_threshold: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            db_directory: PathBuf::from("./db"),
            sync_mode: SyncMode::default(),
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
        }
    }
}

impl StorageConfig {
    /// In-memory configuration.
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            ..Self::default()
        }
    }

    /// File-backed configuration rooted at `dir`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File,
            db_directory: dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> StorageResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| StorageError::Config(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. An empty file yields the default configuration.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.checkpoint_threshold == 0 {
            return Err(StorageError::Config(
                "checkpoint-threshold must be greater than zero".into(),
            ));
        }
        if self.backend == Backend::File && self.db_directory.as_os_str().is_empty() {
            return Err(StorageError::Config(
                "db-directory must be set for the file backend".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(StorageConfig::from_toml_str("").unwrap(), StorageConfig::default());
    }

    #[test]
    fn parses_kebab_case_keys() {
        let config = StorageConfig::from_toml_str(
            r#"
            backend = "memory"
            db-directory = "/tmp/dirstore"
            sync-mode = "every-write"
            checkpoint-threshold = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.db_directory, PathBuf::from("/tmp/dirstore"));
        assert_eq!(config.sync_mode, SyncMode::EveryWrite);
        assert_eq!(config.checkpoint_threshold, 1024);
    }

    #[test]
    fn rejects_unknown_keys_and_values() {
        assert!(matches!(
            StorageConfig::from_toml_str("cache-size = 3"),
            Err(StorageError::Config(_))
        ));
        assert!(matches!(
            StorageConfig::from_toml_str(r#"sync-mode = "sometimes""#),
            Err(StorageError::Config(_))
        ));
    }

    #[test]
    fn validation() {
        let mut config = StorageConfig::file("");
        assert!(config.validate().is_err());
        config.backend = Backend::Memory;
        assert!(config.validate().is_ok());

        let zero = StorageConfig {
            checkpoint_threshold: 0,
            ..StorageConfig::memory()
        };
        assert!(matches!(zero.validate(), Err(StorageError::Config(_))));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirstore.toml");
        std::fs::write(&path, "sync-mode = \"every-write\"\n").unwrap();
        let config = StorageConfig::load(&path).unwrap();
        assert_eq!(config.sync_mode, SyncMode::EveryWrite);
        assert_eq!(config.backend, Backend::File);

        assert!(StorageConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
