//! # dirstore-storage
//!
//! Transactional key-value storage for the directory server.
//!
//! - [`spi`]: the engine-agnostic contract ([`Storage`], transactions,
//!   cursors, [`Importer`])
//! - [`MemoryStorage`]: snapshot-isolated volatile engine
//! - [`FileStorage`]: the same engine made durable with a CRC-framed journal
//!   and checkpoint files
//! - [`AnyStorage`]: engine selected from a [`StorageConfig`]
//!
//! Records live in named trees ([`TreeName`](dirstore_types::TreeName)) and
//! are ordered by unsigned byte comparison of their keys.

mod any;
mod checkpoint;
pub mod config;
mod cursor;
mod engine;
pub mod error;
mod file;
mod journal;
mod memory;
pub mod spi;
mod trees;

pub use any::AnyStorage;
pub use config::{Backend, StorageConfig, SyncMode};
pub use error::{MisuseKind, StorageError, StorageResult};
pub use file::{FileOptions, FileStorage};
pub use journal::JournalBatch;
pub use memory::MemoryStorage;
pub use spi::{
    Cursor, Importer, ReadableTransaction, SequentialCursor, Storage, StorageMode, StorageStatus,
    WriteableTransaction,
};
pub use trees::Mutation;
