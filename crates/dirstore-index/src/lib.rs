//! # dirstore-index
//!
//! Indexes built on the [`dirstore_storage`] SPI.
//!
//! - [`key`]: order-preserving DN → key encoding ([`DnKey`])
//! - [`Dn2Id`]: the DN → entry ID index, with children and subtree cursors
//!
//! Index operations take a transaction rather than a storage handle, so
//! several indexes can be updated atomically in one
//! [`Storage::write`](dirstore_storage::Storage::write).

pub mod dn2id;
pub mod error;
pub mod key;

pub use dn2id::{Dn2Id, Dn2IdCursor, EntryIds};
pub use error::{IndexError, IndexResult};
pub use key::DnKey;
