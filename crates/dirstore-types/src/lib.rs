//! Foundation types for dirstore.
//!
//! This crate provides the naming and identity types shared by the storage
//! layer and every index built on it. Every other dirstore crate depends on
//! `dirstore-types`.
//!
//! # Key Types
//!
//! - [`Dn`]: Distinguished name, parsed from RFC 4514 form and normalized
//! - [`Rdn`]: One component of a DN, a set of [`Ava`]s
//! - [`EntryId`]: Non-zero 64-bit surrogate key for a directory entry
//! - [`EntryIdAllocator`]: Monotonic, thread-safe `EntryId` source
//! - [`TreeName`]: (base DN scope, index name) pair naming a keyspace

pub mod dn;
pub mod entry_id;
pub mod error;
pub mod tree_name;

pub use dn::{Ava, Dn, Rdn};
pub use entry_id::{EntryId, EntryIdAllocator};
pub use error::TypeError;
pub use tree_name::TreeName;
