//! The DN2ID index: distinguished name → entry ID.
//!
//! Each record maps the [`DnKey`] encoding of a DN to the 8-byte big-endian
//! [`EntryId`] of its entry. Because the encoding preserves hierarchy,
//! children and subtree scans are prefix-bounded range scans over one tree.

use tracing::trace;

use dirstore_storage::{
    Cursor, Importer, ReadableTransaction, SequentialCursor, StorageError, StorageResult,
    WriteableTransaction,
};
use dirstore_types::{Dn, EntryId, TreeName};

use crate::error::{IndexError, IndexResult};
use crate::key::{self, DnKey};

/// DN2ID index over one tree, scoped to a base DN.
///
/// Holds no storage handle; every operation runs inside the transaction it
/// is given.
#[derive(Clone, Debug)]
pub struct Dn2Id {
    tree: TreeName,
    codec: DnKey,
}

impl Dn2Id {
    pub fn new(tree: TreeName, base_dn: Dn) -> Self {
        Self {
            tree,
            codec: DnKey::new(base_dn),
        }
    }

    pub fn tree_name(&self) -> &TreeName {
        &self.tree
    }

    pub fn base_dn(&self) -> &Dn {
        self.codec.base()
    }

    pub fn codec(&self) -> &DnKey {
        &self.codec
    }

    /// Look up the entry ID of `dn`. DNs outside the base DN are never found.
    pub fn get<T>(&self, txn: &T, dn: &Dn) -> IndexResult<Option<EntryId>>
    where
        T: ReadableTransaction + ?Sized,
    {
        let Some(key) = self.key_in_scope(dn) else {
            return Ok(None);
        };
        match txn.read(&self.tree, &key)? {
            Some(value) => decode_id(&key, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Map `dn` to `id`, replacing any previous mapping.
    ///
    /// IDs are not checked for uniqueness; that is the allocator's job.
    pub fn put<T>(&self, txn: &mut T, dn: &Dn, id: EntryId) -> IndexResult<()>
    where
        T: WriteableTransaction + ?Sized,
    {
        let key = self.codec.encode(dn)?;
        txn.put(&self.tree, &key, &id.to_bytes())?;
        trace!(tree = %self.tree, %dn, id = id.get(), "dn2id put");
        Ok(())
    }

    /// Remove the mapping of `dn`. Returns whether it existed.
    ///
    /// Descendants are left in place.
    pub fn remove<T>(&self, txn: &mut T, dn: &Dn) -> IndexResult<bool>
    where
        T: WriteableTransaction + ?Sized,
    {
        let Some(key) = self.key_in_scope(dn) else {
            return Ok(false);
        };
        let removed = txn.delete(&self.tree, &key)?;
        trace!(tree = %self.tree, %dn, removed, "dn2id remove");
        Ok(removed)
    }

    /// Write a mapping through a bulk importer.
    ///
    /// The tree must have been created on the importer or already exist.
    pub fn import<I>(&self, importer: &mut I, dn: &Dn, id: EntryId) -> IndexResult<()>
    where
        I: Importer + ?Sized,
    {
        let key = self.codec.encode(dn)?;
        importer.put(&self.tree, &key, &id.to_bytes())?;
        Ok(())
    }

    /// Cursor over every mapping in the tree, in key order.
    pub fn open_cursor<'t, T>(&self, txn: &'t T) -> IndexResult<Dn2IdCursor<'t>>
    where
        T: ReadableTransaction + ?Sized,
    {
        self.cursor(txn, Scope::All)
    }

    /// Cursor over the immediate children of `dn`, by ascending RDN.
    pub fn open_children_cursor<'t, T>(&self, txn: &'t T, dn: &Dn) -> IndexResult<Dn2IdCursor<'t>>
    where
        T: ReadableTransaction + ?Sized,
    {
        let scope = match self.key_in_scope(dn) {
            Some(key) => Scope::Children {
                depth: key::depth(&key) + 1,
                prefix: child_prefix(key),
            },
            None => Scope::Empty,
        };
        self.cursor(txn, scope)
    }

    /// Cursor over every descendant of `dn`: each node, then its subtree,
    /// then its next sibling.
    pub fn open_subordinates_cursor<'t, T>(
        &self,
        txn: &'t T,
        dn: &Dn,
    ) -> IndexResult<Dn2IdCursor<'t>>
    where
        T: ReadableTransaction + ?Sized,
    {
        let scope = match self.key_in_scope(dn) {
            Some(key) => Scope::Subtree {
                prefix: child_prefix(key),
            },
            None => Scope::Empty,
        };
        self.cursor(txn, scope)
    }

    /// Whether `dn` has at least one child mapping.
    pub fn has_children<T>(&self, txn: &T, dn: &Dn) -> IndexResult<bool>
    where
        T: ReadableTransaction + ?Sized,
    {
        Ok(self.open_children_cursor(txn, dn)?.next()?)
    }

    /// Number of descendant mappings of `dn`, at any depth.
    pub fn count_subordinates<T>(&self, txn: &T, dn: &Dn) -> IndexResult<u64>
    where
        T: ReadableTransaction + ?Sized,
    {
        let mut cursor = self.open_subordinates_cursor(txn, dn)?;
        let mut count = 0;
        while cursor.next()? {
            count += 1;
        }
        Ok(count)
    }

    fn key_in_scope(&self, dn: &Dn) -> Option<Vec<u8>> {
        self.codec.encode(dn).ok()
    }

    fn cursor<'t, T>(&self, txn: &'t T, scope: Scope) -> IndexResult<Dn2IdCursor<'t>>
    where
        T: ReadableTransaction + ?Sized,
    {
        Ok(Dn2IdCursor {
            cursor: txn.open_cursor(&self.tree)?,
            codec: self.codec.clone(),
            scope,
            state: State::Unpositioned,
            current: None,
        })
    }
}

fn child_prefix(mut key: Vec<u8>) -> Vec<u8> {
    key.push(key::SEPARATOR);
    key
}

fn decode_id(key: &[u8], value: &[u8]) -> IndexResult<EntryId> {
    EntryId::from_bytes(value).map_err(|_| IndexError::CorruptValue {
        key: key.to_vec(),
        len: value.len(),
    })
}

#[derive(Clone, Debug)]
enum Scope {
    All,
    Empty,
    /// Keys starting with `prefix`.
    Subtree { prefix: Vec<u8> },
    /// Keys starting with `prefix` that are exactly `depth` RDNs deep.
    Children { prefix: Vec<u8>, depth: usize },
}

impl Scope {
    fn prefix(&self) -> Option<&[u8]> {
        match self {
            Self::Subtree { prefix } | Self::Children { prefix, .. } => Some(prefix),
            Self::All | Self::Empty => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Unpositioned,
    Positioned,
    Exhausted,
}

/// Cursor over DN2ID mappings in one scope.
///
/// Starts before its first mapping. Keys are the encoded DNs; values are
/// decoded entry IDs. Borrows the transaction it was opened in.
pub struct Dn2IdCursor<'t> {
    cursor: Box<dyn Cursor + 't>,
    codec: DnKey,
    scope: Scope,
    state: State,
    current: Option<EntryId>,
}

impl<'t> Dn2IdCursor<'t> {
    /// Decoded DN of the current mapping.
    pub fn dn(&self) -> IndexResult<Option<Dn>> {
        match self.key() {
            Some(key) => Ok(Some(self.codec.decode(key)?)),
            None => Ok(None),
        }
    }

    /// Remaining entry IDs as an iterator.
    pub fn ids(self) -> EntryIds<'t> {
        EntryIds {
            cursor: self,
            failed: false,
        }
    }

    /// Move the raw cursor to the next key in scope, skipping subtrees below
    /// the children depth. Returns `false` once the scope is exhausted.
    fn advance(&mut self) -> StorageResult<bool> {
        let mut found = match (self.state, &self.scope) {
            (State::Exhausted, _) | (_, Scope::Empty) => false,
            (State::Unpositioned, Scope::All) => self.cursor.next()?,
            (State::Unpositioned, scope) => self
                .cursor
                .position_to_key_or_next(scope.prefix().unwrap_or_default())?,
            (State::Positioned, Scope::Children { .. }) => {
                // Step over the current child's subtree in one seek.
                let skip = key::after_subtree(self.cursor.key().unwrap_or_default());
                self.cursor.position_to_key_or_next(&skip)?
            }
            (State::Positioned, _) => self.cursor.next()?,
        };

        while found {
            let current = self.cursor.key().unwrap_or_default();
            if let Some(prefix) = self.scope.prefix() {
                if !current.starts_with(prefix) {
                    found = false;
                    break;
                }
            }
            match &self.scope {
                Scope::Children { depth, .. } if key::depth(current) > *depth => {
                    // A descendant whose parent has no mapping: skip the
                    // missing parent's whole subtree.
                    let skip = key::after_subtree(key::ancestor_at(current, *depth));
                    found = self.cursor.position_to_key_or_next(&skip)?;
                }
                _ => break,
            }
        }

        self.state = if found {
            State::Positioned
        } else {
            State::Exhausted
        };
        Ok(found)
    }
}

impl SequentialCursor for Dn2IdCursor<'_> {
    type Key = [u8];
    type Value = EntryId;

    fn next(&mut self) -> StorageResult<bool> {
        self.current = None;
        if !self.advance()? {
            return Ok(false);
        }
        let key = self.cursor.key().unwrap_or_default();
        let value = self.cursor.value().unwrap_or_default();
        match EntryId::from_bytes(value) {
            Ok(id) => {
                self.current = Some(id);
                Ok(true)
            }
            Err(e) => {
                self.state = State::Exhausted;
                Err(StorageError::Serialization(format!(
                    "DN2ID value under key {key:02x?}: {e}"
                )))
            }
        }
    }

    fn is_defined(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.and_then(|_| self.cursor.key())
    }

    fn value(&self) -> Option<&EntryId> {
        self.current.as_ref()
    }
}

impl std::fmt::Debug for Dn2IdCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dn2IdCursor")
            .field("scope", &self.scope)
            .field("state", &self.state)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

/// Iterator over the entry IDs of a [`Dn2IdCursor`]. Stops after the first
/// error.
#[derive(Debug)]
pub struct EntryIds<'t> {
    cursor: Dn2IdCursor<'t>,
    failed: bool,
}

impl Iterator for EntryIds<'_> {
    type Item = IndexResult<EntryId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.cursor.next() {
            Ok(true) => self.cursor.value().copied().map(Ok),
            Ok(false) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e.into()))
            }
        }
    }
}
