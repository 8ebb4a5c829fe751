use std::ops::Bound;

use crate::error::StorageResult;
use crate::spi::{Cursor, SequentialCursor};
use crate::trees::TreeView;

#[derive(Clone, Copy, Debug)]
enum Position<'a> {
    BeforeFirst,
    At(&'a [u8], &'a [u8]),
    Exhausted,
}

/// Cursor over a [`TreeView`]. Used by both the memory and the file engine,
/// for read and write transactions alike.
#[derive(Debug)]
pub(crate) struct ViewCursor<'a> {
    /// `None` for a tree that does not exist: the cursor is always empty.
    view: Option<TreeView<'a>>,
    position: Position<'a>,
}

impl<'a> ViewCursor<'a> {
    pub(crate) fn new(view: Option<TreeView<'a>>) -> Self {
        Self {
            view,
            position: Position::BeforeFirst,
        }
    }

    fn settle(&mut self, found: Option<(&'a [u8], &'a [u8])>) -> bool {
        self.position = match found {
            Some((k, v)) => Position::At(k, v),
            None => Position::Exhausted,
        };
        found.is_some()
    }
}

impl SequentialCursor for ViewCursor<'_> {
    type Key = [u8];
    type Value = [u8];

    fn next(&mut self) -> StorageResult<bool> {
        let Some(view) = self.view else {
            self.position = Position::Exhausted;
            return Ok(false);
        };
        let found = match self.position {
            Position::BeforeFirst => view.seek(Bound::Unbounded),
            Position::At(key, _) => view.seek(Bound::Excluded(key)),
            Position::Exhausted => None,
        };
        Ok(self.settle(found))
    }

    fn is_defined(&self) -> bool {
        matches!(self.position, Position::At(..))
    }

    fn key(&self) -> Option<&[u8]> {
        match self.position {
            Position::At(key, _) => Some(key),
            _ => None,
        }
    }

    fn value(&self) -> Option<&[u8]> {
        match self.position {
            Position::At(_, value) => Some(value),
            _ => None,
        }
    }
}

impl Cursor for ViewCursor<'_> {
    fn position_to_key(&mut self, key: &[u8]) -> StorageResult<bool> {
        let found = self
            .view
            .and_then(|view| view.seek(Bound::Included(key)))
            .filter(|(k, _)| *k == key);
        Ok(self.settle(found))
    }

    fn position_to_key_or_next(&mut self, key: &[u8]) -> StorageResult<bool> {
        let found = self.view.and_then(|view| view.seek(Bound::Included(key)));
        Ok(self.settle(found))
    }

    fn position_to_last_key(&mut self) -> StorageResult<bool> {
        let found = self.view.and_then(|view| view.seek_back(Bound::Unbounded));
        Ok(self.settle(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trees::TreeData;

    fn data() -> TreeData {
        [("b", "2"), ("d", "4"), ("f", "6")]
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn starts_before_first_and_walks_forward() {
        let data = data();
        let mut cursor = ViewCursor::new(Some(TreeView::committed(&data)));
        assert!(!cursor.is_defined());
        assert!(cursor.key().is_none());

        let mut keys = Vec::new();
        while cursor.next().unwrap() {
            keys.push(cursor.key().unwrap().to_vec());
        }
        assert_eq!(keys, vec![b"b".to_vec(), b"d".to_vec(), b"f".to_vec()]);
        assert!(!cursor.is_defined());
        // Stays exhausted.
        assert!(!cursor.next().unwrap());
    }

    #[test]
    fn positioning() {
        let data = data();
        let mut cursor = ViewCursor::new(Some(TreeView::committed(&data)));

        assert!(cursor.position_to_key(b"d").unwrap());
        assert_eq!(cursor.value(), Some(&b"4"[..]));
        assert!(cursor.next().unwrap());
        assert_eq!(cursor.key(), Some(&b"f"[..]));

        assert!(!cursor.position_to_key(b"c").unwrap());
        assert!(!cursor.is_defined());
        assert!(!cursor.next().unwrap());

        assert!(cursor.position_to_key_or_next(b"c").unwrap());
        assert_eq!(cursor.key(), Some(&b"d"[..]));

        assert!(!cursor.position_to_key_or_next(b"g").unwrap());

        assert!(cursor.position_to_last_key().unwrap());
        assert_eq!(cursor.key(), Some(&b"f"[..]));
    }

    #[test]
    fn missing_tree_is_empty() {
        let mut cursor = ViewCursor::new(None);
        assert!(!cursor.next().unwrap());
        assert!(!cursor.position_to_key_or_next(b"").unwrap());
        assert!(!cursor.position_to_last_key().unwrap());
    }
}
