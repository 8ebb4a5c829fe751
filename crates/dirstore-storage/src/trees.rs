//! Committed snapshots and the write-transaction overlay.
//!
//! The committed state is an `Arc<Trees>`; readers clone the `Arc` and keep
//! their snapshot for as long as they like. Each tree is itself behind an
//! `Arc`, so publishing a commit copies only the trees it touched, and only
//! when a reader still holds them.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use dirstore_types::TreeName;

/// Records of one tree, ordered by key bytes.
pub(crate) type TreeData = BTreeMap<Vec<u8>, Vec<u8>>;

/// Buffered writes to one tree; `None` marks a deletion.
type Writes = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// A single change to the committed state.
///
/// Commits are recorded as ordered mutation lists; the file engine journals
/// them verbatim and replays them on recovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    CreateTree(TreeName),
    DeleteTree(TreeName),
    Put {
        tree: TreeName,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        tree: TreeName,
        key: Vec<u8>,
    },
}

/// All trees of one committed state.
#[derive(Clone, Debug, Default)]
pub(crate) struct Trees {
    trees: BTreeMap<TreeName, Arc<TreeData>>,
}

impl Trees {
    pub(crate) fn from_data(trees: impl IntoIterator<Item = (TreeName, TreeData)>) -> Self {
        Self {
            trees: trees
                .into_iter()
                .map(|(name, data)| (name, Arc::new(data)))
                .collect(),
        }
    }

    pub(crate) fn get(&self, tree: &TreeName) -> Option<&TreeData> {
        self.trees.get(tree).map(Arc::as_ref)
    }

    pub(crate) fn contains(&self, tree: &TreeName) -> bool {
        self.trees.contains_key(tree)
    }

    pub(crate) fn names(&self) -> Vec<TreeName> {
        self.trees.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.trees.len()
    }

    pub(crate) fn record_count(&self) -> u64 {
        self.trees.values().map(|t| t.len() as u64).sum()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&TreeName, &TreeData)> {
        self.trees.iter().map(|(name, data)| (name, data.as_ref()))
    }

    pub(crate) fn create_tree(&mut self, tree: &TreeName) {
        self.trees.entry(tree.clone()).or_default();
    }

    pub(crate) fn insert(&mut self, tree: &TreeName, key: Vec<u8>, value: Vec<u8>) {
        Arc::make_mut(self.trees.entry(tree.clone()).or_default()).insert(key, value);
    }

    /// Apply a commit's mutations in order.
    pub(crate) fn apply(&mut self, mutations: Vec<Mutation>) {
        for mutation in mutations {
            match mutation {
                Mutation::CreateTree(tree) => {
                    self.trees.entry(tree).or_default();
                }
                Mutation::DeleteTree(tree) => {
                    self.trees.remove(&tree);
                }
                Mutation::Put { tree, key, value } => {
                    Arc::make_mut(self.trees.entry(tree).or_default()).insert(key, value);
                }
                Mutation::Delete { tree, key } => {
                    if let Some(data) = self.trees.get_mut(&tree) {
                        Arc::make_mut(data).remove(&key);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct PendingTree {
    /// The committed tree is dropped before `writes` apply.
    dropped: bool,
    /// The tree did not exist at the start of the transaction.
    created: bool,
    writes: Writes,
}

/// Writes buffered by one write transaction.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    trees: BTreeMap<TreeName, PendingTree>,
}

impl Pending {
    /// View of `tree` as this transaction sees it, `None` if it does not exist.
    pub(crate) fn view<'a>(&'a self, base: &'a Trees, tree: &TreeName) -> Option<TreeView<'a>> {
        let pending = self.trees.get(tree);
        let committed = match pending {
            Some(p) if p.dropped => None,
            _ => base.get(tree),
        };
        let exists = committed.is_some() || pending.is_some_and(|p| p.created);
        exists.then(|| TreeView {
            base: committed,
            writes: pending.map(|p| &p.writes),
        })
    }

    pub(crate) fn exists(&self, base: &Trees, tree: &TreeName) -> bool {
        self.view(base, tree).is_some()
    }

    pub(crate) fn create_tree(&mut self, base: &Trees, tree: &TreeName) {
        if !self.exists(base, tree) {
            self.trees.entry(tree.clone()).or_default().created = true;
        }
    }

    pub(crate) fn delete_tree(&mut self, base: &Trees, tree: &TreeName) -> bool {
        if !self.exists(base, tree) {
            return false;
        }
        let pending = self.trees.entry(tree.clone()).or_default();
        pending.dropped = base.contains(tree);
        pending.created = false;
        pending.writes.clear();
        true
    }

    pub(crate) fn put(&mut self, base: &Trees, tree: &TreeName, key: &[u8], value: &[u8]) {
        self.create_tree(base, tree);
        self.trees
            .entry(tree.clone())
            .or_default()
            .writes
            .insert(key.to_vec(), Some(value.to_vec()));
    }

    pub(crate) fn delete(&mut self, base: &Trees, tree: &TreeName, key: &[u8]) -> bool {
        let existed = self
            .view(base, tree)
            .is_some_and(|view| view.get(key).is_some());
        if existed {
            self.trees
                .entry(tree.clone())
                .or_default()
                .writes
                .insert(key.to_vec(), None);
        }
        existed
    }

    /// Flatten into the ordered mutation list of a commit.
    pub(crate) fn into_mutations(self) -> Vec<Mutation> {
        let mut mutations = Vec::new();
        for (tree, pending) in self.trees {
            if pending.dropped {
                mutations.push(Mutation::DeleteTree(tree.clone()));
            }
            if pending.created {
                mutations.push(Mutation::CreateTree(tree.clone()));
            }
            for (key, write) in pending.writes {
                mutations.push(match write {
                    Some(value) => Mutation::Put {
                        tree: tree.clone(),
                        key,
                        value,
                    },
                    None => Mutation::Delete {
                        tree: tree.clone(),
                        key,
                    },
                });
            }
        }
        mutations
    }
}

/// One tree as seen by a transaction: committed records merged with the
/// transaction's own buffered writes.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TreeView<'a> {
    base: Option<&'a TreeData>,
    writes: Option<&'a Writes>,
}

impl<'a> TreeView<'a> {
    pub(crate) fn committed(base: &'a TreeData) -> Self {
        Self {
            base: Some(base),
            writes: None,
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<&'a [u8]> {
        if let Some(write) = self.writes.and_then(|w| w.get(key)) {
            return write.as_deref();
        }
        self.base.and_then(|b| b.get(key)).map(Vec::as_slice)
    }

    /// First visible record with a key inside `lower..`.
    pub(crate) fn seek<'k>(&self, lower: Bound<&'k [u8]>) -> Option<(&'a [u8], &'a [u8])>
    where
        'a: 'k,
    {
        let mut lower = lower;
        loop {
            let committed = self
                .base
                .and_then(|b| b.range::<[u8], _>((lower, Bound::Unbounded)).next());
            let buffered = self
                .writes
                .and_then(|w| w.range::<[u8], _>((lower, Bound::Unbounded)).next());
            match (committed, buffered) {
                (None, None) => return None,
                (Some((k, v)), None) => return Some((k.as_slice(), v.as_slice())),
                (committed, Some((wk, write))) => {
                    if let Some((k, v)) = committed {
                        if k < wk {
                            return Some((k.as_slice(), v.as_slice()));
                        }
                    }
                    match write {
                        Some(v) => return Some((wk.as_slice(), v.as_slice())),
                        None => lower = Bound::Excluded(wk.as_slice()),
                    }
                }
            }
        }
    }

    /// Last visible record with a key inside `..upper`.
    pub(crate) fn seek_back<'k>(&self, upper: Bound<&'k [u8]>) -> Option<(&'a [u8], &'a [u8])>
    where
        'a: 'k,
    {
        let mut upper = upper;
        loop {
            let committed = self
                .base
                .and_then(|b| b.range::<[u8], _>((Bound::Unbounded, upper)).next_back());
            let buffered = self
                .writes
                .and_then(|w| w.range::<[u8], _>((Bound::Unbounded, upper)).next_back());
            match (committed, buffered) {
                (None, None) => return None,
                (Some((k, v)), None) => return Some((k.as_slice(), v.as_slice())),
                (committed, Some((wk, write))) => {
                    if let Some((k, v)) = committed {
                        if k > wk {
                            return Some((k.as_slice(), v.as_slice()));
                        }
                    }
                    match write {
                        Some(v) => return Some((wk.as_slice(), v.as_slice())),
                        None => upper = Bound::Excluded(wk.as_slice()),
                    }
                }
            }
        }
    }

    pub(crate) fn len(&self) -> u64 {
        let committed = self.base.map_or(0, |b| b.len() as u64);
        let Some(writes) = self.writes else {
            return committed;
        };
        writes.iter().fold(committed, |count, (key, write)| {
            let in_base = self.base.is_some_and(|b| b.contains_key(key));
            match (in_base, write) {
                (false, Some(_)) => count + 1,
                (true, None) => count - 1,
                _ => count,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(name: &str) -> TreeName {
        TreeName::new("base", name).unwrap()
    }

    fn data(pairs: &[(&str, &str)]) -> TreeData {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    fn collect(view: TreeView<'_>) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut next = view.seek(Bound::Unbounded);
        while let Some((k, v)) = next {
            out.push((
                String::from_utf8(k.to_vec()).unwrap(),
                String::from_utf8(v.to_vec()).unwrap(),
            ));
            next = view.seek(Bound::Excluded(k));
        }
        out
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn overlay_merges_in_key_order() {
        let base = Trees::from_data([(tree("t"), data(&[("a", "1"), ("c", "3"), ("e", "5")]))]);
        let mut pending = Pending::default();
        pending.put(&base, &tree("t"), b"b", b"2");
        pending.put(&base, &tree("t"), b"c", b"33");
        assert!(pending.delete(&base, &tree("t"), b"e"));
        pending.put(&base, &tree("t"), b"f", b"6");

        let view = pending.view(&base, &tree("t")).unwrap();
        assert_eq!(
            collect(view),
            pairs(&[("a", "1"), ("b", "2"), ("c", "33"), ("f", "6")])
        );
        assert_eq!(view.len(), 4);
        assert_eq!(view.get(b"e"), None);
        assert_eq!(view.get(b"c"), Some(&b"33"[..]));
    }

    #[test]
    fn seek_back_skips_deleted_tail() {
        let base = Trees::from_data([(tree("t"), data(&[("a", "1"), ("z", "26")]))]);
        let mut pending = Pending::default();
        pending.delete(&base, &tree("t"), b"z");
        let view = pending.view(&base, &tree("t")).unwrap();
        assert_eq!(view.seek_back(Bound::Unbounded), Some((&b"a"[..], &b"1"[..])));
    }

    #[test]
    fn delete_of_missing_key_is_not_recorded() {
        let base = Trees::from_data([(tree("t"), data(&[("a", "1")]))]);
        let mut pending = Pending::default();
        assert!(!pending.delete(&base, &tree("t"), b"missing"));
        assert!(!pending.delete(&base, &tree("other"), b"a"));
        assert!(pending.into_mutations().is_empty());
    }

    #[test]
    fn dropped_tree_hides_committed_records() {
        let base = Trees::from_data([(tree("t"), data(&[("a", "1")]))]);
        let mut pending = Pending::default();
        assert!(pending.delete_tree(&base, &tree("t")));
        assert!(!pending.exists(&base, &tree("t")));

        pending.put(&base, &tree("t"), b"b", b"2");
        let view = pending.view(&base, &tree("t")).unwrap();
        assert_eq!(collect(view), pairs(&[("b", "2")]));

        let mutations = pending.into_mutations();
        assert_eq!(mutations[0], Mutation::DeleteTree(tree("t")));
        assert_eq!(mutations[1], Mutation::CreateTree(tree("t")));

        let mut committed = base.clone();
        committed.apply(mutations);
        assert_eq!(committed.get(&tree("t")).unwrap(), &data(&[("b", "2")]));
        // The original snapshot is untouched.
        assert_eq!(base.get(&tree("t")).unwrap(), &data(&[("a", "1")]));
    }

    #[test]
    fn apply_copies_only_shared_trees() {
        let mut trees = Trees::from_data([(tree("t"), data(&[("a", "1")]))]);
        let snapshot = trees.clone();
        trees.apply(vec![Mutation::Put {
            tree: tree("t"),
            key: b"b".to_vec(),
            value: b"2".to_vec(),
        }]);
        assert_eq!(snapshot.get(&tree("t")).unwrap().len(), 1);
        assert_eq!(trees.get(&tree("t")).unwrap().len(), 2);
        assert_eq!(trees.record_count(), 2);
    }
}
