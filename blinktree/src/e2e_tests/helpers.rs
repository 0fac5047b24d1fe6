//! Common helpers for end-to-end tests.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use crate::btree::{BLinkTree, FileSet, NodeView, StorageSet, TreeKey, TreeValue};
use crate::simulation::SimulatedStorage;
use crate::testing::new_test_tree;
use crate::types::InlineStr;

/// Short string values used by the scenario tests.
pub type Text = InlineStr<8>;

/// File-backed tree in its own temp directory, removed on drop.
pub struct TestTree<K: TreeKey, V: TreeValue, const D: usize> {
    pub tree: BLinkTree<K, V, D>,
    directory: PathBuf,
}

impl<K: TreeKey, V: TreeValue, const D: usize> TestTree<K, V, D> {
    /// Create a new open tree with fresh files.
    #[must_use]
    pub fn new() -> Self {
        #[allow(clippy::expect_used)]
        let (tree, directory) = new_test_tree().expect("Failed to create test tree");
        Self { tree, directory }
    }

    /// Close and reopen the same files.
    pub fn reopen(&mut self) {
        #[allow(clippy::expect_used)]
        self.tree.close().expect("Failed to close tree");
        #[allow(clippy::expect_used)]
        self.tree
            .open_named(&self.directory, "test")
            .expect("Failed to reopen tree");
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn files(&self) -> FileSet {
        FileSet::named(&self.directory, "test")
    }
}

impl<K: TreeKey, V: TreeValue, const D: usize> Deref for TestTree<K, V, D> {
    type Target = BLinkTree<K, V, D>;

    fn deref(&self) -> &Self::Target {
        &self.tree
    }
}

impl<K: TreeKey, V: TreeValue, const D: usize> DerefMut for TestTree<K, V, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tree
    }
}

impl<K: TreeKey, V: TreeValue, const D: usize> Drop for TestTree<K, V, D> {
    fn drop(&mut self) {
        let _ = self.tree.close();
        let _ = std::fs::remove_dir_all(&self.directory);
    }
}

/// Open tree over fault-free in-memory storage.
#[must_use]
pub fn memory_tree<K: TreeKey, V: TreeValue, const D: usize>(seed: u64) -> BLinkTree<K, V, D> {
    let mut tree = BLinkTree::new();
    #[allow(clippy::expect_used)]
    tree.open_with(StorageSet {
        nodes: Box::new(SimulatedStorage::new(seed)),
        keys: Box::new(SimulatedStorage::new(seed + 1)),
        chains: Box::new(SimulatedStorage::new(seed + 2)),
    })
    .expect("Failed to open in-memory tree");
    tree
}

#[must_use]
pub fn text(value: &str) -> Text {
    #[allow(clippy::expect_used)]
    Text::new(value).expect("test string fits")
}

/// Every level of the tree, root first, each level read left to right by
/// following links from its leftmost node.
#[must_use]
pub fn levels<K: TreeKey, V: TreeValue, const D: usize>(
    tree: &BLinkTree<K, V, D>,
) -> Vec<Vec<NodeView<K>>> {
    let mut levels = Vec::new();
    #[allow(clippy::expect_used)]
    let mut leftmost = tree.root().expect("root");
    while !leftmost.is_null() {
        let mut level = Vec::new();
        let mut current = leftmost;
        while !current.is_null() {
            #[allow(clippy::expect_used)]
            let view = tree.node(current).expect("node");
            current = view.link;
            level.push(view);
        }
        leftmost = level[0].children.first().copied().unwrap_or_default();
        levels.push(level);
    }
    levels
}

/// Keys of each leaf, left to right.
#[must_use]
pub fn leaf_keys<K: TreeKey, V: TreeValue, const D: usize>(tree: &BLinkTree<K, V, D>) -> Vec<Vec<K>> {
    levels(tree)
        .pop()
        .unwrap_or_default()
        .into_iter()
        .map(|leaf| leaf.keys)
        .collect()
}
