//! Node splits on overflow and borrows or merges on underflow.
//!
//! Splits run under the shared structure lock alongside other writers.
//! Underflow repair runs under the exclusive structure lock, so it never
//! meets a concurrent descent.

use crate::btree::latch::{ExclusiveLatch, LatchTable};
use crate::btree::node::{KeySlot, Node, NodeBody, max_keys, min_keys};
use crate::btree::tree::{OpenTree, TreeError, TreeKey, TreeValue};
use crate::storage::{Handle, KeyRecord};

impl<K: TreeKey, V: TreeValue, const D: usize> OpenTree<K, V, D> {
    /// Split the overfull `node` held under `latch`, then install the
    /// separator in its parent, splitting upward as far as needed.
    pub(crate) fn split(
        &self,
        mut handle: Handle,
        mut node: Node<K>,
        mut latch: ExclusiveLatch,
    ) -> Result<(), TreeError> {
        loop {
            let (separator, right) = if node.is_leaf() {
                let right = node.split_leaf()?;
                let key = node
                    .last_key()
                    .cloned()
                    .ok_or_else(|| TreeError::corrupted(handle, "split left an empty leaf"))?;
                let key_handle = self.keys.allocate(&KeyRecord(key.clone()))?;
                (
                    KeySlot {
                        key,
                        handle: key_handle,
                    },
                    right,
                )
            } else {
                node.split_internal()?
            };

            // Children of the new node are re-pointed while the left half is
            // still latched, so no descent can find them under a parent that
            // no longer lists them.
            let right_handle = self.create_node(&right)?;
            for &child in right.children() {
                self.reparent(child, right_handle)?;
            }
            node.link = right_handle;
            self.store_node(handle, &node)?;
            drop(latch);

            tracing::debug!(
                left = %handle,
                right = %right_handle,
                leaf = node.is_leaf(),
                "split node"
            );

            match self.install_separator(handle, node.parent, separator, right_handle)? {
                Some((parent, parent_latch, parent_node)) => {
                    handle = parent;
                    latch = parent_latch;
                    node = parent_node;
                }
                None => return Ok(()),
            }
        }
    }

    /// Add `separator` and `right` to the parent of `left`. Returns the
    /// parent, still latched, if that made it overflow.
    fn install_separator(
        &self,
        left: Handle,
        parent_hint: Handle,
        separator: KeySlot<K>,
        right: Handle,
    ) -> Result<Option<(Handle, ExclusiveLatch, Node<K>)>, TreeError> {
        let mut parent = parent_hint;
        loop {
            if parent.is_null() {
                if self.grow_root(left, &separator, right)? {
                    return Ok(None);
                }
                // `left` stopped being the root after we split it. The
                // writer that grew the tree sets its parent shortly.
                parent = self.parent_of(left)?;
                if parent.is_null() {
                    std::thread::yield_now();
                }
                continue;
            }

            let (parent, latch, mut node) =
                self.latch_covering(parent, &separator.key, LatchTable::exclusive)?;
            let slot = node.upper_bound(&separator.key);
            node.insert_separator(slot, separator, right)?;
            self.reparent(right, parent)?;

            if node.len() <= max_keys(D) {
                self.store_node(parent, &node)?;
                return Ok(None);
            }
            return Ok(Some((parent, latch, node)));
        }
    }

    /// Put a new root above `left` and `right` if `left` is still the root.
    fn grow_root(
        &self,
        left: Handle,
        separator: &KeySlot<K>,
        right: Handle,
    ) -> Result<bool, TreeError> {
        let mut root = self.root.write();
        if *root != left {
            return Ok(false);
        }

        let new_root = self.create_node(&Node::root(left, separator.clone(), right))?;
        self.reparent(left, new_root)?;
        self.reparent(right, new_root)?;
        *root = new_root;
        self.nodes.set_root(new_root);

        tracing::debug!(root = %new_root, "grew tree by one level");
        Ok(true)
    }

    /// Restore minimum occupancy along the path to `key`, bottom-up.
    ///
    /// Caller must hold the structure lock exclusively.
    pub(crate) fn rebalance(&self, key: &K) -> Result<(), TreeError> {
        let route = self.lower_bound_route(key)?;
        let mut level = route.len();

        while level > 0 {
            let handle = route[level - 1].node;
            let node = self.load_node(handle)?;
            if level == 1 {
                return self.shrink_root(handle, &node);
            }
            if node.len() >= min_keys(D) {
                return Ok(());
            }

            let parent_handle = route[level - 2].node;
            let parent = self.load_node(parent_handle)?;
            let pos = parent.child_position(handle).ok_or_else(|| {
                TreeError::corrupted(parent_handle, format!("child {handle} missing from parent"))
            })?;
            let siblings = parent.children();

            if pos > 0 && self.size_of(siblings[pos - 1])? > min_keys(D) {
                self.move_from_left(parent_handle, pos - 1)?;
                continue;
            }
            if pos + 1 < siblings.len() && self.size_of(siblings[pos + 1])? > min_keys(D) {
                self.move_from_right(parent_handle, pos)?;
                continue;
            }

            if pos > 0 {
                self.merge(parent_handle, pos - 1)?;
            } else if pos + 1 < siblings.len() {
                self.merge(parent_handle, pos)?;
            } else {
                return Err(TreeError::corrupted(
                    parent_handle,
                    "non-root internal node with a single child",
                ));
            }
            level -= 1;
        }
        Ok(())
    }

    /// Free an empty root leaf, or replace an internal root with no keys by
    /// its only child.
    fn shrink_root(&self, handle: Handle, node: &Node<K>) -> Result<(), TreeError> {
        if !node.is_empty() {
            return Ok(());
        }

        let new_root = match node.children() {
            [] => Handle::NULL,
            [child] => *child,
            children => {
                return Err(TreeError::corrupted(
                    handle,
                    format!("keyless root has {} children", children.len()),
                ));
            }
        };

        let _latch = self.latches.exclusive(handle);
        if !new_root.is_null() {
            self.reparent(new_root, Handle::NULL)?;
        }
        self.nodes.free(handle)?;
        *self.root.write() = new_root;
        self.nodes.set_root(new_root);

        if new_root.is_null() {
            tracing::debug!(old = %handle, "tree is now empty");
        } else {
            tracing::debug!(old = %handle, root = %new_root, "collapsed root");
        }
        Ok(())
    }

    fn sibling_pair(
        parent_handle: Handle,
        parent: &Node<K>,
        left_pos: usize,
    ) -> Result<(Handle, Handle), TreeError> {
        match parent.children().get(left_pos..left_pos + 2) {
            Some(&[left, right]) => Ok((left, right)),
            _ => Err(TreeError::corrupted(
                parent_handle,
                format!("no sibling pair at slot {left_pos}"),
            )),
        }
    }

    /// Point the separator at `slot` at a new key, rewriting its key record.
    fn replace_separator(&self, parent: &mut Node<K>, slot: usize, key: K) -> Result<(), TreeError> {
        let separator = &mut parent.keys[slot];
        self.keys.write(separator.handle, &KeyRecord(key.clone()))?;
        separator.key = key;
        Ok(())
    }

    /// Fold the right child at `left_pos + 1` into the left child and drop
    /// the separator between them.
    pub(crate) fn merge(&self, parent_handle: Handle, left_pos: usize) -> Result<(), TreeError> {
        let _parent_latch = self.latches.exclusive(parent_handle);
        let mut parent = self.load_node(parent_handle)?;
        let (left_handle, right_handle) = Self::sibling_pair(parent_handle, &parent, left_pos)?;
        let _left_latch = self.latches.exclusive(left_handle);
        let _right_latch = self.latches.exclusive(right_handle);
        let mut left = self.load_node(left_handle)?;
        let right = self.load_node(right_handle)?;

        let (separator, _) = parent.remove_separator(left_pos)?;
        let Node {
            high_key,
            link,
            keys: right_keys,
            body: right_body,
            ..
        } = right;

        match (&mut left.body, right_body) {
            (NodeBody::Leaf { chains }, NodeBody::Leaf { chains: right_chains }) => {
                chains.extend(right_chains);
                left.keys.extend(right_keys);
                self.keys.free(separator.handle)?;
            }
            (NodeBody::Internal { children }, NodeBody::Internal { children: right_children }) => {
                for &child in &right_children {
                    self.reparent(child, left_handle)?;
                }
                children.extend(right_children);
                left.keys.push(separator);
                left.keys.extend(right_keys);
            }
            _ => {
                return Err(TreeError::corrupted(
                    right_handle,
                    "siblings are on different levels",
                ));
            }
        }
        left.high_key = high_key;
        left.link = link;

        self.store_node(left_handle, &left)?;
        self.store_node(parent_handle, &parent)?;
        self.nodes.free(right_handle)?;

        tracing::debug!(left = %left_handle, right = %right_handle, "merged siblings");
        Ok(())
    }

    /// Move the last entry of the left child at `left_pos` to the front of
    /// its right sibling.
    pub(crate) fn move_from_left(&self, parent_handle: Handle, left_pos: usize) -> Result<(), TreeError> {
        let _parent_latch = self.latches.exclusive(parent_handle);
        let mut parent = self.load_node(parent_handle)?;
        let (left_handle, right_handle) = Self::sibling_pair(parent_handle, &parent, left_pos)?;
        let _left_latch = self.latches.exclusive(left_handle);
        let _right_latch = self.latches.exclusive(right_handle);
        let mut left = self.load_node(left_handle)?;
        let mut right = self.load_node(right_handle)?;

        let Some(moved) = left.keys.pop() else {
            return Err(TreeError::corrupted(left_handle, "cannot borrow from an empty node"));
        };

        match (&mut left.body, &mut right.body) {
            (NodeBody::Leaf { chains }, NodeBody::Leaf { chains: right_chains }) => {
                let chain = chains
                    .pop()
                    .ok_or_else(|| TreeError::corrupted(left_handle, "leaf has fewer chains than keys"))?;
                right_chains.insert(0, chain);
                right.keys.insert(0, moved);

                let new_high = left
                    .keys
                    .last()
                    .map(|slot| slot.key.clone())
                    .ok_or_else(|| TreeError::corrupted(left_handle, "borrow emptied the donor"))?;
                self.replace_separator(&mut parent, left_pos, new_high.clone())?;
                left.high_key = Some(new_high);
            }
            (NodeBody::Internal { children }, NodeBody::Internal { children: right_children }) => {
                let child = children
                    .pop()
                    .ok_or_else(|| TreeError::corrupted(left_handle, "internal node has no children"))?;
                let separator = std::mem::replace(&mut parent.keys[left_pos], moved);
                left.high_key = Some(parent.keys[left_pos].key.clone());
                right.keys.insert(0, separator);
                right_children.insert(0, child);
                self.reparent(child, right_handle)?;
            }
            _ => {
                return Err(TreeError::corrupted(
                    right_handle,
                    "siblings are on different levels",
                ));
            }
        }

        self.store_node(left_handle, &left)?;
        self.store_node(right_handle, &right)?;
        self.store_node(parent_handle, &parent)?;

        tracing::debug!(from = %left_handle, to = %right_handle, "borrowed from left sibling");
        Ok(())
    }

    /// Move the first entry of the right child at `left_pos + 1` to the end
    /// of the left child.
    pub(crate) fn move_from_right(&self, parent_handle: Handle, left_pos: usize) -> Result<(), TreeError> {
        let _parent_latch = self.latches.exclusive(parent_handle);
        let mut parent = self.load_node(parent_handle)?;
        let (left_handle, right_handle) = Self::sibling_pair(parent_handle, &parent, left_pos)?;
        let _left_latch = self.latches.exclusive(left_handle);
        let _right_latch = self.latches.exclusive(right_handle);
        let mut left = self.load_node(left_handle)?;
        let mut right = self.load_node(right_handle)?;

        if right.is_empty() {
            return Err(TreeError::corrupted(right_handle, "cannot borrow from an empty node"));
        }
        let moved = right.keys.remove(0);

        match (&mut left.body, &mut right.body) {
            (NodeBody::Leaf { chains }, NodeBody::Leaf { chains: right_chains }) => {
                if right_chains.is_empty() {
                    return Err(TreeError::corrupted(right_handle, "leaf has fewer chains than keys"));
                }
                chains.push(right_chains.remove(0));

                let new_high = moved.key.clone();
                left.keys.push(moved);
                self.replace_separator(&mut parent, left_pos, new_high.clone())?;
                left.high_key = Some(new_high);
            }
            (NodeBody::Internal { children }, NodeBody::Internal { children: right_children }) => {
                if right_children.is_empty() {
                    return Err(TreeError::corrupted(right_handle, "internal node has no children"));
                }
                let child = right_children.remove(0);
                let separator = std::mem::replace(&mut parent.keys[left_pos], moved);
                left.high_key = Some(parent.keys[left_pos].key.clone());
                left.keys.push(separator);
                children.push(child);
                self.reparent(child, left_handle)?;
            }
            _ => {
                return Err(TreeError::corrupted(
                    right_handle,
                    "siblings are on different levels",
                ));
            }
        }

        self.store_node(left_handle, &left)?;
        self.store_node(right_handle, &right)?;
        self.store_node(parent_handle, &parent)?;

        tracing::debug!(from = %right_handle, to = %left_handle, "borrowed from right sibling");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::btree::{BLinkTree, StorageSet};
    use crate::simulation::SimulatedStorage;

    fn tree() -> BLinkTree<u32, u32, 6> {
        let mut tree = BLinkTree::new();
        tree.open_with(StorageSet {
            nodes: Box::new(SimulatedStorage::new(1)),
            keys: Box::new(SimulatedStorage::new(2)),
            chains: Box::new(SimulatedStorage::new(3)),
        })
        .expect("open tree");
        tree
    }

    fn leaf_keys(tree: &BLinkTree<u32, u32, 6>) -> Vec<Vec<u32>> {
        let root = tree.node(tree.root().expect("root")).expect("root node");
        root.children
            .iter()
            .map(|&child| tree.node(child).expect("child").keys)
            .collect()
    }

    #[test]
    fn test_overflow_splits_leaf_and_grows_root() {
        let tree = tree();
        for key in 1..=6 {
            tree.insert(key, key).expect("insert");
        }

        let root = tree.node(tree.root().expect("root")).expect("root node");
        assert!(!root.is_leaf);
        assert_eq!(root.keys, vec![3]);
        assert_eq!(leaf_keys(&tree), vec![vec![1, 2, 3], vec![4, 5, 6]]);

        let left = tree.node(root.children[0]).expect("left");
        assert_eq!(left.high_key, Some(3));
        assert_eq!(left.link, root.children[1]);
        assert_eq!(left.parent, root.handle);
        tree.verify().expect("verify");
    }

    #[test]
    fn test_underflow_borrows_from_left() {
        let tree = tree();
        for key in 1..=8 {
            tree.insert(key, key).expect("insert");
        }
        assert_eq!(leaf_keys(&tree), vec![vec![1, 2, 3], vec![4, 5, 6, 7, 8]]);

        for key in [4, 5, 6, 7] {
            tree.erase(&key, &key).expect("erase");
        }

        assert_eq!(leaf_keys(&tree), vec![vec![1, 2], vec![3, 8]]);
        let root = tree.node(tree.root().expect("root")).expect("root node");
        assert_eq!(root.keys, vec![2]);
        tree.verify().expect("verify");
    }

    #[test]
    fn test_underflow_borrows_from_right() {
        let tree = tree();
        for key in 1..=8 {
            tree.insert(key, key).expect("insert");
        }
        tree.erase(&1, &1).expect("erase");
        tree.erase(&2, &2).expect("erase");

        assert_eq!(leaf_keys(&tree), vec![vec![3, 4], vec![5, 6, 7, 8]]);
        let root = tree.node(tree.root().expect("root")).expect("root node");
        assert_eq!(root.keys, vec![4]);
        tree.verify().expect("verify");
    }

    #[test]
    fn test_merge_collapses_root() {
        let tree = tree();
        for key in 1..=6 {
            tree.insert(key, key).expect("insert");
        }
        for key in [1, 4, 5] {
            tree.erase(&key, &key).expect("erase");
        }

        let root = tree.node(tree.root().expect("root")).expect("root node");
        assert!(root.is_leaf);
        assert_eq!(root.keys, vec![2, 3, 6]);
        assert!(root.parent.is_null());
        assert!(root.high_key.is_none());
        assert!(root.link.is_null());

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.height, 1);
        assert_eq!(stats.nodes, 1);
    }

    #[test]
    fn test_deep_tree_drains_to_empty() {
        let tree = tree();
        for key in 0..200 {
            tree.insert(key, key).expect("insert");
        }
        assert!(tree.verify().expect("verify").height >= 3);

        for key in (0..200).rev().step_by(3) {
            tree.erase(&key, &key).expect("erase");
        }
        tree.verify().expect("verify after partial drain");

        for key in 0..200 {
            tree.erase(&key, &key).expect("erase");
        }
        assert!(tree.root().expect("root").is_null());
        assert_eq!(tree.verify().expect("verify").nodes, 0);
    }
}
