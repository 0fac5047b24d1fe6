//! Whole-tree structural check.

use crate::btree::chain;
use crate::btree::node::{NodeBody, max_keys, min_keys};
use crate::btree::tree::{OpenTree, TreeError, TreeKey, TreeValue};
use crate::storage::Handle;

/// Shape and content counts of a verified tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, 0 for an empty tree.
    pub height: usize,
    pub nodes: u64,
    /// Distinct keys in the leaves.
    pub keys: u64,
    /// Stored `(key, value)` pairs.
    pub values: u64,
}

/// A node expected on the level being checked.
struct Expected<K> {
    handle: Handle,
    parent: Handle,
    /// Exclusive lower bound on the node's keys.
    lower: Option<K>,
    high_key: Option<K>,
}

impl<K: TreeKey, V: TreeValue, const D: usize> OpenTree<K, V, D> {
    /// Walk the tree level by level and check every structural invariant.
    ///
    /// Takes the structure lock exclusively so the tree is quiescent.
    pub(crate) fn verify(&self) -> Result<TreeStats, TreeError> {
        let _structure = self.structure.write();
        let root = *self.root.read();
        let mut stats = TreeStats::default();
        let mut key_records = 0u64;

        let mut level = Vec::new();
        if !root.is_null() {
            level.push(Expected {
                handle: root,
                parent: Handle::NULL,
                lower: None,
                high_key: None,
            });
        }

        while !level.is_empty() {
            stats.height += 1;
            let mut next = Vec::new();
            let mut leaf_level = None;

            for (i, expected) in level.iter().enumerate() {
                let handle = expected.handle;
                let node = self.load_node(handle)?;
                let fail = |reason: String| Err(TreeError::corrupted(handle, reason));
                stats.nodes += 1;
                key_records += node.len() as u64;

                if *leaf_level.get_or_insert(node.is_leaf()) != node.is_leaf() {
                    return fail("leaves and internal nodes share a level".to_string());
                }
                if node.parent != expected.parent {
                    return fail(format!(
                        "parent hint is {}, actual parent is {}",
                        node.parent, expected.parent
                    ));
                }
                if node.high_key != expected.high_key {
                    return fail(format!(
                        "high key is {:?}, parent bounds it at {:?}",
                        node.high_key, expected.high_key
                    ));
                }
                let expected_link = level.get(i + 1).map_or(Handle::NULL, |e| e.handle);
                if node.link != expected_link {
                    return fail(format!(
                        "links to {}, right neighbour is {}",
                        node.link, expected_link
                    ));
                }

                if handle == root {
                    if node.is_empty() {
                        return fail("root holds no keys".to_string());
                    }
                } else if node.len() < min_keys(D) || node.len() > max_keys(D) {
                    return fail(format!(
                        "holds {} keys, allowed {}..={}",
                        node.len(),
                        min_keys(D),
                        max_keys(D)
                    ));
                }

                if !node.keys.windows(2).all(|pair| pair[0].key < pair[1].key) {
                    return fail("keys are not strictly increasing".to_string());
                }
                if let (Some(lower), Some(first)) = (&expected.lower, node.keys.first())
                    && first.key <= *lower
                {
                    return fail(format!("key {:?} is not above {lower:?}", first.key));
                }
                if let (Some(high), Some(last)) = (&node.high_key, node.last_key())
                    && last > high
                {
                    return fail(format!("key {last:?} is above high key {high:?}"));
                }

                match &node.body {
                    NodeBody::Leaf { chains } => {
                        for (slot, &head) in chains.iter().enumerate() {
                            let values = chain::collect(&self.chains, head)?;
                            if values.is_empty() {
                                return fail(format!("key {:?} has no values", node.keys[slot].key));
                            }
                            if !values.is_sorted() {
                                return fail(format!(
                                    "values of key {:?} are out of order",
                                    node.keys[slot].key
                                ));
                            }
                            stats.values += values.len() as u64;
                        }
                        stats.keys += node.len() as u64;
                    }
                    NodeBody::Internal { children } => {
                        for (c, &child) in children.iter().enumerate() {
                            next.push(Expected {
                                handle: child,
                                parent: handle,
                                lower: match c {
                                    0 => expected.lower.clone(),
                                    _ => Some(node.keys[c - 1].key.clone()),
                                },
                                high_key: node
                                    .keys
                                    .get(c)
                                    .map_or_else(|| node.high_key.clone(), |slot| Some(slot.key.clone())),
                            });
                        }
                    }
                }
            }
            level = next;
        }

        for (store, live, reachable) in [
            ("node", self.nodes.live_records(), stats.nodes),
            ("key", self.keys.live_records(), key_records),
            ("chain", self.chains.live_records(), stats.values),
        ] {
            if live != reachable {
                return Err(TreeError::corrupted(
                    root,
                    format!("{store} store holds {live} records, tree reaches {reachable}"),
                ));
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{BLinkTree, StorageSet};
    use crate::simulation::SimulatedStorage;

    fn open() -> BLinkTree<u32, u32, 6> {
        let mut tree = BLinkTree::new();
        tree.open_with(StorageSet {
            nodes: Box::new(SimulatedStorage::new(1)),
            keys: Box::new(SimulatedStorage::new(2)),
            chains: Box::new(SimulatedStorage::new(3)),
        })
        .expect("open tree");
        tree
    }

    #[test]
    fn test_stats_count_keys_and_values() {
        let tree = open();
        for key in 0..40 {
            tree.insert(key, 1).expect("insert");
            tree.insert(key, 2).expect("insert");
        }

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.keys, 40);
        assert_eq!(stats.values, 80);
        assert!(stats.height >= 2);
    }

    #[test]
    fn test_detects_broken_parent_hint() {
        let tree = open();
        for key in 0..10 {
            tree.insert(key, key).expect("insert");
        }
        let root = tree.root().expect("root");
        let child = tree.node(root).expect("root node").children[0];

        let state = tree.state_for_tests();
        state.reparent(child, Handle::NULL).expect("reparent");

        assert!(matches!(tree.verify(), Err(TreeError::Corrupted { .. })));
    }

    #[test]
    fn test_detects_leaked_key_record() {
        let tree = open();
        tree.insert(1, 1).expect("insert");
        tree.state_for_tests()
            .keys
            .allocate(&crate::storage::KeyRecord(9))
            .expect("allocate");

        let error = tree.verify().expect_err("leak should be reported");
        assert!(error.to_string().contains("key store"));
    }
}
