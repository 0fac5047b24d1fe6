//! Root-to-leaf descent.

use crate::btree::latch::LatchTable;
use crate::btree::node::NodeBody;
use crate::btree::tree::{OpenTree, TreeError, TreeKey, TreeValue};
use crate::storage::Handle;

/// Slot value recorded at the leaf when no key there qualifies.
///
/// It lies past any real slot index so callers can tell "no match in this
/// leaf" apart from a position.
#[must_use]
pub const fn sentinel(degree: usize) -> usize {
    degree + 1
}

/// One level of a descent: the node visited and the slot chosen in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteStep {
    pub node: Handle,
    pub slot: usize,
}

/// Descent path, root first and leaf last. Empty for an empty tree.
///
/// Move-right hops are collapsed: each level records only the node the
/// search settled on, so there is one step per level. Nothing walks a route
/// back up; splits propagate through parent hints and re-latch the covering
/// node, so the nodes passed over are never needed.
pub type Route = Vec<RouteStep>;

#[derive(Debug, Clone, Copy)]
enum Bound {
    /// First slot with key `>= target`.
    Lower,
    /// First slot with key `> target`.
    Upper,
}

impl<K: TreeKey, V: TreeValue, const D: usize> OpenTree<K, V, D> {
    pub(crate) fn lower_bound_route(&self, key: &K) -> Result<Route, TreeError> {
        self.route(key, Bound::Lower)
    }

    pub(crate) fn upper_bound_route(&self, key: &K) -> Result<Route, TreeError> {
        self.route(key, Bound::Upper)
    }

    fn route(&self, key: &K, bound: Bound) -> Result<Route, TreeError> {
        let mut route = Route::new();
        let mut current = *self.root.read();
        if current.is_null() {
            return Ok(route);
        }

        loop {
            let (handle, latch, node) = self.latch_covering(current, key, LatchTable::shared)?;
            drop(latch);

            let slot = match bound {
                Bound::Lower => node.lower_bound(key),
                Bound::Upper => node.upper_bound(key),
            };

            match &node.body {
                NodeBody::Internal { children } => {
                    let child = children.get(slot).copied().unwrap_or(Handle::NULL);
                    if child.is_null() {
                        return Err(TreeError::corrupted(
                            handle,
                            format!("internal node has no child at slot {slot}"),
                        ));
                    }
                    route.push(RouteStep { node: handle, slot });
                    current = child;
                }
                NodeBody::Leaf { .. } => {
                    let slot = if slot < node.len() { slot } else { sentinel(D) };
                    route.push(RouteStep { node: handle, slot });
                    return Ok(route);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{BLinkTree, StorageSet};
    use crate::simulation::SimulatedStorage;

    fn tree_with(keys: impl IntoIterator<Item = u32>) -> BLinkTree<u32, u32, 6> {
        let mut tree = BLinkTree::new();
        tree.open_with(StorageSet {
            nodes: Box::new(SimulatedStorage::new(1)),
            keys: Box::new(SimulatedStorage::new(2)),
            chains: Box::new(SimulatedStorage::new(3)),
        })
        .expect("open tree");
        for key in keys {
            tree.insert(key, key * 10).expect("insert");
        }
        tree
    }

    #[test]
    fn test_empty_tree_has_empty_route() {
        let tree = tree_with([]);
        assert!(tree.lower_bound_route(&5).expect("route").is_empty());
        assert!(tree.upper_bound_route(&5).expect("route").is_empty());
    }

    #[test]
    fn test_single_leaf_routes() {
        let tree = tree_with([10, 20, 30]);
        let root = tree.root().expect("root");

        assert_eq!(
            tree.lower_bound_route(&20).expect("route"),
            vec![RouteStep { node: root, slot: 1 }]
        );
        assert_eq!(
            tree.upper_bound_route(&20).expect("route"),
            vec![RouteStep { node: root, slot: 2 }]
        );
        assert_eq!(
            tree.lower_bound_route(&35).expect("route"),
            vec![RouteStep {
                node: root,
                slot: sentinel(6)
            }]
        );
    }

    #[test]
    fn test_route_has_one_step_per_level() {
        let tree = tree_with(1..=6);
        let root = tree.root().expect("root");
        let root_view = tree.node(root).expect("root node");
        assert_eq!(root_view.keys, vec![3]);

        let route = tree.lower_bound_route(&3).expect("route");
        assert_eq!(route.len(), 2);
        assert_eq!(route[0], RouteStep { node: root, slot: 0 });
        assert_eq!(route[1].node, root_view.children[0]);
        assert_eq!(route[1].slot, 2);

        let route = tree.upper_bound_route(&3).expect("route");
        assert_eq!(route[0], RouteStep { node: root, slot: 1 });
        assert_eq!(route[1].node, root_view.children[1]);
        assert_eq!(route[1].slot, 0);
    }

    #[test]
    fn test_descent_follows_link_before_separator_is_installed() {
        let tree = tree_with(1..=8);
        let root = tree.root().expect("root");
        let leaf = tree.node(root).expect("root node").children[1];
        assert_eq!(tree.node(leaf).expect("leaf").keys, vec![4, 5, 6, 7, 8]);

        // Split the right leaf the way a writer does, but stop before the
        // parent learns about the new node.
        let state = tree.state_for_tests();
        let mut left = state.load_node(leaf).expect("load leaf");
        let right = left.split_leaf().expect("split leaf");
        let right_handle = state.create_node(&right).expect("create node");
        left.link = right_handle;
        state.store_node(leaf, &left).expect("store leaf");

        assert_eq!(tree.node(root).expect("root node").keys, vec![3]);
        assert_eq!(tree.node(leaf).expect("leaf").high_key, Some(5));

        for key in 1..=8 {
            assert_eq!(tree.find(&key).expect("find"), vec![key * 10], "key {key}");
        }
        assert_eq!(tree.find_range(&1, &8).expect("range").len(), 8);

        assert_eq!(
            tree.lower_bound_route(&8).expect("route"),
            vec![
                RouteStep { node: root, slot: 1 },
                RouteStep {
                    node: right_handle,
                    slot: 2
                },
            ]
        );
        assert_eq!(
            tree.lower_bound_route(&5).expect("route"),
            vec![
                RouteStep { node: root, slot: 1 },
                RouteStep { node: leaf, slot: 1 },
            ]
        );

        // Writers land on the moved node too.
        tree.insert(7, 71).expect("insert");
        assert_eq!(tree.find(&7).expect("find"), vec![70, 71]);
        assert_eq!(tree.node(right_handle).expect("right").keys, vec![6, 7, 8]);
    }
}
