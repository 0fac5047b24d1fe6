//! Route queries and usage errors.

use crate::btree::{BLinkTree, TreeError, sentinel};
use crate::e2e_tests::helpers::*;

type Tree = TestTree<u32, u32, 6>;

#[test]
fn test_empty_route_differs_from_sentinel() {
    let tree = Tree::new();
    assert!(tree.lower_bound_route(&5).expect("route").is_empty());

    tree.insert(1, 1).expect("insert");
    let route = tree.lower_bound_route(&5).expect("route");
    assert_eq!(route.len(), 1);
    assert_eq!(route[0].slot, sentinel(6));
}

#[test]
fn test_route_ends_at_leaf_holding_key() {
    let tree = Tree::new();
    for key in 0..100 {
        tree.insert(key, key).expect("insert");
    }
    let height = tree.verify().expect("verify").height;

    for key in [0, 37, 99] {
        let route = tree.lower_bound_route(&key).expect("route");
        assert_eq!(route.len(), height);
        assert_eq!(route[0].node, tree.root().expect("root"));

        let leaf = tree.node(route[height - 1].node).expect("leaf");
        assert!(leaf.is_leaf);
        assert_eq!(leaf.keys[route[height - 1].slot], key);

        let upper = tree.upper_bound_route(&key).expect("route");
        let last = upper[upper.len() - 1];
        if last.slot != sentinel(6) {
            assert!(tree.node(last.node).expect("leaf").keys[last.slot] > key);
        }
    }
}

#[test]
fn test_closed_tree_rejects_operations() {
    let mut tree: BLinkTree<u32, u32, 6> = BLinkTree::new();
    assert!(matches!(tree.find(&1), Err(TreeError::NotOpen)));
    assert!(matches!(tree.find_range(&1, &2), Err(TreeError::NotOpen)));
    assert!(matches!(tree.lower_bound_route(&1), Err(TreeError::NotOpen)));
    assert!(matches!(tree.verify(), Err(TreeError::NotOpen)));
    tree.close().expect("closing a closed tree is fine");

    let test = Tree::new();
    tree.open_named(test.directory(), "other").expect("open");
    assert!(matches!(
        tree.open_named(test.directory(), "other"),
        Err(TreeError::AlreadyOpen)
    ));
}
