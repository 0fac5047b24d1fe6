//! Borrowing from siblings, merging and root collapse.

use crate::btree::min_keys;
use crate::e2e_tests::helpers::*;

type Tree = TestTree<u32, u32, 6>;

fn filled(keys: impl IntoIterator<Item = u32>) -> Tree {
    let tree = Tree::new();
    for key in keys {
        tree.insert(key, key).expect("insert");
    }
    tree
}

#[test]
fn test_leaf_underflow_borrows_from_surplus_left_sibling() {
    let tree = filled(1..=8);
    assert_eq!(leaf_keys(&tree.tree), vec![vec![1, 2, 3], vec![4, 5, 6, 7, 8]]);
    let nodes_before = tree.verify().expect("verify").nodes;

    for key in [4, 5, 6, 7] {
        tree.erase(&key, &key).expect("erase");
    }

    // Same node count: the right leaf borrowed instead of merging.
    let stats = tree.verify().expect("verify");
    assert_eq!(stats.nodes, nodes_before);

    let leaves = leaf_keys(&tree.tree);
    assert_eq!(leaves, vec![vec![1, 2], vec![3, 8]]);
    for leaf in &leaves {
        assert!(leaf.len() >= min_keys(6) && leaf.len() <= 5);
    }
    let levels = levels(&tree.tree);
    assert_eq!(levels[0][0].keys, vec![2]);
    assert_eq!(levels[1][0].high_key, Some(2));
}

#[test]
fn test_merge_without_surplus_collapses_root() {
    let tree = filled(1..=6);
    for key in [1, 4, 5] {
        tree.erase(&key, &key).expect("erase");
    }

    let levels = levels(&tree.tree);
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0][0].keys, vec![2, 3, 6]);
    assert!(levels[0][0].is_leaf);

    let stats = tree.verify().expect("verify");
    assert_eq!((stats.height, stats.nodes, stats.keys), (1, 1, 3));
}

#[test]
fn test_internal_levels_rebalance() {
    let tree = filled(0..300);
    let height = tree.verify().expect("verify").height;
    assert!(height >= 3);

    // Clear a contiguous block so whole subtrees underflow.
    for key in 40..260 {
        tree.erase(&key, &key).expect("erase");
        if key % 20 == 0 {
            tree.verify().expect("verify during drain");
        }
    }

    let stats = tree.verify().expect("verify");
    assert_eq!(stats.keys, 80);
    assert!(stats.height <= height);
    let remaining: Vec<u32> = (0..40).chain(260..300).collect();
    assert_eq!(leaf_keys(&tree.tree).concat(), remaining);
}

#[test]
fn test_freed_records_are_reused() {
    let tree = filled(0..100);
    let size_before = std::fs::metadata(&tree.files().map)
        .expect("metadata")
        .len();

    for round in 0..5 {
        for key in 0..100 {
            tree.erase(&key, &key).expect("erase");
        }
        assert!(tree.root().expect("root").is_null(), "round {round}");
        for key in 0..100 {
            tree.insert(key, key).expect("insert");
        }
    }
    tree.flush().expect("flush");

    let size_after = std::fs::metadata(&tree.files().map)
        .expect("metadata")
        .len();
    assert_eq!(size_after, size_before);
}
