//! Range scans across leaves.

use crate::e2e_tests::helpers::*;

type Tree = TestTree<u32, u32, 6>;

#[test]
fn test_range_walks_links_in_order() {
    let tree = Tree::new();
    for key in (0..100).rev() {
        tree.insert(key, key + 1).expect("insert");
        tree.insert(key, key).expect("insert");
    }

    let pairs = tree.find_range(&10, &20).expect("range");
    let expected: Vec<(u32, u32)> = (10..=20).flat_map(|k| [(k, k), (k, k + 1)]).collect();
    assert_eq!(pairs, expected);
}

#[test]
fn test_range_edges() {
    let tree = Tree::new();
    assert!(tree.find_range(&0, &10).expect("empty tree").is_empty());

    for key in (0..50).map(|k| k * 2) {
        tree.insert(key, key).expect("insert");
    }

    assert!(tree.find_range(&5, &5).expect("range").is_empty());
    assert_eq!(tree.find_range(&6, &6).expect("range"), vec![(6, 6)]);
    assert!(tree.find_range(&9, &3).expect("inverted range").is_empty());
    assert_eq!(tree.find_range(&97, &500).expect("tail"), vec![(98, 98)]);
    assert_eq!(tree.find_range(&0, &u32::MAX).expect("all").len(), 50);
}
