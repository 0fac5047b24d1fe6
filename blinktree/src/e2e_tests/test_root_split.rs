//! Growing the tree from one level to two and beyond.

use crate::e2e_tests::helpers::*;

type Tree = TestTree<u32, u32, 6>;

#[test]
fn test_root_split_partitions_key_space() {
    let tree = Tree::new();
    for key in 1..=5 {
        tree.insert(key, key).expect("insert");
    }
    assert_eq!(levels(&tree.tree).len(), 1);

    tree.insert(6, 6).expect("insert");

    let levels = levels(&tree.tree);
    assert_eq!(levels.len(), 2);
    let root = &levels[0][0];
    assert_eq!(root.keys.len(), 1);
    assert_eq!(root.children.len(), 2);
    assert!(root.parent.is_null());

    let separator = root.keys[0];
    let (left, right) = (&levels[1][0], &levels[1][1]);
    assert_eq!(left.handle, root.children[0]);
    assert_eq!(right.handle, root.children[1]);
    assert!(left.keys.iter().all(|&k| k <= separator));
    assert!(right.keys.iter().all(|&k| k > separator));

    let mut all: Vec<u32> = left.keys.iter().chain(&right.keys).copied().collect();
    all.sort_unstable();
    assert_eq!(all, (1..=6).collect::<Vec<_>>());

    assert_eq!(left.high_key, Some(separator));
    assert_eq!(left.link, right.handle);
    assert_eq!(right.high_key, None);
    assert!(right.link.is_null());
    assert_eq!(left.parent, root.handle);
    assert_eq!(right.parent, root.handle);
}

#[test]
fn test_many_inserts_grow_several_levels() {
    let tree = Tree::new();
    for key in (0..500).rev() {
        tree.insert(key, key * 2).expect("insert");
    }

    let stats = tree.verify().expect("verify");
    assert!(stats.height >= 4, "height was {}", stats.height);
    assert_eq!(stats.keys, 500);

    for key in 0..500 {
        assert_eq!(tree.find(&key).expect("find"), vec![key * 2]);
    }
    assert_eq!(
        leaf_keys(&tree.tree).concat(),
        (0..500).collect::<Vec<_>>()
    );
}
