//! Multimap behaviour at degree 6, through a split.

use crate::e2e_tests::helpers::*;

type Tree = TestTree<u32, Text, 6>;

#[test]
fn test_values_survive_leaf_split_and_erase_one_at_a_time() {
    let tree = Tree::new();

    for (key, value) in [(1, "a"), (1, "b"), (2, "c"), (3, "d"), (4, "e"), (5, "f"), (6, "g")] {
        tree.insert(key, text(value)).expect("insert");
    }

    let root = tree.node(tree.root().expect("root")).expect("root node");
    assert!(!root.is_leaf, "six distinct keys should split the root leaf");

    assert_eq!(tree.find(&1).expect("find"), vec![text("a"), text("b")]);

    tree.erase(&1, &text("a")).expect("erase a");
    assert_eq!(tree.find(&1).expect("find"), vec![text("b")]);

    tree.erase(&1, &text("b")).expect("erase b");
    assert!(tree.find(&1).expect("find").is_empty());
    assert!(!leaf_keys(&tree.tree).concat().contains(&1));

    tree.verify().expect("verify");
}

#[test]
fn test_erase_removes_exactly_one_occurrence() {
    let tree = Tree::new();
    for _ in 0..3 {
        tree.insert(7, text("x")).expect("insert");
    }
    tree.insert(7, text("w")).expect("insert");

    tree.erase(&7, &text("x")).expect("erase");
    assert_eq!(
        tree.find(&7).expect("find"),
        vec![text("w"), text("x"), text("x")]
    );

    tree.erase(&7, &text("x")).expect("erase");
    tree.erase(&7, &text("x")).expect("erase");
    tree.erase(&7, &text("x")).expect("erase after removal is a no-op");
    assert_eq!(tree.find(&7).expect("find"), vec![text("w")]);

    let stats = tree.verify().expect("verify");
    assert_eq!((stats.keys, stats.values), (1, 1));
}

#[test]
fn test_values_are_returned_in_ascending_order() {
    let tree = Tree::new();
    for value in ["pear", "apple", "fig", "kiwi", "date"] {
        tree.insert(3, text(value)).expect("insert");
    }

    let values: Vec<String> = tree
        .find(&3)
        .expect("find")
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(values, ["apple", "date", "fig", "kiwi", "pear"]);
}
