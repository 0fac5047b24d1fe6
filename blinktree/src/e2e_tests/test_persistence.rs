//! Closing, reopening and on-disk failure modes.

use std::io::{Seek, SeekFrom, Write};

use crate::btree::{BLinkTree, FileSet, TreeError};
use crate::e2e_tests::helpers::*;
use crate::storage::PAGE_SIZE_U64;

type Tree = TestTree<u32, u32, 6>;

#[test]
fn test_reopen_reproduces_every_find() {
    let mut tree = Tree::new();
    for key in 0..200 {
        tree.insert(key % 50, key).expect("insert");
    }
    for key in (0..200).step_by(7) {
        tree.erase(&(key % 50), &key).expect("erase");
    }
    let before: Vec<Vec<u32>> = (0..50).map(|k| tree.find(&k).expect("find")).collect();
    let stats_before = tree.verify().expect("verify");

    tree.reopen();

    let after: Vec<Vec<u32>> = (0..50).map(|k| tree.find(&k).expect("find")).collect();
    assert_eq!(after, before);
    assert_eq!(tree.verify().expect("verify"), stats_before);

    tree.insert(1000, 1).expect("insert after reopen");
    assert_eq!(tree.find(&1000).expect("find"), vec![1]);
}

#[test]
fn test_drop_flushes_tree() {
    let test = Tree::new();
    let files = FileSet::named(test.directory(), "dropped");
    {
        let mut tree: BLinkTree<u32, u32, 6> = BLinkTree::new();
        tree.open_files(&files).expect("open");
        for key in 0..30 {
            tree.insert(key, key).expect("insert");
        }
    }

    let mut reader: BLinkTree<u32, u32, 6> = BLinkTree::new();
    reader.open_files(&files).expect("reopen");
    assert_eq!(reader.find(&29).expect("find"), vec![29]);
    assert_eq!(reader.verify().expect("verify").keys, 30);
}

#[test]
fn test_empty_tree_reopens_empty() {
    let mut tree = Tree::new();
    tree.reopen();
    assert!(tree.root().expect("root").is_null());
    assert!(tree.find(&1).expect("find").is_empty());
}

#[test]
fn test_degree_mismatch_is_rejected() {
    let mut tree = Tree::new();
    tree.insert(1, 1).expect("insert");
    tree.close().expect("close");

    let mut wider: BLinkTree<u32, u32, 8> = BLinkTree::new();
    let result = wider.open_named(tree.directory(), "test");
    assert!(matches!(
        result,
        Err(TreeError::DegreeMismatch {
            stored: 6,
            expected: 8
        })
    ));
    assert!(!wider.is_open());
}

#[test]
fn test_corrupted_node_page_is_reported() {
    let mut tree = Tree::new();
    for key in 0..20 {
        tree.insert(key, key).expect("insert");
    }
    tree.close().expect("close");

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(&tree.files().map)
        .expect("open node file");
    file.seek(SeekFrom::Start(PAGE_SIZE_U64 + 64))
        .expect("seek");
    file.write_all(&[0xAB; 16]).expect("write garbage");
    drop(file);

    let directory = tree.directory().to_path_buf();
    tree.open_named(&directory, "test")
        .expect("superblock is intact");
    let error = tree.find(&3).expect_err("corrupt page must not be read");
    assert!(error.is_corruption(), "unexpected error: {error}");
}
