use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::btree::{BLinkTree, TreeError, TreeKey, TreeValue};
use crate::storage::FileError;

static TEST_TREE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh, empty directory under the system temp directory.
///
/// The directory is not removed automatically; callers that care clean it
/// up themselves.
pub fn unique_test_directory() -> std::io::Result<PathBuf> {
    let counter = TEST_TREE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!(
        "blinktree_test_{}_{}",
        std::process::id(),
        counter
    ));

    // Remove if it exists from a previous run
    let _ = std::fs::remove_dir_all(&path);
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

/// Open a new tree named `test` in a unique temp directory.
pub fn new_test_tree<K: TreeKey, V: TreeValue, const D: usize>()
-> Result<(BLinkTree<K, V, D>, PathBuf), TreeError> {
    let directory = unique_test_directory().map_err(FileError::Io)?;
    let mut tree = BLinkTree::new();
    tree.open_named(&directory, "test")?;
    Ok((tree, directory))
}
