//! Many threads sharing one tree.

use std::sync::Arc;
use std::thread;

use crate::btree::BLinkTree;
use crate::e2e_tests::helpers::*;

const THREADS: u32 = 8;
const PER_THREAD: u32 = 300;

type Tree = BLinkTree<u32, u32, 6>;

fn shared_tree() -> Arc<Tree> {
    Arc::new(memory_tree(11))
}

#[test]
fn test_concurrent_inserts_into_shared_leaves() {
    let tree = shared_tree();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                // Interleaved keys so threads split the same leaves.
                for i in 0..PER_THREAD {
                    tree.insert(i * THREADS + t, t).expect("insert");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let stats = tree.verify().expect("verify");
    assert_eq!(stats.keys, u64::from(THREADS * PER_THREAD));
    for key in 0..THREADS * PER_THREAD {
        assert_eq!(tree.find(&key).expect("find"), vec![key % THREADS]);
    }
}

#[test]
fn test_concurrent_duplicate_values_on_one_key() {
    let tree = shared_tree();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..50 {
                    tree.insert(42, t * 100 + i).expect("insert");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let values = tree.find(&42).expect("find");
    assert_eq!(values.len(), (THREADS * 50) as usize);
    assert!(values.is_sorted());
}

#[test]
fn test_readers_see_consistent_values_during_writes() {
    let tree = shared_tree();
    for key in 0..500 {
        tree.insert(key, key).expect("seed insert");
    }

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for key in 500 + t * 500..1000 + t * 500 {
                    tree.insert(key, key).expect("insert");
                }
                for key in (0..500).filter(|k| k % 4 == t) {
                    tree.erase(&key, &key).expect("erase");
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for _ in 0..3 {
                    for key in 0..2500 {
                        let values = tree.find(&key).expect("find");
                        assert!(values.is_empty() || values == [key], "key {key}: {values:?}");
                    }
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().expect("thread");
    }

    let stats = tree.verify().expect("verify");
    assert_eq!(stats.keys, 2000);
    assert!(tree.find(&0).expect("find").is_empty());
    assert_eq!(tree.find(&2499).expect("find"), vec![2499]);
}
