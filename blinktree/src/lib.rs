// Life of an operation:
// 1. Read the root handle and descend, moving right along links whenever a
//    node's high key is below the search key
// 2. Latch the covering leaf and edit its value chain
// 3. Inserts: split on overflow and install the separator in the parent,
//    growing a new root when the old one splits
//    Erases: on underflow, borrow from or merge with a sibling under the
//    exclusive structure lock, collapsing the root when it empties
//
// System components:
//  - Paged files with checksummed pages and a superblock
//  - Record stores for nodes, keys and value-chain entries
//  - The tree: routing, latching and rebalancing

pub mod btree;
pub mod config;
mod e2e_tests;
pub mod simulation;
pub mod storage;
#[cfg(test)]
mod testing;
pub mod types;

pub use btree::{BLinkTree, FileSet, StorageSet, TreeError, TreeStats};
