//! Concurrent B-link tree multimap over three record stores.
//!
//! - `node`: node layout, in-memory edits and the on-disk node record
//! - `chain`: per-key sorted value chains
//! - `latch`: per-node reader-writer latches
//! - `route`: root-to-leaf descent
//! - `balance`: splits, borrows, merges and root changes
//! - `verify`: whole-tree structural check
//! - `tree`: the public [`BLinkTree`] and its lifecycle

mod balance;
mod chain;
mod latch;
mod node;
mod route;
mod tree;
mod verify;

pub use chain::{ChainEntry, ChainStore, Removal};
pub use latch::{ExclusiveLatch, LatchTable, SharedLatch};
pub use node::{KeySlot, Node, NodeBody, NodeError, NodeRecord, NodeView, max_keys, min_keys};
pub use route::{Route, RouteStep, sentinel};
pub use tree::{BLinkTree, FileSet, StorageSet, TreeError, TreeKey, TreeValue};
pub use verify::TreeStats;
