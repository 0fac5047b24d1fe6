//! The B-link tree multimap.
//!
//! # Locking
//!
//! - `structure`: shared by every `insert`/`find`/`erase`; taken exclusively
//!   only to rebalance after an underflow and by `verify`. Merges and borrows
//!   therefore never race with a descent.
//! - `root`: guards the root handle. Held briefly to read it, and
//!   exclusively while the root is planted, grown or collapsed.
//! - per-node latches (`LatchTable`): shared to read a node, exclusive to
//!   change it. A thread holds at most one latch while moving sideways or
//!   upward; the only nesting is a parent (or the root lock) followed by a
//!   child below it, so acquisition order is always top-down.
//!
//! A writer that finds its key above a node's high key moves right along the
//! link chain instead of restarting from the root.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::btree::chain::{self, ChainStore, Removal};
use crate::btree::latch::LatchTable;
use crate::btree::node::{KeySlot, Node, NodeError, NodeRecord, NodeView, max_keys, min_keys};
use crate::btree::route::{Route, sentinel};
use crate::btree::verify::TreeStats;
use crate::storage::{
    FileError, Handle, KeyRecord, PagedFile, Record, RecordStore, Storage, StorageError,
    StoreError,
};
use crate::types::Fixed;

/// Requirements on tree keys.
pub trait TreeKey: Fixed + Ord + Clone + std::fmt::Debug + Send + Sync + 'static {}

impl<T: Fixed + Ord + Clone + std::fmt::Debug + Send + Sync + 'static> TreeKey for T {}

/// Requirements on tree values.
pub trait TreeValue: Fixed + Ord + Clone + Send + Sync + 'static {}

impl<T: Fixed + Ord + Clone + Send + Sync + 'static> TreeValue for T {}

/// The three store files of one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    /// Node records.
    pub map: PathBuf,
    /// Key records.
    pub keys: PathBuf,
    /// Value chain entries.
    pub values: PathBuf,
}

impl FileSet {
    /// File names for tree `name` inside `directory`:
    /// `{name}_map_index.dat`, `{name}_map_key.dat` and `{name}_map_val.dat`.
    #[must_use]
    pub fn named(directory: &Path, name: &str) -> Self {
        Self {
            map: directory.join(format!("{name}_map_index.dat")),
            keys: directory.join(format!("{name}_map_key.dat")),
            values: directory.join(format!("{name}_map_val.dat")),
        }
    }
}

/// Storage backends for the node, key and chain stores.
pub struct StorageSet {
    pub nodes: Box<dyn Storage>,
    pub keys: Box<dyn Storage>,
    pub chains: Box<dyn Storage>,
}

pub(crate) type NodeStore<K, const D: usize> = RecordStore<NodeRecord<K, D>>;

/// State of an open tree.
pub(crate) struct OpenTree<K, V, const D: usize> {
    pub(crate) nodes: NodeStore<K, D>,
    pub(crate) keys: RecordStore<KeyRecord<K>>,
    pub(crate) chains: ChainStore<V>,
    pub(crate) root: RwLock<Handle>,
    pub(crate) structure: RwLock<()>,
    pub(crate) latches: LatchTable,
}

/// An on-disk ordered multimap from `K` to many `V`.
///
/// `DEGREE` bounds node fan-out: every node holds at most `DEGREE - 1` keys
/// and every non-root node at least `ceil(DEGREE / 2) - 1`.
///
/// All data operations take `&self`; wrap the tree in an `Arc` to share it
/// between threads.
///
/// ```ignore
/// let mut tree: BLinkTree<u64, u64> = BLinkTree::new();
/// tree.open_named(dir, "orders")?;
/// tree.insert(7, 70)?;
/// tree.insert(7, 71)?;
/// assert_eq!(tree.find(&7)?, vec![70, 71]);
/// tree.close()?;
/// ```
pub struct BLinkTree<K: TreeKey, V: TreeValue, const DEGREE: usize = 128> {
    state: Option<OpenTree<K, V, DEGREE>>,
}

impl<K: TreeKey, V: TreeValue, const DEGREE: usize> BLinkTree<K, V, DEGREE> {
    const VALID_DEGREE: () = assert!(DEGREE >= 6, "degree must be at least 6");

    /// Create a closed tree.
    #[must_use]
    pub const fn new() -> Self {
        let () = Self::VALID_DEGREE;
        Self { state: None }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Open (creating if missing) the node, key and value-chain files.
    pub fn open(&mut self, map: &Path, key: &Path, vlist: &Path) -> Result<(), TreeError> {
        if self.is_open() {
            return Err(TreeError::AlreadyOpen);
        }
        let storages = StorageSet {
            nodes: Box::new(PagedFile::open_or_create(map)?),
            keys: Box::new(PagedFile::open_or_create(key)?),
            chains: Box::new(PagedFile::open_or_create(vlist)?),
        };
        self.open_with(storages)
    }

    pub fn open_files(&mut self, files: &FileSet) -> Result<(), TreeError> {
        self.open(&files.map, &files.keys, &files.values)
    }

    /// Open tree `name` in `directory` using the standard file names.
    pub fn open_named(&mut self, directory: &Path, name: &str) -> Result<(), TreeError> {
        self.open_files(&FileSet::named(directory, name))
    }

    /// Open over arbitrary storage backends.
    pub fn open_with(&mut self, storages: StorageSet) -> Result<(), TreeError> {
        if self.is_open() {
            return Err(TreeError::AlreadyOpen);
        }
        self.state = Some(OpenTree::attach(storages)?);
        Ok(())
    }

    /// Flush and release the files. Closing a closed tree does nothing.
    pub fn close(&mut self) -> Result<(), TreeError> {
        self.close_into_storage().map(drop)
    }

    /// Flush and hand back the storage backends, if the tree was open.
    pub fn close_into_storage(&mut self) -> Result<Option<StorageSet>, TreeError> {
        match self.state.take() {
            Some(tree) => tree.detach().map(Some),
            None => Ok(None),
        }
    }

    /// Persist store metadata and sync every file.
    pub fn flush(&self) -> Result<(), TreeError> {
        self.tree()?.flush()
    }

    /// Add `value` under `key`. Repeated pairs are stored once per insert.
    pub fn insert(&self, key: K, value: V) -> Result<(), TreeError> {
        self.tree()?.insert(key, value)
    }

    /// All values stored under `key`, in ascending order.
    pub fn find(&self, key: &K) -> Result<Vec<V>, TreeError> {
        self.tree()?.find(key)
    }

    /// Remove one occurrence of `(key, value)`. Missing pairs are ignored.
    pub fn erase(&self, key: &K, value: &V) -> Result<(), TreeError> {
        self.tree()?.erase(key, value)
    }

    /// All pairs with `lo <= key <= hi`, ordered by key then value.
    pub fn find_range(&self, lo: &K, hi: &K) -> Result<Vec<(K, V)>, TreeError> {
        self.tree()?.find_range(lo, hi)
    }

    /// Path from the root to the leaf where `key` would be found, using the
    /// first slot `>= key` at each level. See [`Route`].
    pub fn lower_bound_route(&self, key: &K) -> Result<Route, TreeError> {
        let tree = self.tree()?;
        let _structure = tree.structure.read();
        tree.lower_bound_route(key)
    }

    /// Like [`lower_bound_route`](Self::lower_bound_route) with the first
    /// slot `> key`.
    pub fn upper_bound_route(&self, key: &K) -> Result<Route, TreeError> {
        let tree = self.tree()?;
        let _structure = tree.structure.read();
        tree.upper_bound_route(key)
    }

    /// Current root handle, null for an empty tree.
    pub fn root(&self) -> Result<Handle, TreeError> {
        Ok(*self.tree()?.root.read())
    }

    /// Snapshot of one node.
    pub fn node(&self, handle: Handle) -> Result<NodeView<K>, TreeError> {
        let tree = self.tree()?;
        let _structure = tree.structure.read();
        tree.view(handle)
    }

    /// Check every structural invariant and count the tree's contents.
    pub fn verify(&self) -> Result<TreeStats, TreeError> {
        self.tree()?.verify()
    }

    fn tree(&self) -> Result<&OpenTree<K, V, DEGREE>, TreeError> {
        self.state.as_ref().ok_or(TreeError::NotOpen)
    }

    #[cfg(test)]
    pub(crate) fn state_for_tests(&self) -> &OpenTree<K, V, DEGREE> {
        #[allow(clippy::expect_used)]
        self.state.as_ref().expect("tree is open")
    }
}

impl<K: TreeKey, V: TreeValue, const DEGREE: usize> Default for BLinkTree<K, V, DEGREE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TreeKey, V: TreeValue, const DEGREE: usize> Drop for BLinkTree<K, V, DEGREE> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("failed to close tree on drop: {e}");
        }
    }
}

impl<K: TreeKey, V: TreeValue, const D: usize> OpenTree<K, V, D> {
    fn attach(storages: StorageSet) -> Result<Self, TreeError> {
        let expected = u32::try_from(D).map_err(|_| StoreError::RecordTooLarge {
            size: NodeRecord::<K, D>::SIZE,
        })?;
        // Checked before the node store validates its record size, which
        // would otherwise report a different degree as a size mismatch.
        let stored = storages.nodes.superblock().degree;
        if stored != 0 && stored != expected {
            return Err(TreeError::DegreeMismatch { stored, expected });
        }

        let nodes = NodeStore::<K, D>::new(storages.nodes)?;
        let keys = RecordStore::new(storages.keys)?;
        let chains = ChainStore::new(storages.chains)?;
        if stored == 0 {
            nodes.set_degree(expected);
        }

        let root = nodes.root();
        tracing::debug!(
            degree = D,
            %root,
            nodes = nodes.live_records(),
            keys = keys.live_records(),
            values = chains.live_records(),
            "opened tree"
        );

        Ok(Self {
            nodes,
            keys,
            chains,
            root: RwLock::new(root),
            structure: RwLock::new(()),
            latches: LatchTable::new(),
        })
    }

    fn detach(self) -> Result<StorageSet, TreeError> {
        self.flush()?;
        tracing::debug!(root = %*self.root.read(), "closed tree");
        Ok(StorageSet {
            nodes: self.nodes.into_storage(),
            keys: self.keys.into_storage(),
            chains: self.chains.into_storage(),
        })
    }

    fn flush(&self) -> Result<(), TreeError> {
        self.nodes.set_root(*self.root.read());
        self.nodes.flush()?;
        self.keys.flush()?;
        self.chains.flush()?;
        Ok(())
    }

    pub(crate) fn load_node(&self, handle: Handle) -> Result<Node<K>, TreeError> {
        let record = self.nodes.read(handle)?;
        let keys = self
            .keys
            .read_many(&record.keys)?
            .into_iter()
            .map(|record| record.0)
            .collect();
        Ok(Node::from_record(record, keys)?)
    }

    pub(crate) fn store_node(&self, handle: Handle, node: &Node<K>) -> Result<(), TreeError> {
        Self::check_capacity(handle, node)?;
        self.nodes.write(handle, &node.to_record::<D>())?;
        Ok(())
    }

    pub(crate) fn create_node(&self, node: &Node<K>) -> Result<Handle, TreeError> {
        Self::check_capacity(Handle::NULL, node)?;
        Ok(self.nodes.allocate(&node.to_record::<D>())?)
    }

    fn check_capacity(handle: Handle, node: &Node<K>) -> Result<(), TreeError> {
        if node.len() > max_keys(D) {
            return Err(TreeError::corrupted(
                handle,
                format!("node holds {} keys, capacity is {}", node.len(), max_keys(D)),
            ));
        }
        Ok(())
    }

    /// Point `child`'s parent hint at `parent`.
    pub(crate) fn reparent(&self, child: Handle, parent: Handle) -> Result<(), TreeError> {
        let _latch = self.latches.exclusive(child);
        let mut record = self.nodes.read(child)?;
        record.parent = parent;
        self.nodes.write(child, &record)?;
        Ok(())
    }

    pub(crate) fn parent_of(&self, node: Handle) -> Result<Handle, TreeError> {
        let _latch = self.latches.shared(node);
        Ok(self.nodes.read(node)?.parent)
    }

    /// Key count of a node without resolving its keys.
    pub(crate) fn size_of(&self, node: Handle) -> Result<usize, TreeError> {
        let _latch = self.latches.shared(node);
        Ok(self.nodes.read(node)?.keys.len())
    }

    /// Latch the node covering `key`, starting at `start` and moving right
    /// along links. Returns the node's handle, its latch and its contents.
    pub(crate) fn latch_covering<G>(
        &self,
        start: Handle,
        key: &K,
        acquire: impl Fn(&LatchTable, Handle) -> G,
    ) -> Result<(Handle, G, Node<K>), TreeError> {
        let mut current = start;
        loop {
            let latch = acquire(&self.latches, current);
            let node = self.load_node(current)?;
            if node.covers(key) {
                return Ok((current, latch, node));
            }
            if node.link.is_null() {
                return Err(TreeError::corrupted(
                    current,
                    "high key below search key with no right link",
                ));
            }
            tracing::trace!(from = %current, to = %node.link, "moving right");
            current = node.link;
        }
    }

    pub(crate) fn view(&self, handle: Handle) -> Result<NodeView<K>, TreeError> {
        let _latch = self.latches.shared(handle);
        let node = self.load_node(handle)?;
        Ok(NodeView::new(handle, &node))
    }

    fn insert(&self, key: K, value: V) -> Result<(), TreeError> {
        let _structure = self.structure.read();
        loop {
            let route = self.lower_bound_route(&key)?;
            match route.last() {
                Some(step) => return self.insert_at(step.node, key, value),
                None => {
                    if self.plant_root(&key, &value)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Create the first leaf. Returns false if another writer got there first.
    fn plant_root(&self, key: &K, value: &V) -> Result<bool, TreeError> {
        let mut root = self.root.write();
        if !root.is_null() {
            return Ok(false);
        }

        let key_handle = self.keys.allocate(&KeyRecord(key.clone()))?;
        let head = chain::insert_sorted(&self.chains, Handle::NULL, value.clone())?;
        let mut leaf = Node::leaf(Handle::NULL);
        leaf.insert_entry(
            0,
            KeySlot {
                key: key.clone(),
                handle: key_handle,
            },
            head,
        )?;
        let handle = self.create_node(&leaf)?;

        *root = handle;
        self.nodes.set_root(handle);
        tracing::debug!(root = %handle, "planted root leaf");
        Ok(true)
    }

    fn insert_at(&self, start: Handle, key: K, value: V) -> Result<(), TreeError> {
        let (handle, latch, mut leaf) = self.latch_covering(start, &key, LatchTable::exclusive)?;

        let slot = leaf.lower_bound(&key);
        if leaf.find_slot(&key).is_some() {
            let head = leaf.chain(slot)?;
            let new_head = chain::insert_sorted(&self.chains, head, value)?;
            if new_head != head {
                leaf.set_chain(slot, new_head)?;
                self.store_node(handle, &leaf)?;
            }
            return Ok(());
        }

        let key_handle = self.keys.allocate(&KeyRecord(key.clone()))?;
        let head = chain::insert_sorted(&self.chains, Handle::NULL, value)?;
        leaf.insert_entry(
            slot,
            KeySlot {
                key,
                handle: key_handle,
            },
            head,
        )?;

        if leaf.len() <= max_keys(D) {
            return self.store_node(handle, &leaf);
        }
        self.split(handle, leaf, latch)
    }

    fn find(&self, key: &K) -> Result<Vec<V>, TreeError> {
        let _structure = self.structure.read();
        let route = self.lower_bound_route(key)?;
        let Some(step) = route.last() else {
            return Ok(Vec::new());
        };
        if step.slot == sentinel(D) {
            return Ok(Vec::new());
        }

        // The chain is walked under the leaf latch so a concurrent erase of
        // the same key cannot free entries mid-walk.
        let (_, _latch, leaf) = self.latch_covering(step.node, key, LatchTable::shared)?;
        match leaf.find_slot(key) {
            Some(slot) => chain::collect(&self.chains, leaf.chain(slot)?),
            None => Ok(Vec::new()),
        }
    }

    fn erase(&self, key: &K, value: &V) -> Result<(), TreeError> {
        let underflow = {
            let _structure = self.structure.read();
            self.erase_entry(key, value)?
        };
        if underflow {
            let _structure = self.structure.write();
            self.rebalance(key)?;
        }
        Ok(())
    }

    /// Remove one `(key, value)` occurrence. Returns true if the leaf it was
    /// removed from may now need rebalancing.
    fn erase_entry(&self, key: &K, value: &V) -> Result<bool, TreeError> {
        let route = self.lower_bound_route(key)?;
        let Some(step) = route.last() else {
            return Ok(false);
        };
        if step.slot == sentinel(D) {
            return Ok(false);
        }

        let (handle, latch, mut leaf) = self.latch_covering(step.node, key, LatchTable::exclusive)?;
        let Some(slot) = leaf.find_slot(key) else {
            return Ok(false);
        };

        let head = leaf.chain(slot)?;
        let new_head = match chain::remove(&self.chains, head, value)? {
            Removal::NotFound => return Ok(false),
            Removal::Removed { head } => head,
        };

        if !new_head.is_null() {
            if new_head != head {
                leaf.set_chain(slot, new_head)?;
                self.store_node(handle, &leaf)?;
            }
            return Ok(false);
        }

        let (removed, _) = leaf.remove_entry(slot)?;
        self.store_node(handle, &leaf)?;
        self.keys.free(removed.handle)?;
        drop(latch);

        // Read the root only after releasing the leaf latch: root growth
        // holds the root lock while latching nodes.
        let is_root = handle == *self.root.read();
        Ok(if is_root {
            leaf.is_empty()
        } else {
            leaf.len() < min_keys(D)
        })
    }

    fn find_range(&self, lo: &K, hi: &K) -> Result<Vec<(K, V)>, TreeError> {
        let mut pairs = Vec::new();
        if lo > hi {
            return Ok(pairs);
        }

        let _structure = self.structure.read();
        let route = self.lower_bound_route(lo)?;
        let Some(step) = route.last() else {
            return Ok(pairs);
        };

        let mut current = step.node;
        while !current.is_null() {
            let _latch = self.latches.shared(current);
            let leaf = self.load_node(current)?;
            for slot in leaf.lower_bound(lo)..leaf.len() {
                let key = &leaf.keys[slot].key;
                if key > hi {
                    return Ok(pairs);
                }
                for value in chain::collect(&self.chains, leaf.chain(slot)?)? {
                    pairs.push((key.clone(), value));
                }
            }
            if leaf.high_key.as_ref().is_none_or(|high| high >= hi) {
                break;
            }
            current = leaf.link;
        }
        Ok(pairs)
    }
}

/// Errors that can occur in tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// The tree has not been opened, or was closed.
    NotOpen,
    /// `open` was called on an open tree.
    AlreadyOpen,
    /// The node file was written with a different degree.
    DegreeMismatch { stored: u32, expected: u32 },
    /// Opening a store file failed.
    File(FileError),
    /// A record store operation failed.
    Store(StoreError),
    /// A node operation was applied to the wrong kind of node.
    Node(NodeError),
    /// The stored tree violates a structural invariant.
    Corrupted { handle: Handle, reason: String },
}

impl TreeError {
    pub(crate) fn corrupted(handle: Handle, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            handle,
            reason: reason.into(),
        }
    }

    /// Whether the stored data is inconsistent.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        match self {
            Self::Store(e) => e.is_corruption(),
            Self::Node(_) | Self::Corrupted { .. } => true,
            Self::NotOpen | Self::AlreadyOpen | Self::DegreeMismatch { .. } | Self::File(_) => {
                false
            }
        }
    }

    /// The underlying storage failure, if this error is one.
    #[must_use]
    pub const fn storage_error(&self) -> Option<&StorageError> {
        match self {
            Self::Store(StoreError::Storage(e)) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen => write!(f, "tree is not open"),
            Self::AlreadyOpen => write!(f, "tree is already open"),
            Self::DegreeMismatch { stored, expected } => {
                write!(f, "files were written with degree {stored}, expected {expected}")
            }
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Corrupted { handle, reason } => write!(f, "corrupted node {handle}: {reason}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Node(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FileError> for TreeError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<StoreError> for TreeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<NodeError> for TreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}
