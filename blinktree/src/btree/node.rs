//! B-link tree node types and serialization.
//!
//! A node holds up to `DEGREE - 1` sorted keys. Internal nodes hold one more
//! child handle than keys; leaves hold one value-chain head per key. Every
//! node also carries:
//!
//! - a high key: the inclusive upper bound of the keys it owns (`None` for
//!   the rightmost node of a level, meaning +infinity)
//! - a link to its right sibling on the same level
//! - a parent hint used to walk back up after a split
//!
//! Key bytes live in the key store; a node record stores only the key
//! record handles, so the node record size depends on the degree and the
//! high key size alone.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::{Handle, Record, RecordError, RecordKind, get_u64, put_u64};
use crate::types::Fixed;

/// Largest number of keys a stable node may hold.
#[must_use]
pub const fn max_keys(degree: usize) -> usize {
    degree - 1
}

/// Smallest number of keys a non-root node may hold.
#[must_use]
pub const fn min_keys(degree: usize) -> usize {
    degree.div_ceil(2) - 1
}

/// A key together with the handle of the key record that stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlot<K> {
    pub key: K,
    pub handle: Handle,
}

/// The part of a node that differs between leaves and internal nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    /// `chains[i]` is the head of the value chain for `keys[i]`.
    Leaf { chains: Vec<Handle> },
    /// `children[i]` owns keys in `(keys[i-1], keys[i]]`; the last child is
    /// bounded by the node's high key.
    Internal { children: Vec<Handle> },
}

/// A decoded node with its keys resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<K> {
    pub high_key: Option<K>,
    pub parent: Handle,
    pub link: Handle,
    pub keys: Vec<KeySlot<K>>,
    pub body: NodeBody,
}

impl<K: Ord + Clone> Node<K> {
    /// Create an empty leaf.
    #[must_use]
    pub const fn leaf(parent: Handle) -> Self {
        Self {
            high_key: None,
            parent,
            link: Handle::NULL,
            keys: Vec::new(),
            body: NodeBody::Leaf { chains: Vec::new() },
        }
    }

    /// Create a root with one separator and two children.
    #[must_use]
    pub fn root(left: Handle, separator: KeySlot<K>, right: Handle) -> Self {
        Self {
            high_key: None,
            parent: Handle::NULL,
            link: Handle::NULL,
            keys: vec![separator],
            body: NodeBody::Internal {
                children: vec![left, right],
            },
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf { .. })
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether `key` falls at or below this node's high key.
    #[must_use]
    pub fn covers(&self, key: &K) -> bool {
        self.high_key.as_ref().is_none_or(|high| key <= high)
    }

    /// First slot whose key is `>= key`.
    #[must_use]
    pub fn lower_bound(&self, key: &K) -> usize {
        self.keys.partition_point(|slot| slot.key < *key)
    }

    /// First slot whose key is `> key`.
    #[must_use]
    pub fn upper_bound(&self, key: &K) -> usize {
        self.keys.partition_point(|slot| slot.key <= *key)
    }

    /// Slot holding exactly `key`, if any.
    #[must_use]
    pub fn find_slot(&self, key: &K) -> Option<usize> {
        let slot = self.lower_bound(key);
        (slot < self.keys.len() && self.keys[slot].key == *key).then_some(slot)
    }

    #[must_use]
    pub fn last_key(&self) -> Option<&K> {
        self.keys.last().map(|slot| &slot.key)
    }

    /// Child handles of an internal node, empty for a leaf.
    #[must_use]
    pub fn children(&self) -> &[Handle] {
        match &self.body {
            NodeBody::Internal { children } => children,
            NodeBody::Leaf { .. } => &[],
        }
    }

    /// Index of `child` among this node's children.
    #[must_use]
    pub fn child_position(&self, child: Handle) -> Option<usize> {
        self.children().iter().position(|&c| c == child)
    }

    pub fn chain(&self, slot: usize) -> Result<Handle, NodeError> {
        match &self.body {
            NodeBody::Leaf { chains } => chains.get(slot).copied().ok_or(NodeError::SlotOutOfRange {
                slot,
                len: chains.len(),
            }),
            NodeBody::Internal { .. } => Err(NodeError::WrongNodeType),
        }
    }

    pub fn set_chain(&mut self, slot: usize, head: Handle) -> Result<(), NodeError> {
        let chains = self.chains_mut()?;
        let len = chains.len();
        let entry = chains
            .get_mut(slot)
            .ok_or(NodeError::SlotOutOfRange { slot, len })?;
        *entry = head;
        Ok(())
    }

    /// Insert a key and its chain head into a leaf at `slot`.
    pub fn insert_entry(
        &mut self,
        slot: usize,
        key: KeySlot<K>,
        chain: Handle,
    ) -> Result<(), NodeError> {
        self.chains_mut()?.insert(slot, chain);
        self.keys.insert(slot, key);
        Ok(())
    }

    /// Remove a leaf entry, returning its key slot and chain head.
    pub fn remove_entry(&mut self, slot: usize) -> Result<(KeySlot<K>, Handle), NodeError> {
        let len = self.keys.len();
        if slot >= len {
            return Err(NodeError::SlotOutOfRange { slot, len });
        }
        let chain = self.chains_mut()?.remove(slot);
        Ok((self.keys.remove(slot), chain))
    }

    /// Insert a separator at `slot` with `right` as the child after it.
    pub fn insert_separator(
        &mut self,
        slot: usize,
        separator: KeySlot<K>,
        right: Handle,
    ) -> Result<(), NodeError> {
        self.children_mut()?.insert(slot + 1, right);
        self.keys.insert(slot, separator);
        Ok(())
    }

    /// Remove the separator at `slot` and the child after it.
    pub fn remove_separator(&mut self, slot: usize) -> Result<(KeySlot<K>, Handle), NodeError> {
        let len = self.keys.len();
        if slot >= len {
            return Err(NodeError::SlotOutOfRange { slot, len });
        }
        let child = self.children_mut()?.remove(slot + 1);
        Ok((self.keys.remove(slot), child))
    }

    /// Split an overfull leaf. The left half stays in `self` and its high key
    /// becomes its last key; the returned right half inherits the old high
    /// key and link. The caller links `self` to the right node once it has a
    /// handle.
    pub fn split_leaf(&mut self) -> Result<Self, NodeError> {
        let mid = self.keys.len() / 2;
        let right_chains = self.chains_mut()?.split_off(mid);
        let right_keys = self.keys.split_off(mid);

        let right = Self {
            high_key: self.high_key.take(),
            parent: self.parent,
            link: self.link,
            keys: right_keys,
            body: NodeBody::Leaf {
                chains: right_chains,
            },
        };
        self.high_key = self.last_key().cloned();
        Ok(right)
    }

    /// Split an overfull internal node. The middle key is promoted and
    /// becomes the left half's high key.
    pub fn split_internal(&mut self) -> Result<(KeySlot<K>, Self), NodeError> {
        let mid = self.keys.len() / 2;
        let right_children = self.children_mut()?.split_off(mid + 1);
        let mut right_keys = self.keys.split_off(mid);
        let promoted = right_keys.remove(0);

        let right = Self {
            high_key: self.high_key.take(),
            parent: self.parent,
            link: self.link,
            keys: right_keys,
            body: NodeBody::Internal {
                children: right_children,
            },
        };
        self.high_key = Some(promoted.key.clone());
        Ok((promoted, right))
    }

    pub fn chains_mut(&mut self) -> Result<&mut Vec<Handle>, NodeError> {
        match &mut self.body {
            NodeBody::Leaf { chains } => Ok(chains),
            NodeBody::Internal { .. } => Err(NodeError::WrongNodeType),
        }
    }

    pub fn children_mut(&mut self) -> Result<&mut Vec<Handle>, NodeError> {
        match &mut self.body {
            NodeBody::Internal { children } => Ok(children),
            NodeBody::Leaf { .. } => Err(NodeError::WrongNodeType),
        }
    }

    /// Persisted form of this node.
    #[must_use]
    pub fn to_record<const D: usize>(&self) -> NodeRecord<K, D> {
        let (is_leaf, body) = match &self.body {
            NodeBody::Leaf { chains } => (true, chains.clone()),
            NodeBody::Internal { children } => (false, children.clone()),
        };
        NodeRecord {
            is_leaf,
            high_key: self.high_key.clone(),
            parent: self.parent,
            link: self.link,
            keys: self.keys.iter().map(|slot| slot.handle).collect(),
            body,
        }
    }

    /// Rebuild a node from its record and the decoded keys, in slot order.
    pub fn from_record<const D: usize>(
        record: NodeRecord<K, D>,
        keys: Vec<K>,
    ) -> Result<Self, NodeError> {
        if keys.len() != record.keys.len() {
            return Err(NodeError::KeyCountMismatch {
                expected: record.keys.len(),
                actual: keys.len(),
            });
        }
        let keys = keys
            .into_iter()
            .zip(record.keys)
            .map(|(key, handle)| KeySlot { key, handle })
            .collect();
        let body = if record.is_leaf {
            NodeBody::Leaf {
                chains: record.body,
            }
        } else {
            NodeBody::Internal {
                children: record.body,
            }
        };
        Ok(Self {
            high_key: record.high_key,
            parent: record.parent,
            link: record.link,
            keys,
            body,
        })
    }
}

/// A node as stored in the node file, with key record handles in place of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord<K, const D: usize> {
    pub is_leaf: bool,
    pub high_key: Option<K>,
    pub parent: Handle,
    pub link: Handle,
    /// Key record handles, one per occupied slot.
    pub keys: Vec<Handle>,
    /// Chain heads (leaf, one per key) or children (internal, one more than keys).
    pub body: Vec<Handle>,
}

/// Record header layout:
/// - `is_leaf`: 1 byte
/// - `size`: 2 bytes
/// - `has_high_key`: 1 byte
/// - `parent`: 8 bytes
/// - `link`: 8 bytes
///
/// Total: 20 bytes, followed by the high key, `D - 1` key handles and `D`
/// body handles.
const NODE_HEADER_SIZE: usize = 20;

impl<K, const D: usize> NodeRecord<K, D> {
    const KEYS_OFFSET_WITHOUT_HIGH: usize = NODE_HEADER_SIZE;

    const fn keys_offset(key_size: usize) -> usize {
        Self::KEYS_OFFSET_WITHOUT_HIGH + key_size
    }

    const fn body_offset(key_size: usize) -> usize {
        Self::keys_offset(key_size) + max_keys(D) * 8
    }
}

impl<K: Fixed, const D: usize> Record for NodeRecord<K, D> {
    const KIND: RecordKind = RecordKind::Node;
    const SIZE: usize = NODE_HEADER_SIZE + K::SIZE + max_keys(D) * 8 + D * 8;

    fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        buf[0] = u8::from(self.is_leaf);
        buf[1..3].copy_from_slice(&(self.keys.len() as u16).to_le_bytes());
        buf[3] = u8::from(self.high_key.is_some());
        put_u64(buf, 4, self.parent.get());
        put_u64(buf, 12, self.link.get());
        if let Some(high) = &self.high_key {
            high.encode(&mut buf[NODE_HEADER_SIZE..NODE_HEADER_SIZE + K::SIZE]);
        }
        let keys_at = Self::keys_offset(K::SIZE);
        for (i, handle) in self.keys.iter().enumerate() {
            put_u64(buf, keys_at + i * 8, handle.get());
        }
        let body_at = Self::body_offset(K::SIZE);
        for (i, handle) in self.body.iter().enumerate() {
            put_u64(buf, body_at + i * 8, handle.get());
        }
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let is_leaf = match buf[0] {
            0 => false,
            1 => true,
            other => {
                return Err(RecordError::Malformed(format!(
                    "invalid leaf flag {other}"
                )));
            }
        };
        let size = usize::from(u16::from_le_bytes([buf[1], buf[2]]));
        if size > max_keys(D) {
            return Err(RecordError::Malformed(format!(
                "node size {size} exceeds capacity {}",
                max_keys(D)
            )));
        }
        let high_key = match buf[3] {
            0 => None,
            1 => Some(K::decode(&buf[NODE_HEADER_SIZE..NODE_HEADER_SIZE + K::SIZE])?),
            other => {
                return Err(RecordError::Malformed(format!(
                    "invalid high key flag {other}"
                )));
            }
        };

        let keys_at = Self::keys_offset(K::SIZE);
        let keys = (0..size)
            .map(|i| Handle::new(get_u64(buf, keys_at + i * 8)))
            .collect();
        let body_len = if is_leaf { size } else { size + 1 };
        let body_at = Self::body_offset(K::SIZE);
        let body = (0..body_len)
            .map(|i| Handle::new(get_u64(buf, body_at + i * 8)))
            .collect();

        Ok(Self {
            is_leaf,
            high_key,
            parent: Handle::new(get_u64(buf, 4)),
            link: Handle::new(get_u64(buf, 12)),
            keys,
            body,
        })
    }
}

/// Read-only snapshot of a node for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView<K> {
    pub handle: Handle,
    pub is_leaf: bool,
    pub keys: Vec<K>,
    pub high_key: Option<K>,
    pub parent: Handle,
    pub link: Handle,
    /// Children of an internal node, empty for a leaf.
    pub children: Vec<Handle>,
}

impl<K: Ord + Clone> NodeView<K> {
    #[must_use]
    pub fn new(handle: Handle, node: &Node<K>) -> Self {
        Self {
            handle,
            is_leaf: node.is_leaf(),
            keys: node.keys.iter().map(|slot| slot.key.clone()).collect(),
            high_key: node.high_key.clone(),
            parent: node.parent,
            link: node.link,
            children: node.children().to_vec(),
        }
    }
}

/// Errors from node operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Leaf operation on an internal node or vice versa.
    WrongNodeType,
    /// Slot index past the occupied slots.
    SlotOutOfRange { slot: usize, len: usize },
    /// Decoded key count differs from the record's key handles.
    KeyCountMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongNodeType => write!(f, "wrong node type for operation"),
            Self::SlotOutOfRange { slot, len } => {
                write!(f, "slot {slot} out of range for node of size {len}")
            }
            Self::KeyCountMismatch { expected, actual } => {
                write!(f, "expected {expected} keys, got {actual}")
            }
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(key: u32) -> KeySlot<u32> {
        KeySlot {
            key,
            handle: Handle::new(u64::from(key) + 100),
        }
    }

    fn leaf_with(keys: &[u32]) -> Node<u32> {
        let mut node = Node::leaf(Handle::new(1));
        for (i, &key) in keys.iter().enumerate() {
            node.insert_entry(i, slot(key), Handle::new(u64::from(key) + 500))
                .expect("leaf insert");
        }
        node
    }

    #[test]
    fn test_occupancy_bounds() {
        assert_eq!(max_keys(6), 5);
        assert_eq!(min_keys(6), 2);
        assert_eq!(min_keys(7), 3);
        assert_eq!(min_keys(128), 63);
    }

    #[test]
    fn test_bounds_and_cover() {
        let mut node = leaf_with(&[10, 20, 30]);
        node.high_key = Some(30);

        assert_eq!(node.lower_bound(&20), 1);
        assert_eq!(node.upper_bound(&20), 2);
        assert_eq!(node.lower_bound(&31), 3);
        assert_eq!(node.find_slot(&20), Some(1));
        assert_eq!(node.find_slot(&25), None);
        assert!(node.covers(&30));
        assert!(!node.covers(&31));

        node.high_key = None;
        assert!(node.covers(&u32::MAX));
    }

    #[test]
    fn test_split_leaf_moves_high_key_and_link() {
        let mut left = leaf_with(&[1, 2, 3, 4, 5, 6]);
        left.high_key = Some(9);
        left.link = Handle::new(77);

        let right = left.split_leaf().expect("split");

        assert_eq!(left.keys.iter().map(|s| s.key).collect::<Vec<_>>(), [1, 2, 3]);
        assert_eq!(left.high_key, Some(3));
        assert_eq!(right.keys.iter().map(|s| s.key).collect::<Vec<_>>(), [4, 5, 6]);
        assert_eq!(right.high_key, Some(9));
        assert_eq!(right.link, Handle::new(77));
        assert_eq!(right.chain(0), Ok(Handle::new(504)));
    }

    #[test]
    fn test_split_internal_promotes_middle_key() {
        let mut node = Node {
            high_key: None,
            parent: Handle::NULL,
            link: Handle::NULL,
            keys: (1..=6).map(slot).collect(),
            body: NodeBody::Internal {
                children: (10..=16).map(Handle::new).collect(),
            },
        };

        let (promoted, right) = node.split_internal().expect("split");

        assert_eq!(promoted.key, 4);
        assert_eq!(node.keys.len(), 3);
        assert_eq!(node.children(), &[10, 11, 12, 13].map(Handle::new));
        assert_eq!(node.high_key, Some(4));
        assert_eq!(right.keys.iter().map(|s| s.key).collect::<Vec<_>>(), [5, 6]);
        assert_eq!(right.children(), &[14, 15, 16].map(Handle::new));
        assert_eq!(right.high_key, None);
    }

    #[test]
    fn test_separator_insert_and_remove() {
        let mut root = Node::root(Handle::new(1), slot(10), Handle::new(2));
        root.insert_separator(1, slot(20), Handle::new(3))
            .expect("insert separator");
        assert_eq!(root.children(), &[1, 2, 3].map(Handle::new));
        assert_eq!(root.child_position(Handle::new(3)), Some(2));

        let (removed, child) = root.remove_separator(0).expect("remove separator");
        assert_eq!(removed.key, 10);
        assert_eq!(child, Handle::new(2));
        assert_eq!(root.children(), &[1, 3].map(Handle::new));
    }

    #[test]
    fn test_leaf_ops_reject_internal_node() {
        let mut root = Node::root(Handle::new(1), slot(10), Handle::new(2));
        assert_eq!(root.chain(0), Err(NodeError::WrongNodeType));
        assert!(root.split_leaf().is_err());
    }

    #[test]
    fn test_record_roundtrip() {
        let mut node = leaf_with(&[3, 5]);
        node.high_key = Some(8);
        node.link = Handle::new(9);

        let record: NodeRecord<u32, 6> = node.to_record();
        let mut buf = vec![0u8; NodeRecord::<u32, 6>::SIZE];
        record.encode(&mut buf);
        let decoded = NodeRecord::<u32, 6>::decode(&buf).expect("decode");
        assert_eq!(decoded, record);

        let rebuilt = Node::from_record(decoded, vec![3, 5]).expect("rebuild");
        assert_eq!(rebuilt, node);
    }

    #[test]
    fn test_oversized_record_is_malformed() {
        let mut buf = vec![0u8; NodeRecord::<u32, 6>::SIZE];
        buf[0] = 1;
        buf[1] = 6;
        assert!(matches!(
            NodeRecord::<u32, 6>::decode(&buf),
            Err(RecordError::Malformed(_))
        ));
    }
}
