//! Value chains: the singly linked list of values owned by one leaf key.
//!
//! Chains are kept in ascending value order. Equal values keep insertion
//! order, so a repeated `(key, value)` pair appears once per insert. Every
//! walk is bounded by the store's live record count so a cycle surfaces as
//! corruption instead of a hang.

use crate::btree::tree::TreeError;
use crate::storage::{Handle, Record, RecordError, RecordKind, RecordStore, get_u64, put_u64};
use crate::types::Fixed;

/// One entry of a value chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry<V> {
    pub value: V,
    pub next: Handle,
}

impl<V: Fixed> Record for ChainEntry<V> {
    const KIND: RecordKind = RecordKind::Chain;
    const SIZE: usize = 8 + V::SIZE;

    fn encode(&self, buf: &mut [u8]) {
        put_u64(buf, 0, self.next.get());
        self.value.encode(&mut buf[8..]);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        Ok(Self {
            next: Handle::new(get_u64(buf, 0)),
            value: V::decode(&buf[8..])?,
        })
    }
}

pub type ChainStore<V> = RecordStore<ChainEntry<V>>;

/// Outcome of removing a value from a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The value was not in the chain.
    NotFound,
    /// One occurrence was unlinked and freed; `head` is the new head, null
    /// if the chain is now empty.
    Removed { head: Handle },
}

/// Bounds chain walks by the number of records the store can possibly hold.
struct WalkGuard {
    steps: u64,
    limit: u64,
}

impl WalkGuard {
    fn new<V: Fixed>(store: &ChainStore<V>) -> Self {
        Self {
            steps: 0,
            limit: store.live_records(),
        }
    }

    fn step(&mut self, at: Handle) -> Result<(), TreeError> {
        self.steps += 1;
        if self.steps > self.limit {
            return Err(TreeError::Corrupted {
                handle: at,
                reason: "value chain is longer than the chain store".to_string(),
            });
        }
        Ok(())
    }
}

/// All values of the chain starting at `head`, in chain order.
pub fn collect<V: Fixed>(store: &ChainStore<V>, head: Handle) -> Result<Vec<V>, TreeError> {
    let mut guard = WalkGuard::new(store);
    let mut values = Vec::new();
    let mut current = head;
    while !current.is_null() {
        guard.step(current)?;
        let entry = store.read(current)?;
        values.push(entry.value);
        current = entry.next;
    }
    Ok(values)
}

/// Insert `value` after every entry with a value `<=` it. Returns the
/// (possibly new) head.
pub fn insert_sorted<V: Fixed + Ord>(
    store: &ChainStore<V>,
    head: Handle,
    value: V,
) -> Result<Handle, TreeError> {
    if head.is_null() {
        return Ok(store.allocate(&ChainEntry {
            value,
            next: Handle::NULL,
        })?);
    }

    let mut entry = store.read(head)?;
    if value < entry.value {
        return Ok(store.allocate(&ChainEntry { value, next: head })?);
    }

    let mut guard = WalkGuard::new(store);
    let mut current = head;
    while !entry.next.is_null() {
        guard.step(entry.next)?;
        let next = store.read(entry.next)?;
        if value < next.value {
            break;
        }
        current = entry.next;
        entry = next;
    }

    let inserted = store.allocate(&ChainEntry {
        value,
        next: entry.next,
    })?;
    entry.next = inserted;
    store.write(current, &entry)?;
    Ok(head)
}

/// Unlink and free the first entry equal to `value`.
pub fn remove<V: Fixed + Ord>(
    store: &ChainStore<V>,
    head: Handle,
    value: &V,
) -> Result<Removal, TreeError> {
    if head.is_null() {
        return Ok(Removal::NotFound);
    }

    let first = store.read(head)?;
    if first.value == *value {
        store.free(head)?;
        return Ok(Removal::Removed { head: first.next });
    }

    let mut guard = WalkGuard::new(store);
    let mut previous = head;
    let mut previous_entry = first;
    loop {
        let current = previous_entry.next;
        if current.is_null() {
            return Ok(Removal::NotFound);
        }
        guard.step(current)?;
        let entry = store.read(current)?;
        if entry.value == *value {
            previous_entry.next = entry.next;
            store.write(previous, &previous_entry)?;
            store.free(current)?;
            return Ok(Removal::Removed { head });
        }
        if entry.value > *value {
            return Ok(Removal::NotFound);
        }
        previous = current;
        previous_entry = entry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulatedStorage;

    fn store() -> ChainStore<u32> {
        ChainStore::new(Box::new(SimulatedStorage::new(3))).expect("format store")
    }

    fn build(store: &ChainStore<u32>, values: &[u32]) -> Handle {
        values.iter().fold(Handle::NULL, |head, &value| {
            insert_sorted(store, head, value).expect("insert")
        })
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let store = store();
        let head = build(&store, &[5, 1, 3, 9, 3]);

        assert_eq!(collect(&store, head).expect("collect"), [1, 3, 3, 5, 9]);
        assert_eq!(store.live_records(), 5);
    }

    #[test]
    fn test_remove_head_middle_and_missing() {
        let store = store();
        let head = build(&store, &[1, 2, 2, 4]);

        let Removal::Removed { head } = remove(&store, head, &1).expect("remove head") else {
            panic!("head value should be removed");
        };
        assert_eq!(collect(&store, head).expect("collect"), [2, 2, 4]);

        let Removal::Removed { head } = remove(&store, head, &2).expect("remove one") else {
            panic!("duplicate value should be removed once");
        };
        assert_eq!(collect(&store, head).expect("collect"), [2, 4]);

        assert_eq!(remove(&store, head, &3).expect("remove missing"), Removal::NotFound);
        assert_eq!(store.live_records(), 2);
    }

    #[test]
    fn test_removing_last_value_empties_chain() {
        let store = store();
        let head = build(&store, &[7]);

        assert_eq!(
            remove(&store, head, &7).expect("remove"),
            Removal::Removed { head: Handle::NULL }
        );
        assert_eq!(store.live_records(), 0);
    }

    #[test]
    fn test_cycle_is_reported_as_corruption() {
        let store = store();
        let head = build(&store, &[1, 2]);
        let second = store.read(head).expect("read").next;
        store
            .write(
                second,
                &ChainEntry {
                    value: 2,
                    next: head,
                },
            )
            .expect("write");

        assert!(matches!(
            collect(&store, head),
            Err(TreeError::Corrupted { .. })
        ));
    }
}
