//! Typed record store over paged storage.
//!
//! A `RecordStore<R>` owns one storage backend and hands out [`Handle`]s to
//! fixed-size records of type `R`. Handles stay valid until freed; freed
//! slots are recycled through the free list kept in the superblock.
//!
//! The store serializes access to its storage behind a mutex. Callers that
//! need multi-record consistency (the tree's node latches) layer their own
//! locking on top.

use std::marker::PhantomData;

use parking_lot::Mutex;

use crate::storage::allocator::{SLOT_FREE, SLOT_LIVE, SLOT_UNUSED, SlotLayout};
use crate::storage::io::{Storage, StorageError};
use crate::storage::page::{Page, PageError, PageId, PageType};
use crate::storage::record::{Handle, Record, RecordError};
use crate::storage::superblock::RecordKind;

pub struct RecordStore<R> {
    storage: Mutex<Box<dyn Storage>>,
    layout: SlotLayout,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordStore<R> {
    /// Claim `storage` for records of type `R`.
    ///
    /// Fresh storage is stamped with the record kind and size; storage that
    /// already holds records must match both.
    pub fn new(mut storage: Box<dyn Storage>) -> Result<Self, StoreError> {
        let layout = SlotLayout::new(R::SIZE).ok_or(StoreError::RecordTooLarge { size: R::SIZE })?;
        let record_size =
            u32::try_from(R::SIZE).map_err(|_| StoreError::RecordTooLarge { size: R::SIZE })?;

        let superblock = *storage.superblock();
        match superblock.record_kind {
            RecordKind::Unformatted => {
                let superblock = storage.superblock_mut();
                superblock.record_kind = R::KIND;
                superblock.record_size = record_size;
                storage.write_superblock()?;
                storage.sync()?;
                tracing::debug!(kind = ?R::KIND, record_size, "formatted record store");
            }
            kind if kind != R::KIND => {
                return Err(StoreError::KindMismatch {
                    expected: R::KIND,
                    found: kind,
                });
            }
            _ if superblock.record_size != record_size => {
                return Err(StoreError::RecordSizeMismatch {
                    expected: record_size,
                    found: superblock.record_size,
                });
            }
            _ => {}
        }

        Ok(Self {
            storage: Mutex::new(storage),
            layout,
            _record: PhantomData,
        })
    }

    /// Store `record` in a fresh or recycled slot.
    pub fn allocate(&self, record: &R) -> Result<Handle, StoreError> {
        let mut guard = self.storage.lock();
        let storage: &mut dyn Storage = &mut **guard;

        let free_head = Handle::new(storage.superblock().free_list_head);
        let handle = if free_head.is_null() {
            Handle::new(storage.superblock().next_handle)
        } else {
            check_range(storage, free_head)?;
            free_head
        };

        let (page_id, offset) = self.layout.locate(handle);
        while storage.total_pages() <= page_id {
            let fresh = storage.allocate_pages(1)?;
            storage.write_page(fresh, &Page::records())?;
        }

        let mut page = load_page(storage, page_id)?;
        let next_free = if free_head.is_null() {
            // A stale superblock would hand out a slot that already holds data.
            if page.read_u8(offset) != SLOT_UNUSED {
                return Err(StoreError::FreshSlotTaken { handle });
            }
            None
        } else {
            if page.read_u8(offset) != SLOT_FREE {
                return Err(StoreError::FreeListCorrupt { handle });
            }
            Some(page.read_u64(offset + 1))
        };

        self.encode_into(&mut page, offset, record);
        storage.write_page(page_id, &page)?;

        let superblock = storage.superblock_mut();
        match next_free {
            Some(next) => superblock.free_list_head = next,
            None => superblock.next_handle += 1,
        }
        superblock.live_records += 1;

        Ok(handle)
    }

    pub fn read(&self, handle: Handle) -> Result<R, StoreError> {
        let page = {
            let mut guard = self.storage.lock();
            self.live_page(&mut **guard, handle)?
        };
        self.decode_from(&page, handle)
    }

    /// Read several records, loading each distinct page once per run of
    /// handles that share it.
    pub fn read_many(&self, handles: &[Handle]) -> Result<Vec<R>, StoreError> {
        let mut guard = self.storage.lock();
        let storage: &mut dyn Storage = &mut **guard;

        let mut cached: Option<(PageId, Page)> = None;
        let mut records = Vec::with_capacity(handles.len());
        for &handle in handles {
            check_range(storage, handle)?;
            let (page_id, offset) = self.layout.locate(handle);
            let page = match cached.take() {
                Some((id, page)) if id == page_id => page,
                _ => load_page(storage, page_id)?,
            };
            if page.read_u8(offset) != SLOT_LIVE {
                return Err(StoreError::SlotNotLive { handle });
            }
            records.push(self.decode_from(&page, handle)?);
            cached = Some((page_id, page));
        }
        Ok(records)
    }

    /// Overwrite the live record at `handle`.
    pub fn write(&self, handle: Handle, record: &R) -> Result<(), StoreError> {
        let mut guard = self.storage.lock();
        let storage: &mut dyn Storage = &mut **guard;

        let mut page = self.live_page(storage, handle)?;
        let (page_id, offset) = self.layout.locate(handle);
        self.encode_into(&mut page, offset, record);
        storage.write_page(page_id, &page)?;
        Ok(())
    }

    /// Release the record at `handle`. The handle must not be used again.
    pub fn free(&self, handle: Handle) -> Result<(), StoreError> {
        let mut guard = self.storage.lock();
        let storage: &mut dyn Storage = &mut **guard;

        let mut page = self.live_page(storage, handle)?;
        let (page_id, offset) = self.layout.locate(handle);
        page.write_u8(offset, SLOT_FREE);
        page.write_u64(offset + 1, storage.superblock().free_list_head);
        page.seal();
        storage.write_page(page_id, &page)?;

        let superblock = storage.superblock_mut();
        superblock.free_list_head = handle.get();
        superblock.live_records = superblock.live_records.saturating_sub(1);
        Ok(())
    }

    /// Number of allocated, not yet freed records.
    #[must_use]
    pub fn live_records(&self) -> u64 {
        self.storage.lock().superblock().live_records
    }

    #[must_use]
    pub fn root(&self) -> Handle {
        Handle::new(self.storage.lock().superblock().root)
    }

    pub fn set_root(&self, root: Handle) {
        self.storage.lock().superblock_mut().root = root.get();
    }

    pub fn set_degree(&self, degree: u32) {
        self.storage.lock().superblock_mut().degree = degree;
    }

    /// Persist the superblock and make every write durable.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut storage = self.storage.lock();
        storage.write_superblock()?;
        storage.sync()?;
        Ok(())
    }

    /// Give back the storage backend.
    #[must_use]
    pub fn into_storage(self) -> Box<dyn Storage> {
        self.storage.into_inner()
    }

    fn live_page(&self, storage: &mut dyn Storage, handle: Handle) -> Result<Page, StoreError> {
        check_range(storage, handle)?;
        let (page_id, offset) = self.layout.locate(handle);
        let page = load_page(storage, page_id)?;
        if page.read_u8(offset) != SLOT_LIVE {
            return Err(StoreError::SlotNotLive { handle });
        }
        Ok(page)
    }

    fn encode_into(&self, page: &mut Page, offset: usize, record: &R) {
        page.write_u8(offset, SLOT_LIVE);
        let body = offset + 1;
        record.encode(&mut page.as_bytes_mut()[body..body + self.layout.record_size()]);
        page.seal();
    }

    fn decode_from(&self, page: &Page, handle: Handle) -> Result<R, StoreError> {
        let (_, offset) = self.layout.locate(handle);
        R::decode(page.read_bytes(offset + 1, self.layout.record_size()))
            .map_err(|source| StoreError::Decode { handle, source })
    }
}

fn check_range(storage: &dyn Storage, handle: Handle) -> Result<(), StoreError> {
    if handle.is_null() {
        return Err(StoreError::NullHandle);
    }
    let next = storage.superblock().next_handle;
    if handle.get() >= next {
        return Err(StoreError::HandleOutOfRange { handle, next });
    }
    Ok(())
}

fn load_page(storage: &mut dyn Storage, page_id: PageId) -> Result<Page, StoreError> {
    let page = storage.read_page(page_id)?;
    let header = page
        .verify()
        .map_err(|source| StoreError::Page { page_id, source })?;
    if header.page_type != PageType::Records {
        return Err(StoreError::Page {
            page_id,
            source: PageError::InvalidPageType(header.page_type as u8),
        });
    }
    Ok(page)
}

/// Errors that can occur in record store operations.
#[derive(Debug)]
pub enum StoreError {
    /// The storage backend failed.
    Storage(StorageError),
    /// A record page failed validation.
    Page { page_id: PageId, source: PageError },
    /// The null handle was dereferenced.
    NullHandle,
    /// The handle was never allocated.
    HandleOutOfRange { handle: Handle, next: u64 },
    /// The handle refers to a freed or unused slot.
    SlotNotLive { handle: Handle },
    /// The free list points at a slot that is not free.
    FreeListCorrupt { handle: Handle },
    /// The next never-used handle points at a slot that is in use.
    FreshSlotTaken { handle: Handle },
    /// The storage holds a different kind of record.
    KindMismatch {
        expected: RecordKind,
        found: RecordKind,
    },
    /// The storage was written with a different record size.
    RecordSizeMismatch { expected: u32, found: u32 },
    /// A record does not fit in a page.
    RecordTooLarge { size: usize },
    /// A stored record failed to decode.
    Decode { handle: Handle, source: RecordError },
}

impl StoreError {
    /// Whether this error means the stored data is inconsistent, as opposed
    /// to the backend failing.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Page { .. }
                | Self::NullHandle
                | Self::HandleOutOfRange { .. }
                | Self::SlotNotLive { .. }
                | Self::FreeListCorrupt { .. }
                | Self::FreshSlotTaken { .. }
                | Self::Decode { .. }
        )
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Page { page_id, source } => write!(f, "page {page_id}: {source}"),
            Self::NullHandle => write!(f, "null handle dereferenced"),
            Self::HandleOutOfRange { handle, next } => {
                write!(f, "handle {handle} was never allocated (next is {next})")
            }
            Self::SlotNotLive { handle } => write!(f, "handle {handle} is not live"),
            Self::FreeListCorrupt { handle } => {
                write!(f, "free list points at non-free slot {handle}")
            }
            Self::FreshSlotTaken { handle } => {
                write!(f, "unused handle {handle} points at an occupied slot")
            }
            Self::KindMismatch { expected, found } => {
                write!(f, "store holds {found:?} records, expected {expected:?}")
            }
            Self::RecordSizeMismatch { expected, found } => {
                write!(f, "store record size is {found}, expected {expected}")
            }
            Self::RecordTooLarge { size } => {
                write!(f, "record of {size} bytes does not fit in a page")
            }
            Self::Decode { handle, source } => write!(f, "record {handle}: {source}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Page { source, .. } => Some(source),
            Self::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulatedStorage;
    use crate::storage::PagedFile;
    use crate::storage::record::KeyRecord;
    use tempfile::tempdir;

    type Keys = RecordStore<KeyRecord<u64>>;

    fn memory_store() -> Keys {
        Keys::new(Box::new(SimulatedStorage::new(7))).expect("format store")
    }

    #[test]
    fn test_allocate_read_write() {
        let store = memory_store();
        let a = store.allocate(&KeyRecord(10)).expect("allocate");
        let b = store.allocate(&KeyRecord(20)).expect("allocate");
        assert_ne!(a, b);

        store.write(a, &KeyRecord(11)).expect("write");
        assert_eq!(store.read(a).expect("read"), KeyRecord(11));
        assert_eq!(
            store.read_many(&[b, a]).expect("read many"),
            vec![KeyRecord(20), KeyRecord(11)]
        );
        assert_eq!(store.live_records(), 2);
    }

    #[test]
    fn test_freed_slots_are_recycled() {
        let store = memory_store();
        let a = store.allocate(&KeyRecord(1)).expect("allocate");
        let b = store.allocate(&KeyRecord(2)).expect("allocate");

        store.free(a).expect("free");
        store.free(b).expect("free");
        assert_eq!(store.live_records(), 0);

        // Most recently freed first.
        assert_eq!(store.allocate(&KeyRecord(3)).expect("allocate"), b);
        assert_eq!(store.allocate(&KeyRecord(4)).expect("allocate"), a);
        assert_eq!(store.read(a).expect("read"), KeyRecord(4));
    }

    #[test]
    fn test_freed_and_unknown_handles_rejected() {
        let store = memory_store();
        let a = store.allocate(&KeyRecord(1)).expect("allocate");
        store.free(a).expect("free");

        assert!(matches!(store.read(a), Err(StoreError::SlotNotLive { .. })));
        assert!(matches!(store.free(a), Err(StoreError::SlotNotLive { .. })));
        assert!(matches!(
            store.read(Handle::new(99)),
            Err(StoreError::HandleOutOfRange { .. })
        ));
        assert!(matches!(
            store.read(Handle::NULL),
            Err(StoreError::NullHandle)
        ));
    }

    #[test]
    fn test_stale_next_handle_is_detected() {
        let store = memory_store();
        store.allocate(&KeyRecord(1)).expect("allocate");
        store.allocate(&KeyRecord(2)).expect("allocate");

        let mut storage = store.into_storage();
        storage.superblock_mut().next_handle = 2;
        let store = Keys::new(storage).expect("reopen store");

        assert!(matches!(
            store.allocate(&KeyRecord(3)),
            Err(StoreError::FreshSlotTaken { .. })
        ));
        assert_eq!(store.read(Handle::new(1)).expect("read"), KeyRecord(1));
    }

    #[test]
    fn test_records_span_many_pages() {
        let store = memory_store();
        let handles: Vec<Handle> = (0..3000_u64)
            .map(|i| store.allocate(&KeyRecord(i)).expect("allocate"))
            .collect();

        let records = store.read_many(&handles).expect("read many");
        assert!(records.iter().enumerate().all(|(i, r)| r.0 == i as u64));
    }

    #[test]
    fn test_kind_mismatch_on_reopen() {
        let storage = memory_store().into_storage();
        let result = RecordStore::<crate::btree::ChainEntry<u64>>::new(storage);
        assert!(matches!(result, Err(StoreError::KindMismatch { .. })));
    }

    #[test]
    fn test_file_store_persists_after_flush() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("keys.dat");

        let handle = {
            let file = PagedFile::create(&path).expect("create file");
            let store = Keys::new(Box::new(file)).expect("format store");
            let handle = store.allocate(&KeyRecord(42)).expect("allocate");
            store.set_root(handle);
            store.flush().expect("flush");
            handle
        };

        let store = Keys::new(Box::new(PagedFile::open(&path).expect("open"))).expect("open store");
        assert_eq!(store.root(), handle);
        assert_eq!(store.read(handle).expect("read"), KeyRecord(42));
        assert_eq!(store.live_records(), 1);
    }
}
