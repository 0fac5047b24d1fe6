//! Paged block store.
//!
//! Each of the tree's three files (nodes, keys, value chains) is a paged file
//! of fixed-size records addressed by [`Handle`]s.
//!
//! # File Format
//!
//! - Page 0: Superblock (record kind and size, free list head, live count,
//!   root handle and degree for the node file)
//! - Pages 1-N: Record pages, each an 8-byte checksummed header followed by
//!   tagged record slots
//!
//! # Usage
//!
//! ```ignore
//! use blinktree::storage::{KeyRecord, PagedFile, RecordStore};
//!
//! let file = PagedFile::open_or_create(path)?;
//! let keys = RecordStore::<KeyRecord<u64>>::new(Box::new(file))?;
//!
//! let handle = keys.allocate(&KeyRecord(42))?;
//! assert_eq!(keys.read(handle)?, KeyRecord(42));
//! keys.free(handle)?;
//!
//! keys.flush()?;
//! ```

mod allocator;
mod file;
pub mod io;
mod page;
mod record;
mod store;
mod superblock;

pub use allocator::SlotLayout;
pub use file::{FileError, PagedFile};
pub use io::{Storage, StorageError};
pub use page::{PAGE_SIZE, PAGE_SIZE_U64, Page, PageError, PageHeader, PageId, PageType};
pub(crate) use record::{get_u64, put_u64};
pub use record::{Handle, KeyRecord, Record, RecordError};
pub use store::{RecordStore, StoreError};
pub use superblock::{RecordKind, Superblock, SuperblockError};
