//! Slot layout for fixed-size records.
//!
//! Record pages start at page 1 (after the superblock). Each page holds
//! `slots_per_page` slots of `1 + record_size` bytes: a tag byte followed by
//! the record body. Handle `h` (1-based) lives in slot `h - 1`.
//!
//! Freed slots are chained into a free list: the slot is tagged
//! [`SLOT_FREE`] and its body starts with the handle of the next free slot.
//! The list head lives in the superblock.

// Slot indices are bounded by the page size and always fit in usize.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PageHeader, PageId};
use crate::storage::record::Handle;

/// Slot has never been handed out.
pub const SLOT_UNUSED: u8 = 0;
/// Slot holds a live record.
pub const SLOT_LIVE: u8 = 1;
/// Slot is on the free list.
pub const SLOT_FREE: u8 = 2;

/// First page that holds record slots.
pub const FIRST_RECORD_PAGE: PageId = 1;

/// Bytes a freed slot needs for its next-free pointer.
const FREE_LINK_SIZE: usize = 8;

/// Maps handles to page positions for one record size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    record_size: usize,
    slot_size: usize,
    slots_per_page: u64,
}

impl SlotLayout {
    /// Build the layout for records of `record_size` bytes.
    ///
    /// Returns `None` if a single slot does not fit in a page.
    #[must_use]
    pub const fn new(record_size: usize) -> Option<Self> {
        let body = if record_size > FREE_LINK_SIZE {
            record_size
        } else {
            FREE_LINK_SIZE
        };
        let slot_size = 1 + body;
        if slot_size > PageHeader::USABLE_SPACE {
            return None;
        }
        Some(Self {
            record_size,
            slot_size,
            slots_per_page: (PageHeader::USABLE_SPACE / slot_size) as u64,
        })
    }

    #[must_use]
    pub const fn record_size(&self) -> usize {
        self.record_size
    }

    #[must_use]
    pub const fn slots_per_page(&self) -> u64 {
        self.slots_per_page
    }

    /// Page and byte offset of the slot tag for a non-null handle.
    #[must_use]
    pub const fn locate(&self, handle: Handle) -> (PageId, usize) {
        let index = handle.get() - 1;
        let page_id = FIRST_RECORD_PAGE + index / self.slots_per_page;
        let offset = PageHeader::SIZE + (index % self.slots_per_page) as usize * self.slot_size;
        (page_id, offset)
    }

    /// Number of pages (including the superblock) needed to hold handles
    /// up to and including `handle`.
    #[must_use]
    pub const fn pages_for(&self, handle: Handle) -> u64 {
        self.locate(handle).0 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PAGE_SIZE;

    #[test]
    fn test_small_records_reserve_room_for_free_link() {
        let layout = SlotLayout::new(4).expect("fits");
        assert_eq!(layout.record_size(), 4);
        assert_eq!(layout.slots_per_page(), (PageHeader::USABLE_SPACE / 9) as u64);
    }

    #[test]
    fn test_locate_wraps_to_next_page() {
        let layout = SlotLayout::new(100).expect("fits");
        let per_page = layout.slots_per_page();

        assert_eq!(layout.locate(Handle::new(1)), (1, PageHeader::SIZE));
        assert_eq!(
            layout.locate(Handle::new(2)),
            (1, PageHeader::SIZE + 101)
        );
        assert_eq!(layout.locate(Handle::new(per_page + 1)), (2, PageHeader::SIZE));
        assert_eq!(layout.pages_for(Handle::new(per_page)), 2);
        assert_eq!(layout.pages_for(Handle::new(per_page + 1)), 3);
    }

    #[test]
    fn test_last_slot_stays_inside_page() {
        let layout = SlotLayout::new(333).expect("fits");
        let (_, offset) = layout.locate(Handle::new(layout.slots_per_page()));
        assert!(offset + 1 + 333 <= PAGE_SIZE);
    }

    #[test]
    fn test_oversized_record_rejected() {
        assert!(SlotLayout::new(PAGE_SIZE).is_none());
    }
}
