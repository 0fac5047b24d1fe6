//! Superblock structure and serialization.
//!
//! The superblock occupies page 0 of every store file. It records which kind
//! of record the file holds, the slot allocation state, and (for the node
//! file) the tree root and degree.

// PAGE_SIZE is a compile-time constant that fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PAGE_SIZE, Page, PageId};

/// Magic number identifying a blinktree store file: "BLNKTREE"
pub const MAGIC: [u8; 8] = *b"BLNKTREE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Page size as u32 for storage in superblock.
const PAGE_SIZE_U32: u32 = PAGE_SIZE as u32;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const PAGE_SIZE: usize = 12;
    pub const RECORD_KIND: usize = 16;
    pub const RECORD_SIZE: usize = 20;
    pub const FILE_SIZE: usize = 24;
    pub const TOTAL_PAGE_COUNT: usize = 32;
    pub const FREE_LIST_HEAD: usize = 40;
    pub const NEXT_HANDLE: usize = 48;
    pub const LIVE_RECORDS: usize = 56;
    pub const ROOT: usize = 64;
    pub const DEGREE: usize = 72;
    pub const CHECKSUM: usize = 76;
    // 80-8191: reserved
}

/// What a store file holds. A fresh file is `Unformatted` until a
/// record store claims it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Unformatted = 0,
    Node = 1,
    Key = 2,
    Chain = 3,
}

impl TryFrom<u8> for RecordKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unformatted),
            1 => Ok(Self::Node),
            2 => Ok(Self::Key),
            3 => Ok(Self::Chain),
            _ => Err(value),
        }
    }
}

/// The superblock contains all metadata about a store file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// Page size in bytes (should always be `PAGE_SIZE`).
    pub page_size: u32,
    /// Kind of record stored in this file.
    pub record_kind: RecordKind,
    /// Encoded size of one record in bytes.
    pub record_size: u32,
    /// Total file size in bytes.
    pub file_size: u64,
    /// Total number of pages in the file.
    pub total_page_count: u64,
    /// Most recently freed slot, 0 when the free list is empty.
    pub free_list_head: u64,
    /// First handle that has never been handed out.
    pub next_handle: u64,
    /// Number of allocated, not yet freed records.
    pub live_records: u64,
    /// Root node handle (node file only), 0 for an empty tree.
    pub root: u64,
    /// Tree degree the node file was written with (node file only).
    pub degree: u32,
}

impl Superblock {
    /// Create a new superblock with default values for a fresh file.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE_U32,
            record_kind: RecordKind::Unformatted,
            record_size: 0,
            file_size: PAGE_SIZE as u64, // Initially just the superblock
            total_page_count: 1,
            free_list_head: 0,
            next_handle: 1,
            live_records: 0,
            root: 0,
            degree: 0,
        }
    }

    /// Serialize the superblock to a page.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new();

        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, self.format_version);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u8(offsets::RECORD_KIND, self.record_kind as u8);
        page.write_u32(offsets::RECORD_SIZE, self.record_size);
        page.write_u64(offsets::FILE_SIZE, self.file_size);
        page.write_u64(offsets::TOTAL_PAGE_COUNT, self.total_page_count);
        page.write_u64(offsets::FREE_LIST_HEAD, self.free_list_head);
        page.write_u64(offsets::NEXT_HANDLE, self.next_handle);
        page.write_u64(offsets::LIVE_RECORDS, self.live_records);
        page.write_u64(offsets::ROOT, self.root);
        page.write_u32(offsets::DEGREE, self.degree);
        let checksum = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        page.write_u32(offsets::CHECKSUM, checksum);

        page
    }

    /// Deserialize a superblock from a page.
    pub fn from_page(page: &Page) -> Result<Self, SuperblockError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size != PAGE_SIZE_U32 {
            return Err(SuperblockError::InvalidPageSize(page_size));
        }

        let stored = page.read_u32(offsets::CHECKSUM);
        let actual = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        if stored != actual {
            return Err(SuperblockError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let record_kind = RecordKind::try_from(page.read_u8(offsets::RECORD_KIND))
            .map_err(SuperblockError::InvalidRecordKind)?;

        Ok(Self {
            format_version,
            page_size,
            record_kind,
            record_size: page.read_u32(offsets::RECORD_SIZE),
            file_size: page.read_u64(offsets::FILE_SIZE),
            total_page_count: page.read_u64(offsets::TOTAL_PAGE_COUNT),
            free_list_head: page.read_u64(offsets::FREE_LIST_HEAD),
            next_handle: page.read_u64(offsets::NEXT_HANDLE),
            live_records: page.read_u64(offsets::LIVE_RECORDS),
            root: page.read_u64(offsets::ROOT),
            degree: page.read_u32(offsets::DEGREE),
        })
    }

    /// Page count as a page id bound.
    #[must_use]
    pub const fn page_limit(&self) -> PageId {
        self.total_page_count
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when reading a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Invalid page size.
    InvalidPageSize(u32),
    /// Unknown record kind byte.
    InvalidRecordKind(u8),
    /// Stored checksum does not match the superblock fields.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidPageSize(s) => write!(f, "invalid page size: {s}"),
            Self::InvalidRecordKind(k) => write!(f, "invalid record kind: {k}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(
                    f,
                    "superblock checksum mismatch: expected {expected}, got {actual}"
                )
            }
        }
    }
}

impl std::error::Error for SuperblockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_roundtrip() {
        let mut sb = Superblock::new();
        sb.record_kind = RecordKind::Node;
        sb.record_size = 2100;
        sb.file_size = 1024 * 1024;
        sb.total_page_count = 128;
        sb.free_list_head = 15;
        sb.next_handle = 400;
        sb.live_records = 385;
        sb.root = 7;
        sb.degree = 128;

        let restored = Superblock::from_page(&sb.to_page()).expect("should parse");

        assert_eq!(restored, sb);
    }

    #[test]
    fn test_superblock_invalid_magic() {
        let mut page = Page::new();
        page.write_bytes(0, b"BADMAGIC");

        let result = Superblock::from_page(&page);
        assert!(matches!(result, Err(SuperblockError::InvalidMagic(_))));
    }

    #[test]
    fn test_superblock_detects_field_corruption() {
        let mut page = Superblock::new().to_page();
        page.write_u64(offsets::ROOT, 99);

        let result = Superblock::from_page(&page);
        assert!(matches!(
            result,
            Err(SuperblockError::ChecksumMismatch { .. })
        ));
    }
}
