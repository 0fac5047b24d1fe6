//! Storage abstraction for deterministic simulation testing.
//!
//! The `Storage` trait abstracts over page-based storage so the record stores
//! run against real files in production and against simulated in-memory
//! storage in tests, where faults can be injected at the page level.

use crate::storage::page::{Page, PageId};
use crate::storage::superblock::Superblock;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Page out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Superblock error.
    Superblock(String),
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => write!(
                f,
                "page {page_id} out of bounds (total pages: {total_pages})"
            ),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Abstraction over page-based storage operations.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_page` returns the last written content for a page
/// - `sync` makes all previous writes durable
/// - `allocate_pages` extends the storage capacity
/// - Superblock changes are persisted on `write_superblock` + `sync`
pub trait Storage: Send {
    /// Read a page from storage.
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError>;

    /// Write a page to storage. The write may be buffered until `sync`.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Sync all pending writes to durable storage.
    fn sync(&mut self) -> Result<(), StorageError>;

    /// Allocate new pages at the end of storage.
    ///
    /// Returns the page ID of the first allocated page.
    fn allocate_pages(&mut self, count: u64) -> Result<PageId, StorageError>;

    /// Get the total number of pages in storage.
    fn total_pages(&self) -> u64;

    fn superblock(&self) -> &Superblock;

    fn superblock_mut(&mut self) -> &mut Superblock;

    /// Write the superblock to storage. The write may be buffered until `sync`.
    fn write_superblock(&mut self) -> Result<(), StorageError>;

    /// The concrete backend, so tests can inspect simulated storage after a
    /// tree hands it back.
    fn as_any(&self) -> &dyn std::any::Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let e = StorageError::PageOutOfBounds {
            page_id: 10,
            total_pages: 5,
        };
        assert!(e.to_string().contains("page 10"));
        assert!(e.to_string().contains("total pages: 5"));

        let e = StorageError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));
    }
}
