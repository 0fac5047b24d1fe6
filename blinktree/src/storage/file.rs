//! Store file I/O operations.
//!
//! This module handles reading and writing pages to one store file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::io::{Storage, StorageError};
use crate::storage::page::{PAGE_SIZE, PAGE_SIZE_U64, Page, PageId};
use crate::storage::superblock::{Superblock, SuperblockError};

/// A store file handle with low-level page I/O operations.
pub struct PagedFile {
    file: File,
    superblock: Superblock,
}

impl PagedFile {
    /// Create a new store file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        let superblock = Superblock::new();
        file.write_all(superblock.to_page().as_bytes())
            .map_err(FileError::Io)?;
        file.sync_all().map_err(FileError::Io)?;

        tracing::debug!(path = %path.display(), "created store file");

        Ok(Self { file, superblock })
    }

    /// Open an existing store file.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let mut page = Page::new();
        file.read_exact(page.as_bytes_mut()).map_err(FileError::Io)?;
        let superblock = Superblock::from_page(&page).map_err(FileError::Superblock)?;

        let actual_size = file.metadata().map_err(FileError::Io)?.len();
        if actual_size < superblock.file_size {
            return Err(FileError::Truncated {
                expected: superblock.file_size,
                actual: actual_size,
            });
        }

        tracing::debug!(
            path = %path.display(),
            pages = superblock.total_page_count,
            "opened store file"
        );

        Ok(Self { file, superblock })
    }

    /// Open the file if it exists, otherwise create it.
    pub fn open_or_create(path: &Path) -> Result<Self, FileError> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Read a page from the file.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page, FileError> {
        self.check_bounds(page_id)?;

        let mut page = Page::new();
        self.file
            .seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))
            .map_err(FileError::Io)?;
        self.file
            .read_exact(page.as_bytes_mut())
            .map_err(FileError::Io)?;

        Ok(page)
    }

    /// Write a page to the file.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), FileError> {
        self.check_bounds(page_id)?;

        self.file
            .seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))
            .map_err(FileError::Io)?;
        self.file
            .write_all(page.as_bytes())
            .map_err(FileError::Io)?;

        Ok(())
    }

    /// Write the superblock to page 0.
    pub fn write_superblock(&mut self) -> Result<(), FileError> {
        let page = self.superblock.to_page();

        self.file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
        self.file
            .write_all(&page.as_bytes()[..PAGE_SIZE])
            .map_err(FileError::Io)?;

        Ok(())
    }

    /// Allocate new pages at the end of the file.
    ///
    /// Returns the page ID of the first allocated page.
    pub fn allocate_pages(&mut self, count: u64) -> Result<PageId, FileError> {
        let first_new_page = self.superblock.total_page_count;

        let new_total = first_new_page + count;
        let new_size = new_total * PAGE_SIZE_U64;

        self.file.set_len(new_size).map_err(FileError::Io)?;

        self.superblock.total_page_count = new_total;
        self.superblock.file_size = new_size;

        Ok(first_new_page)
    }

    /// Sync all pending writes to disk.
    pub fn sync(&self) -> Result<(), FileError> {
        self.file.sync_all().map_err(FileError::Io)
    }

    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.superblock.total_page_count
    }

    const fn check_bounds(&self, page_id: PageId) -> Result<(), FileError> {
        if page_id >= self.superblock.total_page_count {
            return Err(FileError::PageOutOfBounds {
                page_id,
                total_pages: self.superblock.total_page_count,
            });
        }
        Ok(())
    }
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(std::path::PathBuf),
    /// Superblock error.
    Superblock(SuperblockError),
    /// Page ID out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// The file is shorter than its superblock claims.
    Truncated { expected: u64, actual: u64 },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => {
                write!(
                    f,
                    "page {page_id} out of bounds (total pages: {total_pages})"
                )
            }
            Self::Truncated { expected, actual } => {
                write!(f, "file truncated: expected {expected} bytes, found {actual}")
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            Self::AlreadyExists(_) | Self::PageOutOfBounds { .. } | Self::Truncated { .. } => None,
        }
    }
}

impl From<FileError> for StorageError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(io_err) => Self::Io(io_err),
            FileError::PageOutOfBounds {
                page_id,
                total_pages,
            } => Self::PageOutOfBounds {
                page_id,
                total_pages,
            },
            FileError::AlreadyExists(path) => Self::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("file already exists: {}", path.display()),
            )),
            FileError::Superblock(e) => Self::Superblock(e.to_string()),
            FileError::Truncated { .. } => Self::Superblock(e.to_string()),
        }
    }
}

impl Storage for PagedFile {
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        Self::read_page(self, page_id).map_err(StorageError::from)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        Self::write_page(self, page_id, page).map_err(StorageError::from)
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        Self::sync(self).map_err(StorageError::from)
    }

    fn allocate_pages(&mut self, count: u64) -> Result<PageId, StorageError> {
        Self::allocate_pages(self, count).map_err(StorageError::from)
    }

    fn total_pages(&self) -> u64 {
        Self::total_pages(self)
    }

    fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.superblock
    }

    fn write_superblock(&mut self) -> Result<(), StorageError> {
        Self::write_superblock(self).map_err(StorageError::from)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        {
            let file = PagedFile::create(&path).expect("create file");
            assert_eq!(file.total_pages(), 1);
            assert_eq!(file.superblock.next_handle, 1);
        }

        {
            let file = PagedFile::open(&path).expect("open file");
            assert_eq!(file.total_pages(), 1);
            assert_eq!(file.superblock.next_handle, 1);
        }
    }

    #[test]
    fn test_create_already_exists() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        fs::write(&path, b"existing").expect("write file");

        let result = PagedFile::create(&path);
        assert!(matches!(result, Err(FileError::AlreadyExists(_))));
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        fs::write(&path, vec![0xAB; PAGE_SIZE]).expect("write file");

        let result = PagedFile::open(&path);
        assert!(matches!(result, Err(FileError::Superblock(_))));
    }

    #[test]
    fn test_open_or_create_reuses_existing() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        {
            let mut file = PagedFile::open_or_create(&path).expect("create file");
            file.superblock.root = 9;
            file.write_superblock().expect("write superblock");
            file.sync().expect("sync");
        }

        let file = PagedFile::open_or_create(&path).expect("reopen file");
        assert_eq!(file.superblock.root, 9);
    }

    #[test]
    fn test_allocate_and_write_pages() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        let mut file = PagedFile::create(&path).expect("create file");

        let first_page = file.allocate_pages(5).expect("allocate");
        assert_eq!(first_page, 1);
        assert_eq!(file.total_pages(), 6);

        let mut page = Page::new();
        page.write_bytes(0, b"hello world");
        file.write_page(3, &page).expect("write page");

        let read_page = file.read_page(3).expect("read page");
        assert_eq!(read_page.read_bytes(0, 11), b"hello world");
    }

    #[test]
    fn test_page_out_of_bounds() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        let mut file = PagedFile::create(&path).expect("create file");

        let result = file.read_page(100);
        assert!(matches!(result, Err(FileError::PageOutOfBounds { .. })));
    }

    #[test]
    fn test_page_data_persistence() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.dat");

        {
            let mut file = PagedFile::create(&path).expect("create file");
            file.allocate_pages(2).expect("allocate");

            let mut page = Page::new();
            page.write_u64(100, 0xDEAD_BEEF_CAFE_BABE);
            file.write_page(1, &page).expect("write");
            file.write_superblock().expect("write superblock");
            file.sync().expect("sync");
        }

        {
            let mut file = PagedFile::open(&path).expect("open file");
            let page = file.read_page(1).expect("read");
            assert_eq!(page.read_u64(100), 0xDEAD_BEEF_CAFE_BABE);
        }
    }
}
