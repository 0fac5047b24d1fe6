//! Simulated in-memory storage for deterministic testing.
//!
//! This module provides an in-memory implementation of the `Storage` trait
//! with support for fault injection at various levels:
//! - Page-level read/write errors
//! - Byte-level corruption (bit flips)
//! - Partial writes
//! - Sync failures

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::io::{Storage, StorageError};
use crate::storage::{PAGE_SIZE_U64, PAGE_SIZE, Page, PageId, Superblock};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
    /// Probability of page corruption on read (0.0 - 1.0).
    pub corruption_rate: f64,
    /// Probability of partial write (0.0 - 1.0).
    pub partial_write_rate: f64,
    /// Number of initial storage operations that never fault, so a store
    /// can be formatted before faults start.
    pub quiet_operations: u64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Create a fault config with low fault rates (for stress testing).
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            read_error_rate: 0.001,
            write_error_rate: 0.001,
            sync_error_rate: 0.001,
            corruption_rate: 0.001,
            partial_write_rate: 0.001,
            quiet_operations: 0,
        }
    }

    /// Create a fault config with high fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            read_error_rate: 0.05,
            write_error_rate: 0.05,
            sync_error_rate: 0.05,
            corruption_rate: 0.05,
            partial_write_rate: 0.05,
            quiet_operations: 0,
        }
    }

    /// Suppress faults for the first `operations` storage calls.
    #[must_use]
    pub const fn after(mut self, operations: u64) -> Self {
        self.quiet_operations = operations;
        self
    }

    #[must_use]
    pub fn is_fault_free(&self) -> bool {
        self.read_error_rate <= 0.0
            && self.write_error_rate <= 0.0
            && self.sync_error_rate <= 0.0
            && self.corruption_rate <= 0.0
            && self.partial_write_rate <= 0.0
    }
}

/// In-memory storage implementation for deterministic testing.
///
/// This implementation stores pages in memory and supports:
/// - Fault injection based on configurable rates
/// - Deterministic behavior via seeded RNG
///
/// The storage itself is single-threaded; the record store wraps it in a
/// mutex when the tree is shared across threads.
pub struct SimulatedStorage {
    /// In-memory page storage.
    pages: HashMap<PageId, Page>,
    /// Total number of pages (including unwritten ones).
    total_pages: u64,
    superblock: Superblock,

    fault_config: FaultConfig,
    rng: StdRng,

    stats: SimulatedStorageStats,
}

/// Statistics about simulated storage operations.
#[derive(Debug, Default, Clone)]
pub struct SimulatedStorageStats {
    pub reads: u64,
    pub writes: u64,
    pub syncs: u64,
    pub injected_read_errors: u64,
    pub injected_write_errors: u64,
    pub injected_sync_errors: u64,
    pub corrupted_reads: u64,
    pub partial_writes: u64,
}

impl SimulatedStorageStats {
    /// Total number of faults of any kind that were injected.
    #[must_use]
    pub const fn injected_faults(&self) -> u64 {
        self.injected_read_errors
            + self.injected_write_errors
            + self.injected_sync_errors
            + self.corrupted_reads
            + self.partial_writes
    }

    const fn operations(&self) -> u64 {
        self.reads + self.writes + self.syncs
    }
}

impl SimulatedStorage {
    /// Create a new fault-free simulated storage with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::default())
    }

    /// Create a new simulated storage with custom fault configuration.
    ///
    /// The seed ensures deterministic behavior - the same seed will
    /// produce the same sequence of faults.
    #[must_use]
    pub fn with_config(seed: u64, fault_config: FaultConfig) -> Self {
        let superblock = Superblock::new();
        let mut pages = HashMap::new();
        pages.insert(0, superblock.to_page());

        Self {
            pages,
            total_pages: 1, // Page 0 is the superblock
            superblock,
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            stats: SimulatedStorageStats::default(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> &SimulatedStorageStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = SimulatedStorageStats::default();
    }

    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 || self.stats.operations() <= self.fault_config.quiet_operations {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    /// Corrupt a page by flipping random bits.
    fn corrupt_page(&mut self, page: &mut Page) {
        let num_flips = self.rng.random_range(1..=8);
        for _ in 0..num_flips {
            let byte_offset = self.rng.random_range(0..PAGE_SIZE);
            let bit = self.rng.random_range(0..8u8);
            page.as_bytes_mut()[byte_offset] ^= 1 << bit;
        }
    }

    /// Simulate a partial write by zeroing out the tail of the page.
    fn make_partial_write(&mut self, page: &mut Page) {
        let cutoff = self.rng.random_range(0..PAGE_SIZE);
        for byte in page.as_bytes_mut().iter_mut().skip(cutoff) {
            *byte = 0;
        }
    }
}

impl Storage for SimulatedStorage {
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        self.stats.reads += 1;

        if page_id >= self.total_pages {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.total_pages,
            });
        }

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(StorageError::InjectedFault(format!(
                "simulated read error on page {page_id}"
            )));
        }

        let mut page = self.pages.get(&page_id).cloned().unwrap_or_default();

        if self.should_inject_fault(self.fault_config.corruption_rate) {
            self.stats.corrupted_reads += 1;
            self.corrupt_page(&mut page);
        }

        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        self.stats.writes += 1;

        if page_id >= self.total_pages {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.total_pages,
            });
        }

        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(StorageError::InjectedFault(format!(
                "simulated write error on page {page_id}"
            )));
        }

        let mut page_to_write = page.clone();

        if self.should_inject_fault(self.fault_config.partial_write_rate) {
            self.stats.partial_writes += 1;
            self.make_partial_write(&mut page_to_write);
        }

        self.pages.insert(page_id, page_to_write);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.stats.syncs += 1;

        if self.should_inject_fault(self.fault_config.sync_error_rate) {
            self.stats.injected_sync_errors += 1;
            return Err(StorageError::InjectedFault(
                "simulated sync error".to_string(),
            ));
        }

        // Writes are already "durable" in memory.
        Ok(())
    }

    fn allocate_pages(&mut self, count: u64) -> Result<PageId, StorageError> {
        let first_new_page = self.total_pages;
        self.total_pages += count;

        self.superblock.total_page_count = self.total_pages;
        self.superblock.file_size = self.total_pages * PAGE_SIZE_U64;

        Ok(first_new_page)
    }

    fn total_pages(&self) -> u64 {
        self.total_pages
    }

    fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    fn superblock_mut(&mut self) -> &mut Superblock {
        &mut self.superblock
    }

    fn write_superblock(&mut self) -> Result<(), StorageError> {
        self.pages.insert(0, self.superblock.to_page());
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_storage_basic() {
        let mut storage = SimulatedStorage::new(12345);

        assert_eq!(storage.total_pages(), 1);

        let first_page = storage.allocate_pages(5).unwrap();
        assert_eq!(first_page, 1);
        assert_eq!(storage.total_pages(), 6);

        let mut page = Page::new();
        page.write_bytes(0, b"hello world");
        storage.write_page(2, &page).unwrap();

        let read_page = storage.read_page(2).unwrap();
        assert_eq!(read_page.read_bytes(0, 11), b"hello world");
    }

    #[test]
    fn test_simulated_storage_superblock() {
        let mut storage = SimulatedStorage::new(12345);

        storage.superblock_mut().root = 42;
        storage.write_superblock().unwrap();

        let persisted = Superblock::from_page(&storage.read_page(0).unwrap()).unwrap();
        assert_eq!(persisted.root, 42);
    }

    #[test]
    fn test_simulated_storage_fault_injection() {
        let config = FaultConfig {
            read_error_rate: 1.0,
            ..Default::default()
        };
        let mut storage = SimulatedStorage::with_config(12345, config);

        storage.allocate_pages(1).unwrap();

        let result = storage.read_page(1);
        assert!(matches!(result, Err(StorageError::InjectedFault(_))));
        assert_eq!(storage.stats().injected_read_errors, 1);
    }

    #[test]
    fn test_quiet_operations_delay_faults() {
        let config = FaultConfig {
            write_error_rate: 1.0,
            ..Default::default()
        }
        .after(2);
        let mut storage = SimulatedStorage::with_config(1, config);
        storage.allocate_pages(1).unwrap();

        assert!(storage.write_page(1, &Page::new()).is_ok());
        assert!(storage.write_page(1, &Page::new()).is_ok());
        assert!(storage.write_page(1, &Page::new()).is_err());
        assert_eq!(storage.stats().injected_faults(), 1);
    }

    #[test]
    fn test_simulated_storage_deterministic() {
        let config = FaultConfig {
            read_error_rate: 0.5,
            ..Default::default()
        };

        let mut results1 = Vec::new();
        let mut storage1 = SimulatedStorage::with_config(12345, config.clone());
        storage1.allocate_pages(10).unwrap();
        for i in 1..11 {
            results1.push(storage1.read_page(i).is_ok());
        }

        let mut results2 = Vec::new();
        let mut storage2 = SimulatedStorage::with_config(12345, config);
        storage2.allocate_pages(10).unwrap();
        for i in 1..11 {
            results2.push(storage2.read_page(i).is_ok());
        }

        assert_eq!(
            results1, results2,
            "Same seed should produce same fault pattern"
        );
    }

    #[test]
    fn test_simulated_storage_page_out_of_bounds() {
        let mut storage = SimulatedStorage::new(12345);

        let result = storage.read_page(100);
        assert!(matches!(result, Err(StorageError::PageOutOfBounds { .. })));
    }
}
