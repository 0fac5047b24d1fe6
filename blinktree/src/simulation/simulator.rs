//! Main simulator harness for deterministic simulation testing.
//!
//! Drives a small-degree tree over simulated storage with a seeded stream of
//! inserts, erases and lookups, checking every read against the model in
//! [`OperationHistory`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::invariants::{InvariantChecker, InvariantViolation, Operation, OperationHistory};
use super::storage::{FaultConfig, SimulatedStorage};
use crate::btree::{BLinkTree, StorageSet, TreeError};

/// Degree used for simulation, small enough that a few hundred operations
/// exercise splits, borrows and merges on every level.
pub const SIMULATION_DEGREE: usize = 6;

type SimulatedTree = BLinkTree<u32, u32, SIMULATION_DEGREE>;

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Fault injection configuration, applied to all three stores.
    pub fault_config: FaultConfig,
    /// Keys are drawn from `0..key_space`.
    pub key_space: u32,
    /// Values are drawn from `0..value_space`.
    pub value_space: u32,
    /// Fraction of writes that are erases.
    pub erase_rate: f64,
    /// Run a full structural check every this many operations.
    pub verify_every: u64,
}

impl SimulatorConfig {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fault_config: FaultConfig::default(),
            key_space: 256,
            value_space: 8,
            erase_rate: 0.4,
            verify_every: 50,
        }
    }

    #[must_use]
    pub const fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault_config = config;
        self
    }

    #[must_use]
    pub const fn with_key_space(mut self, key_space: u32) -> Self {
        self.key_space = key_space;
        self
    }

    #[must_use]
    pub const fn with_erase_rate(mut self, rate: f64) -> Self {
        self.erase_rate = rate;
        self
    }
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    pub seed: u64,
    pub operations_processed: u64,
    pub inserts: u64,
    pub erases: u64,
    pub reads: u64,
    pub invariant_violations: Vec<InvariantViolation>,
    /// Faults injected across the three stores. Only known when the tree
    /// closed cleanly and handed its storage back.
    pub injected_faults: u64,
    /// The error that stopped the run, if any.
    pub error: Option<String>,
    /// Whether the stopping error came from the storage layer or a
    /// checksum check rather than from the tree logic itself.
    pub error_from_storage: bool,
}

impl SimulationResult {
    /// Check if the simulation passed: no violations and no error.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.error.is_none() && self.invariant_violations.is_empty()
    }
}

pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    history: OperationHistory,
    checker: InvariantChecker,
    inserts: u64,
    erases: u64,
    reads: u64,
}

impl Simulator {
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            history: OperationHistory::new(),
            checker: InvariantChecker::new(),
            inserts: 0,
            erases: 0,
            reads: 0,
        }
    }

    /// Run `operation_count` operations against a fresh tree.
    pub fn run(&mut self, operation_count: u64) -> SimulationResult {
        let seed = self.config.seed;
        let storage = |offset: u64| {
            Box::new(SimulatedStorage::with_config(
                seed.wrapping_add(offset),
                self.config.fault_config.clone(),
            ))
        };
        let mut tree = SimulatedTree::new();
        let opened = tree.open_with(StorageSet {
            nodes: storage(1),
            keys: storage(2),
            chains: storage(3),
        });

        let outcome = opened.and_then(|()| self.drive(&tree, operation_count));
        let outcome = outcome.and_then(|()| self.final_check(&tree));

        // Fault counters live in the storages, which come back on close.
        let (closed, injected_faults) = match tree.close_into_storage() {
            Ok(Some(set)) => (Ok(()), Self::injected_faults(&set)),
            Ok(None) => (Ok(()), 0),
            Err(e) => (Err(e), 0),
        };
        let error = outcome.err().or_else(|| closed.err());

        if let Some(e) = &error {
            tracing::debug!(seed, "simulation stopped: {e}");
        }

        SimulationResult {
            seed,
            operations_processed: self.history.len() as u64,
            inserts: self.inserts,
            erases: self.erases,
            reads: self.reads,
            invariant_violations: self.checker.violations().to_vec(),
            injected_faults,
            error_from_storage: error
                .as_ref()
                .is_some_and(|e| e.storage_error().is_some() || e.is_corruption()),
            error: error.map(|e| e.to_string()),
        }
    }

    fn injected_faults(set: &StorageSet) -> u64 {
        [&set.nodes, &set.keys, &set.chains]
            .into_iter()
            .filter_map(|storage| storage.as_any().downcast_ref::<SimulatedStorage>())
            .map(|storage| storage.stats().injected_faults())
            .sum()
    }

    fn drive(&mut self, tree: &SimulatedTree, operation_count: u64) -> Result<(), TreeError> {
        for i in 1..=operation_count {
            let key = self.rng.random_range(0..self.config.key_space);
            let roll: f64 = self.rng.random();

            if roll < 0.25 {
                self.find(tree, key)?;
            } else if roll < 0.30 {
                let hi = key.saturating_add(self.rng.random_range(0..32));
                self.range(tree, key, hi)?;
            } else if self.rng.random::<f64>() < self.config.erase_rate {
                self.erase(tree, key)?;
            } else {
                let value = self.rng.random_range(0..self.config.value_space);
                tree.insert(key, value)?;
                self.inserts += 1;
                self.history.record(Operation::Insert { key, value });
            }

            if i % self.config.verify_every == 0 {
                self.verify(tree)?;
            }
        }
        Ok(())
    }

    fn find(&mut self, tree: &SimulatedTree, key: u32) -> Result<(), TreeError> {
        let actual = tree.find(&key)?;
        self.reads += 1;
        self.history.record(Operation::Find { key });
        let expected = self.history.expected_values(key).to_vec();
        self.checker
            .check_find(key, &actual, &expected, self.history.len() - 1);
        Ok(())
    }

    fn range(&mut self, tree: &SimulatedTree, lo: u32, hi: u32) -> Result<(), TreeError> {
        let actual = tree.find_range(&lo, &hi)?;
        self.reads += 1;
        self.history.record(Operation::Range { lo, hi });
        let expected = self.history.expected_range(lo, hi);
        self.checker
            .check_range((lo, hi), &actual, &expected, self.history.len() - 1);
        Ok(())
    }

    /// Erase a value that is present most of the time, so underflow repair
    /// gets exercised, and occasionally one that is not.
    fn erase(&mut self, tree: &SimulatedTree, key: u32) -> Result<(), TreeError> {
        let present = self.history.expected_values(key);
        let value = if present.is_empty() || self.rng.random_bool(0.1) {
            self.rng.random_range(0..self.config.value_space)
        } else {
            present[self.rng.random_range(0..present.len())]
        };
        tree.erase(&key, &value)?;
        self.erases += 1;
        self.history.record(Operation::Erase { key, value });
        Ok(())
    }

    fn verify(&mut self, tree: &SimulatedTree) -> Result<(), TreeError> {
        self.history.record(Operation::Verify);
        match tree.verify() {
            Ok(stats) => {
                self.checker
                    .check_stats(&stats, &self.history, self.history.len() - 1);
                Ok(())
            }
            Err(e) if e.storage_error().is_some() => Err(e),
            Err(e) => {
                self.checker.add_violation(InvariantViolation {
                    description: "structural check failed".to_string(),
                    operation_index: self.history.len() - 1,
                    context: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn final_check(&mut self, tree: &SimulatedTree) -> Result<(), TreeError> {
        self.verify(tree)?;
        let all = tree.find_range(&0, &u32::MAX)?;
        let expected = self.history.expected_range(0, u32::MAX);
        self.checker
            .check_range((0, u32::MAX), &all, &expected, self.history.len());
        Ok(())
    }

    #[must_use]
    pub const fn history(&self) -> &OperationHistory {
        &self.history
    }

    #[must_use]
    pub const fn checker(&self) -> &InvariantChecker {
        &self.checker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulator_basic() {
        let mut simulator = Simulator::new(SimulatorConfig::new(12345));
        let result = simulator.run(500);

        assert!(result.passed(), "simulation failed: {result:?}");
        assert_eq!(result.operations_processed, simulator.history().len() as u64);
        assert!(result.inserts > 0);
        assert!(result.erases > 0);
        assert_eq!(result.injected_faults, 0);
    }

    #[test]
    fn test_simulator_deterministic() {
        let result1 = Simulator::new(SimulatorConfig::new(777)).run(300);
        let result2 = Simulator::new(SimulatorConfig::new(777)).run(300);

        assert_eq!(result1.inserts, result2.inserts);
        assert_eq!(result1.erases, result2.erases);
        assert_eq!(result1.reads, result2.reads);
    }

    #[test]
    fn test_simulator_many_seeds() {
        for seed in 0..20 {
            let config = SimulatorConfig::new(seed).with_key_space(64);
            let result = Simulator::new(config).run(400);
            assert!(result.passed(), "seed {seed} failed: {result:?}");
        }
    }

    #[test]
    fn test_simulator_erase_heavy_drains_tree() {
        let config = SimulatorConfig::new(4242)
            .with_key_space(40)
            .with_erase_rate(0.7);
        let result = Simulator::new(config).run(2_000);
        assert!(result.passed(), "simulation failed: {result:?}");
    }

    #[test]
    fn test_faults_surface_as_storage_errors() {
        for seed in 0..10 {
            let config = SimulatorConfig::new(seed)
                .with_fault_config(FaultConfig::high_faults().after(10));
            let result = Simulator::new(config).run(2_000);

            assert!(result.error.is_some(), "seed {seed}: faults went unnoticed");
            assert!(
                result.error_from_storage,
                "seed {seed}: unexpected error {:?}",
                result.error
            );
        }
    }

    #[test]
    #[ignore] // Long running test
    fn test_simulator_stress() {
        let config = SimulatorConfig::new(99999).with_key_space(4096);
        let result = Simulator::new(config).run(100_000);
        assert!(result.passed(), "simulation failed: {result:?}");
    }
}
