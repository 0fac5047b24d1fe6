//! Invariant checking for deterministic simulation testing.
//!
//! The simulator mirrors every successful tree operation into an in-memory
//! model and compares the tree against it after each read.

use std::collections::BTreeMap;

use crate::btree::TreeStats;

/// A recorded operation in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert { key: u32, value: u32 },
    Erase { key: u32, value: u32 },
    Find { key: u32 },
    Range { lo: u32, hi: u32 },
    Verify,
}

/// Operation log plus the expected multimap contents.
#[derive(Debug, Default)]
pub struct OperationHistory {
    operations: Vec<Operation>,
    /// Key to its values, kept sorted like a value chain.
    expected: BTreeMap<u32, Vec<u32>>,
}

impl OperationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, operation: Operation) {
        match operation {
            Operation::Insert { key, value } => {
                let values = self.expected.entry(key).or_default();
                let at = values.partition_point(|&v| v <= value);
                values.insert(at, value);
            }
            Operation::Erase { key, value } => {
                if let Some(values) = self.expected.get_mut(&key) {
                    if let Some(at) = values.iter().position(|&v| v == value) {
                        values.remove(at);
                    }
                    if values.is_empty() {
                        self.expected.remove(&key);
                    }
                }
            }
            Operation::Find { .. } | Operation::Range { .. } | Operation::Verify => {}
        }
        self.operations.push(operation);
    }

    /// Values the tree should return for `key`.
    #[must_use]
    pub fn expected_values(&self, key: u32) -> &[u32] {
        self.expected.get(&key).map_or(&[], Vec::as_slice)
    }

    /// Pairs the tree should return for a range query.
    #[must_use]
    pub fn expected_range(&self, lo: u32, hi: u32) -> Vec<(u32, u32)> {
        if lo > hi {
            return Vec::new();
        }
        self.expected
            .range(lo..=hi)
            .flat_map(|(&key, values)| values.iter().map(move |&value| (key, value)))
            .collect()
    }

    /// Stored keys and pairs.
    #[must_use]
    pub fn expected_counts(&self) -> (u64, u64) {
        let keys = self.expected.len() as u64;
        let values = self.expected.values().map(|v| v.len() as u64).sum();
        (keys, values)
    }

    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// A detected invariant violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub description: String,
    /// Index into the operation history.
    pub operation_index: usize,
    pub context: String,
}

/// Collects violations found while comparing the tree to the model.
#[derive(Debug, Default)]
pub struct InvariantChecker {
    violations: Vec<InvariantViolation>,
}

impl InvariantChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_violation(&mut self, violation: InvariantViolation) {
        tracing::warn!(
            operation = violation.operation_index,
            "invariant violation: {}",
            violation.description
        );
        self.violations.push(violation);
    }

    /// A lookup must return exactly the model's values, in order.
    pub fn check_find(&mut self, key: u32, actual: &[u32], expected: &[u32], operation_index: usize) {
        if actual != expected {
            self.add_violation(InvariantViolation {
                description: format!("find({key}) returned wrong values"),
                operation_index,
                context: format!("expected {expected:?}, got {actual:?}"),
            });
        }
    }

    pub fn check_range(
        &mut self,
        (lo, hi): (u32, u32),
        actual: &[(u32, u32)],
        expected: &[(u32, u32)],
        operation_index: usize,
    ) {
        if actual != expected {
            self.add_violation(InvariantViolation {
                description: format!("find_range({lo}, {hi}) returned wrong pairs"),
                operation_index,
                context: format!("expected {} pairs, got {}", expected.len(), actual.len()),
            });
        }
    }

    /// Tree-wide counts must agree with the model.
    pub fn check_stats(&mut self, stats: &TreeStats, history: &OperationHistory, operation_index: usize) {
        let (keys, values) = history.expected_counts();
        if stats.keys != keys || stats.values != values {
            self.add_violation(InvariantViolation {
                description: "tree contents diverged from model".to_string(),
                operation_index,
                context: format!(
                    "tree has {} keys / {} values, model has {keys} / {values}",
                    stats.keys, stats.values
                ),
            });
        }
    }

    #[must_use]
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    #[must_use]
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_tracks_multimap() {
        let mut history = OperationHistory::new();
        history.record(Operation::Insert { key: 1, value: 5 });
        history.record(Operation::Insert { key: 1, value: 2 });
        history.record(Operation::Insert { key: 1, value: 5 });
        history.record(Operation::Insert { key: 3, value: 9 });

        assert_eq!(history.expected_values(1), &[2, 5, 5]);
        assert_eq!(history.expected_counts(), (2, 4));

        history.record(Operation::Erase { key: 1, value: 5 });
        assert_eq!(history.expected_values(1), &[2, 5]);

        history.record(Operation::Erase { key: 3, value: 9 });
        assert!(history.expected_values(3).is_empty());
        assert_eq!(history.expected_range(0, 10), vec![(1, 2), (1, 5)]);
        assert_eq!(history.len(), 6);
    }

    #[test]
    fn test_checker_flags_mismatch() {
        let mut checker = InvariantChecker::new();
        checker.check_find(1, &[1, 2], &[1, 2], 0);
        assert!(!checker.has_violations());

        checker.check_find(1, &[2], &[1, 2], 1);
        assert_eq!(checker.violations().len(), 1);
        assert_eq!(checker.violations()[0].operation_index, 1);
    }

    #[test]
    fn test_checker_compares_stats() {
        let mut history = OperationHistory::new();
        history.record(Operation::Insert { key: 1, value: 1 });

        let mut checker = InvariantChecker::new();
        let stats = TreeStats {
            height: 1,
            nodes: 1,
            keys: 1,
            values: 1,
        };
        checker.check_stats(&stats, &history, 1);
        assert!(!checker.has_violations());

        checker.check_stats(&TreeStats::default(), &history, 2);
        assert!(checker.has_violations());
    }
}
