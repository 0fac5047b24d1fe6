//! Deterministic Simulation Testing (DST) infrastructure.
//!
//! This module provides tools for testing the tree with:
//! - In-memory storage with fault injection
//! - Reproducible random operation streams
//! - Model comparison and structural checks while the run progresses
//!
//! # Design Principles
//!
//! 1. All page I/O goes through `Storage` and can be simulated
//! 2. All randomness is seeded for reproducibility
//! 3. Faults can be injected at any page read, write or sync
//! 4. Given the same seed, execution is identical
//!
//! # Usage
//!
//! ```ignore
//! use simulation::{Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345).with_key_space(64);
//! let result = Simulator::new(config).run(1000);
//!
//! assert!(result.passed());
//! ```

mod invariants;
mod simulator;
mod storage;

pub use invariants::{InvariantChecker, InvariantViolation, Operation, OperationHistory};
pub use simulator::{SIMULATION_DEGREE, SimulationResult, Simulator, SimulatorConfig};
pub use storage::{FaultConfig, SimulatedStorage, SimulatedStorageStats};
