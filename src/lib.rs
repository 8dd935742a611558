//! Ruin Solver - Ruin-minimizing asset allocation for retirement decumulation
//!
//! This library provides:
//! - Control-file and mortality-table parsing
//! - Hazard-rate derivation for single and joint-life cohorts
//! - Backward induction over a discretized ruin-factor grid, parallel within
//!   each period
//! - Staged, file-backed results with chronological and transposed outputs

pub mod cohort;
pub mod config;
pub mod error;
pub mod induction;
pub mod mortality;
pub mod store;

// Re-export commonly used types
pub use cohort::{JointLifeStatus, Person, Sex};
pub use config::{BucketRange, ControlFile, Discretization, HorizonSpec, ModelParameters};
pub use error::{Result, SolverError};
pub use induction::{BackwardInduction, InductionReport, PeriodOptimizer};
pub use mortality::HazardRates;
pub use store::{PeriodResult, StageStore};
