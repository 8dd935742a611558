//! Backward induction over ruin-factor buckets
//!
//! - [`returns`]: per-allocation normal return law
//! - [`prior`]: loading and pruning of the next period's probabilities
//! - [`optimizer`]: the per-period allocation search
//! - [`scheduler`]: the backward loop and parallel range dispatch
//! - [`combine`]: merging range and period files into the final outputs

pub mod combine;
pub mod optimizer;
pub mod prior;
pub mod returns;
pub mod scheduler;

pub use combine::{FinalOutputs, StageCombiner};
pub use optimizer::{Decision, PeriodOptimizer};
pub use prior::{load_prior_period, PriorPeriod, PruningSet};
pub use returns::ReturnLaw;
pub use scheduler::{
    default_workers, partition, BackwardInduction, InductionReport, PeriodReport, MIN_WORKERS,
};
