//! Prior-period probabilities and the pruning set used for integration
//!
//! Ruin probability is non-decreasing in the ruin factor, so a period's array
//! is a staircase. The pruning set keeps one bucket per step (the last bucket
//! of each run of equal values) which is all the expected-value integration in
//! the optimizer needs.

use log::debug;

use crate::config::Discretization;
use crate::error::{Result, SolverError};
use crate::store::StageStore;

/// Slack allowed above a period's maximum probability
const CEILING_TOLERANCE: f64 = 2e-16;
/// Slack allowed on decreases between consecutive buckets
const MONOTONE_TOLERANCE: f64 = 1e-15;

/// Buckets that close a run of equal probabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruningSet {
    buckets: Vec<usize>,
}

impl PruningSet {
    /// Scan an array indexed by `bucket - 1`
    ///
    /// Bucket `b` joins the set when it differs from `b + 1`, until the next
    /// bucket reaches `ceiling`. The first and last buckets always join.
    pub fn build(probabilities: &[f64], ceiling: f64) -> Self {
        let n = probabilities.len();
        let mut buckets = Vec::new();
        let mut ceiling_reached = false;

        for b in 1..=n {
            if b == 1 || b == n {
                buckets.push(b);
            } else if !ceiling_reached && probabilities[b - 1] != probabilities[b] {
                if probabilities[b] >= ceiling {
                    ceiling_reached = true;
                }
                buckets.push(b);
            }
        }

        Self { buckets }
    }

    pub fn buckets(&self) -> &[usize] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Expand back to a full array: each bucket takes the value of the
    /// nearest member at or above it
    pub fn reconstruct(&self, probabilities: &[f64]) -> Vec<f64> {
        let mut full = Vec::with_capacity(probabilities.len());
        let mut previous = 0;
        for &member in &self.buckets {
            let value = probabilities[member - 1];
            full.extend(std::iter::repeat(value).take(member - previous));
            previous = member;
        }
        full
    }
}

/// Optimal probabilities of the period after the one being solved
#[derive(Debug, Clone)]
pub struct PriorPeriod {
    period: usize,
    probabilities: Vec<f64>,
    pruning_set: PruningSet,
    max_probability: f64,
}

impl PriorPeriod {
    /// Validate a full probability array and build its pruning set
    ///
    /// `hazard` is the hazard of `period` itself; `1 - hazard` bounds every value.
    pub fn from_probabilities(period: usize, probabilities: Vec<f64>, hazard: f64) -> Result<Self> {
        let ceiling = 1.0 - hazard;

        let mut previous = 0.0;
        for (i, &current) in probabilities.iter().enumerate() {
            if !current.is_finite()
                || current < 0.0
                || current > ceiling + CEILING_TOLERANCE
                || current < previous - MONOTONE_TOLERANCE
            {
                return Err(SolverError::CorruptPriorPeriod {
                    period,
                    bucket: i + 1,
                    previous,
                    current,
                    ceiling,
                });
            }
            previous = current;
        }

        let pruning_set = PruningSet::build(&probabilities, ceiling);
        Ok(Self {
            period,
            probabilities,
            pruning_set,
            max_probability: ceiling,
        })
    }

    /// Period these probabilities belong to
    pub fn period(&self) -> usize {
        self.period
    }

    /// Probability stored for bucket `b` (1-based)
    pub fn probability(&self, bucket: usize) -> f64 {
        self.probabilities[bucket - 1]
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn pruning_set(&self) -> &PruningSet {
        &self.pruning_set
    }

    /// Ruin probability once the ruin factor runs off the grid
    pub fn max_probability(&self) -> f64 {
        self.max_probability
    }
}

/// Read period `period + 1` from the store for solving `period`
pub fn load_prior_period(
    store: &StageStore,
    period: usize,
    grid: &Discretization,
    prior_hazard: f64,
) -> Result<PriorPeriod> {
    let prior = period + 1;
    let path = store.period_path(prior);
    let records = store.read_period(prior)?;

    let n = grid.bucket_count();
    let mut probabilities = vec![0.0; n];
    let mut seen = vec![false; n];
    for record in records.iter().filter(|r| r.period == prior) {
        let bucket = grid.bucket_of(record.ruin_factor);
        if bucket < 1 || bucket as usize > n {
            return Err(SolverError::BucketOutOfRange {
                path,
                ruin_factor: record.ruin_factor,
            });
        }
        probabilities[bucket as usize - 1] = record.probability;
        seen[bucket as usize - 1] = true;
    }

    let missing = seen.iter().filter(|s| !**s).count();
    if missing > 0 {
        return Err(SolverError::IncompletePeriod {
            period: prior,
            missing,
        });
    }

    let loaded = PriorPeriod::from_probabilities(prior, probabilities, prior_hazard)?;
    debug!(
        "Period {} holds {} unique probabilities across {} buckets",
        prior,
        loaded.pruning_set.len(),
        n
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PeriodResult;

    #[test]
    fn test_pruning_set_marks_run_ends() {
        let probs = [0.0, 0.0, 0.1, 0.1, 0.1, 0.3, 0.5, 0.5];
        let set = PruningSet::build(&probs, 1.0);
        assert_eq!(set.buckets(), &[1, 2, 5, 6, 8]);
    }

    #[test]
    fn test_pruning_set_always_includes_endpoints() {
        let flat = [0.2; 6];
        assert_eq!(PruningSet::build(&flat, 1.0).buckets(), &[1, 6]);
        assert_eq!(PruningSet::build(&[0.4], 1.0).buckets(), &[1]);
    }

    #[test]
    fn test_pruning_set_stops_at_ceiling() {
        let probs = [0.1, 0.5, 0.9, 0.9, 0.9];
        let set = PruningSet::build(&probs, 0.9);
        assert_eq!(set.buckets(), &[1, 2, 5]);
    }

    #[test]
    fn test_reconstruction_reproduces_array() {
        let arrays: [&[f64]; 4] = [
            &[0.0, 0.0, 0.1, 0.1, 0.1, 0.3, 0.5, 0.5],
            &[0.0, 0.1, 0.2, 0.3],
            &[0.7; 5],
            &[0.0, 0.0, 0.0, 0.25, 0.25, 0.5, 0.75, 1.0, 1.0, 1.0],
        ];
        for probs in arrays {
            let set = PruningSet::build(probs, 1.0);
            assert_eq!(set.buckets().first(), Some(&1));
            assert_eq!(set.buckets().last(), Some(&probs.len()));
            assert_eq!(set.reconstruct(probs), probs.to_vec());
        }
    }

    #[test]
    fn test_rejects_decreasing_probabilities() {
        let err = PriorPeriod::from_probabilities(4, vec![0.1, 0.3, 0.2], 0.0).unwrap_err();
        match err {
            SolverError::CorruptPriorPeriod {
                period,
                bucket,
                previous,
                current,
                ..
            } => {
                assert_eq!((period, bucket), (4, 3));
                assert_eq!((previous, current), (0.3, 0.2));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_rejects_values_above_ceiling() {
        assert!(PriorPeriod::from_probabilities(1, vec![0.1, 0.95], 0.1).is_err());
        assert!(PriorPeriod::from_probabilities(1, vec![0.1, 0.9], 0.1).is_ok());
        assert!(PriorPeriod::from_probabilities(1, vec![-0.1, 0.5], 0.0).is_err());
    }

    #[test]
    fn test_tolerates_tiny_decreases() {
        let probs = vec![0.5, 0.5 - 1e-16, 0.6];
        assert!(PriorPeriod::from_probabilities(2, probs, 0.0).is_ok());
    }

    #[test]
    fn test_load_prior_period_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = StageStore::new(dir.path());
        let grid = Discretization::new(10, 4, 0.5);

        let records: Vec<PeriodResult> = (1..=5)
            .map(|b| PeriodResult {
                period: 3,
                ruin_factor: grid.ruin_factor(b),
                probability: if b < 3 { 0.0 } else { 0.45 },
                allocation: 1.0,
            })
            .collect();
        store.write_period(3, &records).unwrap();

        let prior = load_prior_period(&store, 2, &grid, 0.5).unwrap();
        assert_eq!(prior.period(), 3);
        assert_eq!(prior.probabilities(), &[0.0, 0.0, 0.45, 0.45, 0.45]);
        assert_eq!(prior.pruning_set().buckets(), &[1, 2, 5]);
        assert_eq!(prior.max_probability(), 0.5);
    }

    #[test]
    fn test_load_prior_period_detects_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let store = StageStore::new(dir.path());
        let grid = Discretization::new(10, 4, 0.5);

        let records: Vec<PeriodResult> = [1, 2, 4, 5]
            .iter()
            .map(|&b| PeriodResult {
                period: 1,
                ruin_factor: grid.ruin_factor(b),
                probability: 0.1,
                allocation: 0.0,
            })
            .collect();
        store.write_period(1, &records).unwrap();

        assert!(matches!(
            load_prior_period(&store, 0, &grid, 0.0),
            Err(SolverError::IncompletePeriod { period: 1, missing: 1 })
        ));
    }
}
