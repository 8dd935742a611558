//! Per-period dynamic-programming step
//!
//! For each ruin-factor bucket the optimizer searches the discretized safe
//! allocation and keeps the one minimizing the probability of ruin: ruin this
//! period, or survive it and ruin later according to the prior period's
//! optimal probabilities.
//!
//! # Continuation value
//!
//! A return `R` above the ruin threshold `rf` moves the retiree to ruin factor
//! `rf / (R - rf)` next period. Bucket `k`'s upper edge `(k + 0.5) / PR` maps
//! back to the return threshold `rf * (1 + PR / (k + 0.5))`, so each run of
//! equal prior probabilities collects the return mass between two thresholds.
//! Returns that push the ruin factor past the grid collect the prior period's
//! maximum probability.
//!
//! # Pruning
//!
//! - **Saturation**: once a bucket's optimum reaches the maximum ruin
//!   probability to `k` decimal places, every later bucket in the range only
//!   evaluates the all-safe allocation `alpha = 1`.
//! - **Probe**: a single `alpha = 1` pass over the whole grid that only
//!   reports where saturation starts, used to balance worker ranges.

use std::path::PathBuf;

use log::info;

use super::prior::PriorPeriod;
use super::returns::ReturnLaw;
use crate::config::{BucketRange, Discretization, ModelParameters};
use crate::error::{Result, SolverError};
use crate::mortality::HazardRates;
use crate::store::{PeriodResult, StageStore};

/// Slack on the saturation test for floating point differences
const SATURATION_SLACK: f64 = 1e-16 + 1e-17;

/// Optimal allocation for one bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub probability: f64,
    pub allocation: f64,
}

impl Decision {
    fn unset() -> Self {
        Self {
            probability: f64::INFINITY,
            allocation: f64::NAN,
        }
    }
}

/// Outcome of scanning a bucket range
#[derive(Debug)]
struct RangeScan {
    results: Vec<PeriodResult>,
    /// Allocation steps evaluated per bucket, parallel to `results`
    evaluated: Vec<u32>,
    saturated_at: Option<usize>,
}

/// Solver for a single period over a bucket range
///
/// Holds only shared references and per-allocation return laws, so one
/// optimizer can serve every worker of a period concurrently.
pub struct PeriodOptimizer<'a> {
    params: &'a ModelParameters,
    grid: &'a Discretization,
    hazards: &'a HazardRates,
    /// Return law per allocation step, index = step
    laws: Vec<ReturnLaw>,
}

impl<'a> PeriodOptimizer<'a> {
    pub fn new(
        params: &'a ModelParameters,
        grid: &'a Discretization,
        hazards: &'a HazardRates,
    ) -> Self {
        let laws = (0..=grid.allocation_steps)
            .map(|step| ReturnLaw::for_allocation(params, grid.allocation(step)))
            .collect();
        Self {
            params,
            grid,
            hazards,
            laws,
        }
    }

    pub fn terminal_period(&self) -> usize {
        self.hazards.terminal_period()
    }

    /// Saturation threshold: the period's maximum ruin probability truncated
    /// to the configured number of decimal places
    pub fn saturation_threshold(&self, period: usize) -> f64 {
        let scale = 10f64.powf(self.params.pruning_decimal_places);
        (scale * self.hazards.max_ruin_probability(period)).floor() / scale
    }

    // ========================================================================
    // ENTRY POINTS
    // ========================================================================

    /// Solve `range` for `period` and persist the records
    ///
    /// The terminal period is written under its period key; any other period
    /// under its (period, range) key for later combining.
    pub fn run_range(
        &self,
        period: usize,
        range: BucketRange,
        prior: Option<&PriorPeriod>,
        store: &StageStore,
    ) -> Result<PathBuf> {
        let results = self.solve_range(period, range, prior)?;
        if period == self.terminal_period() {
            store.write_period(period, &results)
        } else {
            store.write_range(period, range, &results)
        }
    }

    /// Solve `range` for `period` without touching the store
    pub fn solve_range(
        &self,
        period: usize,
        range: BucketRange,
        prior: Option<&PriorPeriod>,
    ) -> Result<Vec<PeriodResult>> {
        self.check_range(range)?;

        if period == self.terminal_period() {
            return Ok(self.solve_terminal(period, range));
        }

        let prior = prior.ok_or(SolverError::MissingPriorPeriod { period })?;
        Ok(self.scan(period, range, prior, false).results)
    }

    /// Approximate the first saturated bucket using `alpha = 1` only
    ///
    /// Returns the bucket count when no bucket saturates.
    pub fn probe(&self, period: usize, prior: &PriorPeriod) -> Result<usize> {
        if period == self.terminal_period() {
            return Err(SolverError::ProbeAtTerminal { period });
        }

        info!(
            "Saturation threshold for period {} is {}",
            period,
            self.saturation_threshold(period)
        );

        let scan = self.scan(period, self.grid.full_range(), prior, true);
        Ok(scan.saturated_at.unwrap_or_else(|| self.grid.bucket_count()))
    }

    fn check_range(&self, range: BucketRange) -> Result<()> {
        let n = self.grid.bucket_count();
        if range.start == 0 || range.end > n {
            return Err(SolverError::InvalidRange {
                start: range.start,
                end: range.end,
                buckets: n,
            });
        }
        Ok(())
    }

    // ========================================================================
    // TERMINAL PERIOD
    // ========================================================================

    /// No continuation: minimize the chance of ruin this period alone
    fn solve_terminal(&self, period: usize, range: BucketRange) -> Vec<PeriodResult> {
        let max_probability = self.hazards.max_ruin_probability(period);

        range
            .buckets()
            .map(|bucket| {
                let rf = self.grid.ruin_factor(bucket);
                let mut best = Decision::unset();
                for (step, law) in self.laws.iter().enumerate() {
                    let cdf = law.cdf(rf);
                    if cdf < best.probability {
                        best = Decision {
                            probability: cdf,
                            allocation: self.grid.allocation(step as u32),
                        };
                    }
                }
                PeriodResult {
                    period,
                    ruin_factor: rf,
                    probability: max_probability * best.probability,
                    allocation: best.allocation,
                }
            })
            .collect()
    }

    // ========================================================================
    // NON-TERMINAL PERIODS
    // ========================================================================

    fn scan(
        &self,
        period: usize,
        range: BucketRange,
        prior: &PriorPeriod,
        probe: bool,
    ) -> RangeScan {
        let last_step = self.grid.allocation_steps;
        let threshold = self.saturation_threshold(period) - SATURATION_SLACK;

        let mut saturated = false;
        let mut results = Vec::with_capacity(range.len());
        let mut evaluated = Vec::with_capacity(range.len());

        for bucket in range.buckets() {
            let first_step = if probe || saturated { last_step } else { 0 };
            let (decision, steps) = self.solve_bucket(period, bucket, prior, first_step);
            evaluated.push(steps);

            results.push(PeriodResult {
                period,
                ruin_factor: self.grid.ruin_factor(bucket),
                probability: decision.probability,
                allocation: decision.allocation,
            });

            if !saturated && decision.probability >= threshold {
                saturated = true;
                if probe {
                    return RangeScan {
                        results,
                        evaluated,
                        saturated_at: Some(bucket),
                    };
                }
            }
        }

        RangeScan {
            results,
            evaluated,
            saturated_at: None,
        }
    }

    /// Search allocation steps `first_step..=PA` for one bucket
    ///
    /// Also returns how many steps were evaluated before the search ended.
    fn solve_bucket(
        &self,
        period: usize,
        bucket: usize,
        prior: &PriorPeriod,
        first_step: u32,
    ) -> (Decision, u32) {
        let rf = self.grid.ruin_factor(bucket);
        let hazard = self.hazards.rate(period);
        let tie_threshold = 0.5 * (1.0 - hazard);

        // Once above the tie threshold the bucket stays in the near-one form
        let mut near_one = false;
        let mut best = Decision::unset();
        let mut evaluated = 0;

        for step in first_step..=self.grid.allocation_steps {
            if best.probability <= 0.0 {
                break;
            }
            evaluated += 1;

            let law = &self.laws[step as usize];
            let immediate = law.cdf(rf);
            let continuation = if immediate == 1.0 {
                prior.max_probability()
            } else {
                self.continuation(law, rf, immediate, prior)
            };

            let mut probability = 0.0;
            if !near_one {
                probability =
                    (1.0 - hazard) * (immediate + continuation - immediate * continuation);
                if probability > tie_threshold {
                    near_one = true;
                }
            }
            if near_one {
                let survive = (1.0 - immediate) * (1.0 - continuation);
                probability = 1.0 - (hazard + survive - hazard * survive);
            }

            // Ties go to the larger allocation once near certain ruin
            let improves = if near_one {
                probability <= best.probability
            } else {
                probability < best.probability
            };
            if improves {
                best = Decision {
                    probability,
                    allocation: self.grid.allocation(step),
                };
            }
        }

        (best, evaluated)
    }

    /// Probability of later ruin given no ruin this period
    fn continuation(&self, law: &ReturnLaw, rf: f64, immediate: f64, prior: &PriorPeriod) -> f64 {
        let precision = self.grid.bucket_precision as f64;
        let threshold_cdf = |edge: f64| law.cdf(rf * (1.0 + precision / edge));
        let members = prior.pruning_set().buckets();

        // Bucket 1 takes every return above its upper edge
        let mut upper = 1.0;
        let lower = threshold_cdf(1.5);
        let mut expected = (upper - lower) * prior.probability(1);
        upper = lower;

        for &member in members.iter().skip(1) {
            let lower = threshold_cdf(member as f64 + 0.5);
            expected += (upper - lower) * prior.probability(member);
            upper = lower;
        }

        // Returns between the ruin threshold and the grid's last edge
        expected += (upper - immediate) * prior.max_probability();

        expected / (1.0 - immediate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use statrs::distribution::{ContinuousCDF, Normal};

    fn params() -> ModelParameters {
        ModelParameters {
            safe_mean: 0.01,
            safe_variance: 0.0001,
            risky_mean: 0.06,
            risky_variance: 0.03,
            covariance: 0.0,
            rf_max: 1.5,
            expense_ratio: 0.005,
            pruning_decimal_places: 6.0,
        }
    }

    fn deterministic_params() -> ModelParameters {
        ModelParameters {
            safe_mean: 0.25,
            safe_variance: 0.0,
            risky_mean: 0.25,
            risky_variance: 0.0,
            covariance: 0.0,
            rf_max: 2.0,
            expense_ratio: 0.0,
            pruning_decimal_places: 4.0,
        }
    }

    fn prior_from(results: &[PeriodResult], hazard: f64) -> PriorPeriod {
        let probabilities = results.iter().map(|r| r.probability).collect();
        PriorPeriod::from_probabilities(results[0].period, probabilities, hazard).unwrap()
    }

    #[test]
    fn test_terminal_matches_brute_force() {
        let params = params();
        let grid = Discretization::new(20, 10, params.rf_max);
        let hazards = HazardRates::new(vec![0.02, 0.05, 0.1, 1.0]);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);
        let terminal = optimizer.terminal_period();
        assert_eq!(terminal, 2);

        let results = optimizer
            .solve_range(terminal, grid.full_range(), None)
            .unwrap();
        assert_eq!(results.len(), grid.bucket_count());

        for (i, result) in results.iter().enumerate() {
            let rf = (i + 1) as f64 / 20.0;
            let min_cdf = (0..=10)
                .map(|a| {
                    let alpha = a as f64 / 10.0;
                    let mean = 0.995 * (1.0 + alpha * 0.01 + (1.0 - alpha) * 0.06);
                    let var = alpha * alpha * 0.0001 + (1.0 - alpha).powi(2) * 0.03;
                    Normal::new(mean, 0.995 * var.sqrt()).unwrap().cdf(rf)
                })
                .fold(f64::INFINITY, f64::min);
            assert_eq!(result.probability, (1.0 - 0.1) * min_cdf, "bucket {}", i + 1);
        }
    }

    #[test]
    fn test_deterministic_returns_step_at_mean() {
        let params = deterministic_params();
        let grid = Discretization::new(4, 2, params.rf_max);
        let hazards = HazardRates::fixed(2);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);

        // Terminal: ruin exactly when rf reaches the 1.25 gross return
        let terminal = optimizer.solve_range(1, grid.full_range(), None).unwrap();
        let probs: Vec<f64> = terminal.iter().map(|r| r.probability).collect();
        assert_eq!(probs, vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);

        // Every allocation has the same law, so the first one is kept
        assert!(terminal.iter().all(|r| r.allocation == 0.0));

        // One period earlier, rf = 0.75 leaves 0.5 and a next ruin factor of 1.5
        let prior = prior_from(&terminal, 0.0);
        let earlier = optimizer.solve_range(0, grid.full_range(), Some(&prior)).unwrap();
        let probs: Vec<f64> = earlier.iter().map(|r| r.probability).collect();
        assert_eq!(probs, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);

        // Zero ruin keeps the first allocation; certain ruin ties go to alpha = 1
        let allocations: Vec<f64> = earlier.iter().map(|r| r.allocation).collect();
        assert_eq!(allocations, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_search_stops_at_zero_and_after_saturation() {
        let params = deterministic_params();
        let grid = Discretization::new(4, 2, params.rf_max);
        let hazards = HazardRates::fixed(2);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);

        let terminal = optimizer.solve_range(1, grid.full_range(), None).unwrap();
        let prior = prior_from(&terminal, 0.0);
        let scan = optimizer.scan(0, grid.full_range(), &prior, false);

        // Buckets 1-2 stop after a zero, bucket 3 searches all three steps and
        // saturates, the rest only try alpha = 1
        assert_eq!(scan.evaluated, vec![1, 1, 3, 1, 1, 1, 1, 1]);
        assert!(scan.saturated_at.is_none());
    }

    #[test]
    fn test_ties_keep_smallest_allocation_until_near_certain_ruin() {
        // Identical assets: every allocation has the same return law
        let params = ModelParameters {
            safe_mean: 0.25,
            safe_variance: 0.0625,
            risky_mean: 0.25,
            risky_variance: 0.0625,
            covariance: 0.0625,
            rf_max: 2.0,
            expense_ratio: 0.0,
            pruning_decimal_places: 12.0,
        };
        let grid = Discretization::new(4, 2, params.rf_max);
        let hazards = HazardRates::fixed(2);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);

        let terminal = optimizer.solve_range(1, grid.full_range(), None).unwrap();
        assert!(terminal.iter().all(|r| r.allocation == 0.0));
        let prior = prior_from(&terminal, 0.0);
        let earlier = optimizer.solve_range(0, grid.full_range(), Some(&prior)).unwrap();

        assert!(earlier.iter().any(|r| r.probability < 0.5));
        assert!(earlier.iter().any(|r| r.probability > 0.5));
        for r in &earlier {
            let expected = if r.probability > 0.5 { 1.0 } else { 0.0 };
            assert_eq!(r.allocation, expected, "rf {} p {}", r.ruin_factor, r.probability);
        }
    }

    #[test]
    fn test_saturated_buckets_hold_everything_safe() {
        let mut params = params();
        params.pruning_decimal_places = 1.0;
        let grid = Discretization::new(20, 10, params.rf_max);
        let hazards = HazardRates::new(vec![0.0, 0.05, 0.1, 1.0]);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);
        assert_relative_eq!(optimizer.saturation_threshold(1), 0.9, epsilon = 1e-15);

        let terminal = optimizer.solve_range(2, grid.full_range(), None).unwrap();
        let prior = prior_from(&terminal, 0.1);
        let scan = optimizer.scan(1, grid.full_range(), &prior, false);

        let threshold = optimizer.saturation_threshold(1) - SATURATION_SLACK;
        let first = scan
            .results
            .iter()
            .position(|r| r.probability >= threshold)
            .expect("grid should saturate");
        assert!(first + 1 < scan.results.len(), "saturated at the last bucket");
        for (r, &steps) in scan.results[first + 1..].iter().zip(&scan.evaluated[first + 1..]) {
            assert_eq!(r.allocation, 1.0, "rf {}", r.ruin_factor);
            assert_eq!(steps, 1);
        }
    }

    #[test]
    fn test_non_terminal_monotone_in_ruin_factor() {
        let params = params();
        let grid = Discretization::new(20, 10, params.rf_max);
        let hazards = HazardRates::new(vec![0.02, 0.05, 0.1, 1.0]);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);

        let terminal = optimizer.solve_range(2, grid.full_range(), None).unwrap();
        let prior = prior_from(&terminal, 0.1);
        let results = optimizer.solve_range(1, grid.full_range(), Some(&prior)).unwrap();

        for pair in results.windows(2) {
            assert!(
                pair[1].probability >= pair[0].probability - 1e-15,
                "decrease at rf {}: {} -> {}",
                pair[1].ruin_factor,
                pair[0].probability,
                pair[1].probability
            );
        }
        assert!(results.iter().all(|r| r.probability <= 1.0 - 0.05 + 1e-15));
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.allocation)));
    }

    #[test]
    fn test_partition_invariance() {
        let params = params();
        let grid = Discretization::new(20, 10, params.rf_max);
        let hazards = HazardRates::fixed(3);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);

        let terminal = optimizer.solve_range(2, grid.full_range(), None).unwrap();
        let prior = prior_from(&terminal, 0.0);

        let whole = optimizer.solve_range(1, grid.full_range(), Some(&prior)).unwrap();
        let parts: Vec<PeriodResult> = [(1, 9), (10, 17), (18, 30)]
            .iter()
            .flat_map(|&(s, e)| {
                optimizer
                    .solve_range(1, BucketRange::new(s, e), Some(&prior))
                    .unwrap()
            })
            .collect();

        assert_eq!(whole.len(), parts.len());
        // A range that starts past saturation searches its first bucket fully
        let tolerance = 10f64.powf(-params.pruning_decimal_places) + 1e-12;
        for (w, p) in whole.iter().zip(&parts) {
            assert_eq!(w.ruin_factor, p.ruin_factor);
            assert_relative_eq!(w.probability, p.probability, epsilon = tolerance);
        }
    }

    #[test]
    fn test_probe_locates_saturation() {
        let params = deterministic_params();
        let grid = Discretization::new(4, 2, params.rf_max);
        let hazards = HazardRates::fixed(2);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);

        let terminal = optimizer.solve_range(1, grid.full_range(), None).unwrap();
        let prior = prior_from(&terminal, 0.0);

        assert_eq!(optimizer.saturation_threshold(0), 1.0);
        assert_eq!(optimizer.probe(0, &prior).unwrap(), 3);
    }

    #[test]
    fn test_probe_without_saturation_returns_bucket_count() {
        let mut params = deterministic_params();
        params.safe_mean = 10.0;
        params.risky_mean = 10.0;
        let grid = Discretization::new(4, 2, params.rf_max);
        let hazards = HazardRates::fixed(2);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);

        let terminal = optimizer.solve_range(1, grid.full_range(), None).unwrap();
        assert!(terminal.iter().all(|r| r.probability == 0.0));
        let prior = prior_from(&terminal, 0.0);

        assert_eq!(optimizer.probe(0, &prior).unwrap(), grid.bucket_count());
    }

    #[test]
    fn test_probe_at_terminal_is_rejected() {
        let params = params();
        let grid = Discretization::new(20, 10, params.rf_max);
        let hazards = HazardRates::fixed(2);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);
        let prior = PriorPeriod::from_probabilities(2, vec![0.0; 30], 0.0).unwrap();

        assert!(matches!(
            optimizer.probe(1, &prior),
            Err(SolverError::ProbeAtTerminal { period: 1 })
        ));
    }

    #[test]
    fn test_non_terminal_requires_prior() {
        let params = params();
        let grid = Discretization::new(20, 10, params.rf_max);
        let hazards = HazardRates::fixed(3);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);

        assert!(matches!(
            optimizer.solve_range(0, grid.full_range(), None),
            Err(SolverError::MissingPriorPeriod { period: 0 })
        ));
        assert!(matches!(
            optimizer.solve_range(2, BucketRange::new(0, 5), None),
            Err(SolverError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_run_range_writes_keyed_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StageStore::new(dir.path());
        let params = params();
        let grid = Discretization::new(20, 10, params.rf_max);
        let hazards = HazardRates::fixed(2);
        let optimizer = PeriodOptimizer::new(&params, &grid, &hazards);

        let terminal_path = optimizer
            .run_range(1, grid.full_range(), None, &store)
            .unwrap();
        assert_eq!(terminal_path, store.period_path(1));

        let prior = crate::induction::load_prior_period(&store, 0, &grid, 0.0).unwrap();
        let range = BucketRange::new(1, 12);
        let path = optimizer.run_range(0, range, Some(&prior), &store).unwrap();
        assert_eq!(path, store.range_path(0, range));

        let written = crate::store::read_results(&path).unwrap();
        assert_eq!(written.len(), 12);
        assert!(written.iter().all(|r| r.period == 0));
    }
}
