//! Backward induction over all periods
//!
//! Periods are solved strictly backward from the terminal one. Within a period
//! the bucket grid is split into ranges sized from the probe's saturation
//! estimate: the first `W - 1` workers share the expensive pre-saturation
//! buckets and the last one takes the cheap saturated tail. Ranges run on a
//! dedicated rayon pool and the period is only combined once every range
//! succeeded.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;

use super::combine::{FinalOutputs, StageCombiner};
use super::optimizer::PeriodOptimizer;
use super::prior::load_prior_period;
use crate::config::{BucketRange, Discretization, ModelParameters};
use crate::error::Result;
use crate::mortality::HazardRates;
use crate::store::StageStore;

/// Smallest worker count; one worker is always reserved for the saturated tail
pub const MIN_WORKERS: usize = 2;

/// Timing and partitioning of one solved period
#[derive(Debug, Clone, Serialize)]
pub struct PeriodReport {
    pub period: usize,
    /// First saturated bucket from the probe; `None` for the terminal period
    pub saturation_bucket: Option<usize>,
    pub pruning_set_size: Option<usize>,
    pub per_worker: usize,
    pub ranges: usize,
    pub execution_time_ms: u64,
}

/// Summary of a complete run
#[derive(Debug, Clone, Serialize)]
pub struct InductionReport {
    pub decision_periods: usize,
    pub buckets: usize,
    pub workers: usize,
    /// Chronological order
    pub periods: Vec<PeriodReport>,
    pub outputs: FinalOutputs,
    pub execution_time_ms: u64,
}

/// Available hardware parallelism, at least [`MIN_WORKERS`]
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(MIN_WORKERS)
        .max(MIN_WORKERS)
}

/// Split `1..=buckets` into at most `workers` ranges
///
/// The first `workers - 1` ranges hold `saturation / (workers - 1)` buckets
/// each; the last range runs to the end of the grid. Empty ranges are dropped.
pub fn partition(buckets: usize, saturation: usize, workers: usize) -> Vec<BucketRange> {
    let workers = workers.max(MIN_WORKERS);
    let per_worker = saturation / (workers - 1);

    let mut ranges: Vec<BucketRange> = (0..workers - 1)
        .map(|i| BucketRange::new(per_worker * i + 1, per_worker * (i + 1)))
        .collect();
    ranges.push(BucketRange::new(per_worker * (workers - 1) + 1, buckets));
    ranges.retain(|r| !r.is_empty());
    ranges
}

pub struct BackwardInduction<'a> {
    params: &'a ModelParameters,
    grid: &'a Discretization,
    hazards: &'a HazardRates,
    store: &'a StageStore,
    workers: usize,
}

impl<'a> BackwardInduction<'a> {
    pub fn new(
        params: &'a ModelParameters,
        grid: &'a Discretization,
        hazards: &'a HazardRates,
        store: &'a StageStore,
        workers: usize,
    ) -> Self {
        Self {
            params,
            grid,
            hazards,
            store,
            workers: workers.max(MIN_WORKERS),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Solve every period and write the final outputs
    pub fn run(&self) -> Result<InductionReport> {
        let started = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        let optimizer = PeriodOptimizer::new(self.params, self.grid, self.hazards);
        let combiner = StageCombiner::new(self.store, self.grid);
        let terminal = self.hazards.terminal_period();
        let buckets = self.grid.bucket_count();

        info!(
            "Backward induction over {} periods, {} buckets, {} allocation steps, {} workers",
            terminal + 1,
            buckets,
            self.grid.allocation_steps,
            self.workers
        );

        let mut periods = Vec::with_capacity(terminal + 1);
        periods.push(self.solve_terminal(&optimizer)?);
        for period in (0..terminal).rev() {
            periods.push(self.solve_period(period, &optimizer, &combiner, &pool)?);
        }
        periods.reverse();

        let outputs = combiner.finalize(terminal + 1)?;
        let execution_time_ms = started.elapsed().as_millis() as u64;
        info!("Backward induction complete in {} ms", execution_time_ms);

        Ok(InductionReport {
            decision_periods: terminal + 1,
            buckets,
            workers: self.workers,
            periods,
            outputs,
            execution_time_ms,
        })
    }

    fn solve_terminal(&self, optimizer: &PeriodOptimizer) -> Result<PeriodReport> {
        let started = Instant::now();
        let period = optimizer.terminal_period();
        info!("Solving terminal period {}", period);

        let buckets = self.grid.bucket_count();
        optimizer.run_range(period, self.grid.full_range(), None, self.store)?;

        let execution_time_ms = started.elapsed().as_millis() as u64;
        info!("Period {} complete in {} ms", period, execution_time_ms);
        Ok(PeriodReport {
            period,
            saturation_bucket: None,
            pruning_set_size: None,
            per_worker: buckets,
            ranges: 1,
            execution_time_ms,
        })
    }

    fn solve_period(
        &self,
        period: usize,
        optimizer: &PeriodOptimizer,
        combiner: &StageCombiner,
        pool: &rayon::ThreadPool,
    ) -> Result<PeriodReport> {
        let started = Instant::now();
        info!("Solving period {}", period);

        let prior = load_prior_period(
            self.store,
            period,
            self.grid,
            self.hazards.rate(period + 1),
        )?;

        let saturation = optimizer.probe(period, &prior)?;
        let per_worker = saturation / (self.workers - 1);
        info!(
            "Period {} saturates near bucket {}; {} buckets per worker",
            period, saturation, per_worker
        );

        let ranges = partition(self.grid.bucket_count(), saturation, self.workers);
        let paths = pool.install(|| {
            ranges
                .par_iter()
                .map(|range| {
                    debug!(
                        "Period {} range {}..={} dispatched",
                        period, range.start, range.end
                    );
                    optimizer.run_range(period, *range, Some(&prior), self.store)
                })
                .collect::<Result<Vec<PathBuf>>>()
        })?;

        combiner.combine_period(period, &paths)?;

        let execution_time_ms = started.elapsed().as_millis() as u64;
        info!("Period {} complete in {} ms", period, execution_time_ms);
        Ok(PeriodReport {
            period,
            saturation_bucket: Some(saturation),
            pruning_set_size: Some(prior.pruning_set().len()),
            per_worker,
            ranges: ranges.len(),
            execution_time_ms,
        })
    }
}
