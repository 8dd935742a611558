//! Staged result store
//!
//! Every intermediate and final file the solver touches is keyed here by
//! period and bucket range, so no other module builds file names. Records are
//! space-delimited `period ruin_factor probability allocation` rows written
//! with the shortest round-trip float representation, which keeps the
//! period-to-period hand-off lossless.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::BucketRange;
use crate::error::{Result, SolverError};

/// Name of the master chronological results file
pub const MASTER_FILE: &str = "results_by_period.txt";
/// Transposed table of minimized ruin probabilities
pub const PROBABILITY_TABLE: &str = "ruin_probabilities.csv";
/// Transposed table of optimal allocations
pub const ALLOCATION_TABLE: &str = "allocations.csv";
/// Derived hazard rates, kept for auditability
pub const HAZARD_FILE: &str = "hazard_rates.txt";

/// Optimal decision for one (period, bucket)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodResult {
    pub period: usize,
    pub ruin_factor: f64,
    pub probability: f64,
    pub allocation: f64,
}

#[derive(Debug, Serialize)]
struct HazardRow {
    period: usize,
    rate: f64,
}

/// File-backed store rooted at the output directory
#[derive(Debug, Clone)]
pub struct StageStore {
    root: PathBuf,
}

impl StageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the store and its directory if missing
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root).map_err(|e| SolverError::io(&store.root, e))?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========================================================================
    // KEYS
    // ========================================================================

    /// Output of one worker for one period
    pub fn range_path(&self, period: usize, range: BucketRange) -> PathBuf {
        self.root
            .join(format!("period_{}_buckets_{}_{}.txt", period, range.start, range.end))
    }

    /// Combined output of one period
    pub fn period_path(&self, period: usize) -> PathBuf {
        self.root.join(format!("period_{}.txt", period))
    }

    pub fn master_path(&self) -> PathBuf {
        self.root.join(MASTER_FILE)
    }

    pub fn probability_table_path(&self) -> PathBuf {
        self.root.join(PROBABILITY_TABLE)
    }

    pub fn allocation_table_path(&self) -> PathBuf {
        self.root.join(ALLOCATION_TABLE)
    }

    pub fn hazard_path(&self) -> PathBuf {
        self.root.join(HAZARD_FILE)
    }

    // ========================================================================
    // RECORDS
    // ========================================================================

    /// Write one worker's results under its (period, range) key
    pub fn write_range(
        &self,
        period: usize,
        range: BucketRange,
        results: &[PeriodResult],
    ) -> Result<PathBuf> {
        let path = self.range_path(period, range);
        write_results(&path, results)?;
        Ok(path)
    }

    /// Write a whole period's results directly under its period key
    pub fn write_period(&self, period: usize, results: &[PeriodResult]) -> Result<PathBuf> {
        let path = self.period_path(period);
        write_results(&path, results)?;
        Ok(path)
    }

    pub fn read_period(&self, period: usize) -> Result<Vec<PeriodResult>> {
        read_results(&self.period_path(period))
    }

    /// Persist the hazard-rate sequence as `period rate` rows
    pub fn write_hazard_rates(&self, rates: &[f64]) -> Result<PathBuf> {
        let path = self.hazard_path();
        let mut writer = space_writer(&path)?;
        for (period, &rate) in rates.iter().enumerate() {
            writer
                .serialize(HazardRow { period, rate })
                .map_err(|e| SolverError::csv(&path, e))?;
        }
        writer.flush().map_err(|e| SolverError::io(&path, e))?;
        Ok(path)
    }

    // ========================================================================
    // FILE OPERATIONS
    // ========================================================================

    /// Concatenate `inputs` in order into `output`
    pub fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let file = File::create(output).map_err(|e| SolverError::io(output, e))?;
        let mut writer = BufWriter::new(file);
        for input in inputs {
            let mut reader = File::open(input).map_err(|e| SolverError::io(input, e))?;
            io::copy(&mut reader, &mut writer).map_err(|e| SolverError::io(output, e))?;
        }
        writer.flush().map_err(|e| SolverError::io(output, e))
    }

    pub fn remove_all(&self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            fs::remove_file(path).map_err(|e| SolverError::io(path, e))?;
        }
        Ok(())
    }
}

/// Write result records to `path`, replacing any existing file
pub fn write_results(path: &Path, results: &[PeriodResult]) -> Result<()> {
    let mut writer = space_writer(path)?;
    for result in results {
        writer
            .serialize(result)
            .map_err(|e| SolverError::csv(path, e))?;
    }
    writer.flush().map_err(|e| SolverError::io(path, e))
}

/// Read every result record from `path`
pub fn read_results(path: &Path) -> Result<Vec<PeriodResult>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_path(path)
        .map_err(|e| SolverError::csv(path, e))?;

    let mut results = Vec::new();
    for row in reader.deserialize() {
        let record: PeriodResult = row.map_err(|e| SolverError::csv(path, e))?;
        results.push(record);
    }
    Ok(results)
}

fn space_writer(path: &Path) -> Result<csv::Writer<File>> {
    csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_path(path)
        .map_err(|e| SolverError::csv(path, e))
}
