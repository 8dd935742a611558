//! Merging of range outputs into period files and the final summaries

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::config::Discretization;
use crate::error::{Result, SolverError};
use crate::store::{read_results, PeriodResult, StageStore};

/// Paths produced by the final combine
#[derive(Debug, Clone, serde::Serialize)]
pub struct FinalOutputs {
    pub master: PathBuf,
    pub probabilities: PathBuf,
    pub allocations: PathBuf,
}

/// Bucket-by-period grid of results, `cells[bucket - 1][period]`
type Cells = Vec<Vec<Option<PeriodResult>>>;

pub struct StageCombiner<'a> {
    store: &'a StageStore,
    grid: &'a Discretization,
}

impl<'a> StageCombiner<'a> {
    pub fn new(store: &'a StageStore, grid: &'a Discretization) -> Self {
        Self { store, grid }
    }

    /// Concatenate range files (already in ascending range order) into the
    /// period file, then delete them
    pub fn combine_period(&self, period: usize, ranges: &[PathBuf]) -> Result<PathBuf> {
        let output = self.store.period_path(period);
        self.store.concatenate(ranges, &output)?;
        self.store.remove_all(ranges)?;
        Ok(output)
    }

    /// Build the master file for periods `0..periods` and its transposed
    /// probability and allocation tables
    pub fn finalize(&self, periods: usize) -> Result<FinalOutputs> {
        let period_files: Vec<PathBuf> =
            (0..periods).map(|t| self.store.period_path(t)).collect();

        let master = self.store.master_path();
        self.store.concatenate(&period_files, &master)?;
        self.store.remove_all(&period_files)?;

        let records = read_results(&master)?;
        let cells = self.tabulate(&records, periods, &master)?;

        let probabilities = self.store.probability_table_path();
        self.write_transposed(&probabilities, &cells, |r| format!("{:e}", r.probability))?;
        let allocations = self.store.allocation_table_path();
        self.write_transposed(&allocations, &cells, |r| r.allocation.to_string())?;

        info!("Master results written to {}", master.display());
        info!(
            "Summary tables written to {} and {}",
            probabilities.display(),
            allocations.display()
        );

        Ok(FinalOutputs {
            master,
            probabilities,
            allocations,
        })
    }

    /// Place each record by its ruin factor's bucket; every cell must be filled
    fn tabulate(&self, records: &[PeriodResult], periods: usize, path: &Path) -> Result<Cells> {
        let n = self.grid.bucket_count();
        let mut cells: Cells = vec![vec![None; periods]; n];

        for record in records.iter().filter(|r| r.period < periods) {
            let bucket = self.grid.bucket_of(record.ruin_factor);
            if bucket < 1 || bucket as usize > n {
                return Err(SolverError::BucketOutOfRange {
                    path: path.to_path_buf(),
                    ruin_factor: record.ruin_factor,
                });
            }
            cells[bucket as usize - 1][record.period] = Some(*record);
        }

        for period in 0..periods {
            let missing = cells.iter().filter(|row| row[period].is_none()).count();
            if missing > 0 {
                return Err(SolverError::IncompletePeriod { period, missing });
            }
        }

        Ok(cells)
    }

    fn write_transposed(
        &self,
        path: &Path,
        cells: &Cells,
        format_value: impl Fn(&PeriodResult) -> String,
    ) -> Result<()> {
        let file = File::create(path).map_err(|e| SolverError::io(path, e))?;
        let mut out = BufWriter::new(file);

        let periods = cells.first().map_or(0, Vec::len);
        let mut header = String::from("RF");
        for t in 0..periods {
            header.push_str(&format!(", Time (t={})", t));
        }
        writeln!(out, "{}", header).map_err(|e| SolverError::io(path, e))?;

        for (i, row) in cells.iter().enumerate() {
            let mut line = format!("{:.10}", self.grid.ruin_factor(i + 1));
            for record in row.iter().flatten() {
                line.push(',');
                line.push_str(&format_value(record));
            }
            writeln!(out, "{}", line).map_err(|e| SolverError::io(path, e))?;
        }

        out.flush().map_err(|e| SolverError::io(path, e))
    }
}
