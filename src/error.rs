//! Error types shared by every stage of the solver
//!
//! All errors are fatal for the run: bad input cannot be retried into shape and
//! the intermediate store is assumed to be locally writable.

use std::path::PathBuf;

use crate::cohort::Sex;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, SolverError>;

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid control file {path}: {message}")]
    Control { path: PathBuf, message: String },

    #[error("invalid age probability table {path}: {message}")]
    AgeTable { path: PathBuf, message: String },

    /// Death-at-age probabilities must each sum to one
    #[error("age probabilities do not sum to 1 (male sum = {male}, female sum = {female})")]
    ProbabilitySum { male: f64, female: f64 },

    #[error(
        "person #{person} ({sex}) has start age {age}, outside the table's valid range {min_age}..={max_age}"
    )]
    AgeOutOfRange {
        person: usize,
        sex: Sex,
        age: u32,
        min_age: u32,
        max_age: u32,
    },

    #[error("cohort leaves {horizon} period(s) on the hazard schedule; at least 2 are required")]
    HorizonTooShort { horizon: usize },

    /// Prior-period probabilities broke monotonicity or their bounds
    #[error(
        "corrupted probabilities for period {period}: bucket {bucket} holds {current} after {previous} (ceiling {ceiling})"
    )]
    CorruptPriorPeriod {
        period: usize,
        bucket: usize,
        previous: f64,
        current: f64,
        ceiling: f64,
    },

    #[error("period {period} is missing results for {missing} bucket(s)")]
    IncompletePeriod { period: usize, missing: usize },

    #[error("record in {path} has ruin factor {ruin_factor}, outside the bucket grid")]
    BucketOutOfRange { path: PathBuf, ruin_factor: f64 },

    #[error("bucket range {start}..={end} does not fit the grid of {buckets} buckets")]
    InvalidRange {
        start: usize,
        end: usize,
        buckets: usize,
    },

    #[error("probe requested for terminal period {period}; the terminal period is solved in one call")]
    ProbeAtTerminal { period: usize },

    #[error("period {period} is not terminal and needs the prior period's probabilities")]
    MissingPriorPeriod { period: usize },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl SolverError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SolverError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        SolverError::Csv {
            path: path.into(),
            source,
        }
    }
}
