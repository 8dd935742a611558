//! Model configuration: return parameters, discretization grid and horizon
//!
//! The control file carries everything the solver needs except the mortality
//! table. See [`control`] for its on-disk layout.

pub mod control;

pub use control::{load_control_file, parse_control, ControlFile, CONTROL_FILE};

use serde::{Deserialize, Serialize};

use crate::cohort::Person;

/// Default directory holding `control.txt` and `ageprobs.txt`
pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Return-law and pruning parameters for the two-asset mixture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Expected per-period return of the safe asset
    pub safe_mean: f64,
    /// Per-period variance of the safe asset
    pub safe_variance: f64,
    /// Expected per-period return of the risky asset
    pub risky_mean: f64,
    /// Per-period variance of the risky asset
    pub risky_variance: f64,
    /// Covariance between the two assets
    pub covariance: f64,
    /// Largest ruin factor on the grid (RFMax)
    pub rf_max: f64,
    /// Fraction of the portfolio lost to expenses each period
    pub expense_ratio: f64,
    /// Decimal places of the maximum ruin probability that trigger saturation pruning
    pub pruning_decimal_places: f64,
}

impl ModelParameters {
    /// Check the parameters describe a valid normal mixture
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            self.safe_mean,
            self.safe_variance,
            self.risky_mean,
            self.risky_variance,
            self.covariance,
            self.rf_max,
            self.expense_ratio,
            self.pruning_decimal_places,
        ];
        if all.iter().any(|v| !v.is_finite()) {
            return Err("parameters must be finite numbers".to_string());
        }
        if self.safe_variance < 0.0 || self.risky_variance < 0.0 {
            return Err(format!(
                "variances must be non-negative (safe = {}, risky = {})",
                self.safe_variance, self.risky_variance
            ));
        }
        // Keeps the mixture variance non-negative for every allocation
        if self.covariance * self.covariance > self.safe_variance * self.risky_variance {
            return Err(format!(
                "covariance {} exceeds the bound implied by the variances",
                self.covariance
            ));
        }
        if !(0.0..1.0).contains(&self.expense_ratio) {
            return Err(format!("expense ratio {} must lie in [0, 1)", self.expense_ratio));
        }
        if self.rf_max <= 0.0 {
            return Err(format!("RFMax {} must be positive", self.rf_max));
        }
        if self.pruning_decimal_places < 0.0 {
            return Err(format!(
                "pruning decimal places {} must be non-negative",
                self.pruning_decimal_places
            ));
        }
        Ok(())
    }
}

/// Discretized state (ruin factor buckets) and control (allocation steps)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Discretization {
    /// Buckets per unit of ruin factor (PR)
    pub bucket_precision: u32,
    /// Number of allocation steps between 0 and 1 (PA)
    pub allocation_steps: u32,
    /// Largest ruin factor on the grid
    pub rf_max: f64,
}

impl Discretization {
    pub fn new(bucket_precision: u32, allocation_steps: u32, rf_max: f64) -> Self {
        Self {
            bucket_precision,
            allocation_steps,
            rf_max,
        }
    }

    /// N = round(RFMax * PR), half-up
    pub fn bucket_count(&self) -> usize {
        (self.rf_max * self.bucket_precision as f64 + 0.5) as usize
    }

    /// Full bucket range 1..=N
    pub fn full_range(&self) -> BucketRange {
        BucketRange::new(1, self.bucket_count())
    }

    /// Continuous ruin factor of bucket `b`
    pub fn ruin_factor(&self, bucket: usize) -> f64 {
        bucket as f64 / self.bucket_precision as f64
    }

    /// Bucket index nearest to a ruin factor (may fall outside 1..=N)
    pub fn bucket_of(&self, ruin_factor: f64) -> i64 {
        (ruin_factor * self.bucket_precision as f64 + 0.5).floor() as i64
    }

    /// Allocation fraction of step `a`
    pub fn allocation(&self, step: u32) -> f64 {
        step as f64 / self.allocation_steps as f64
    }
}

/// Inclusive range of buckets handled by one optimizer call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketRange {
    pub start: usize,
    pub end: usize,
}

impl BucketRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn buckets(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// How the number of periods is determined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HorizonSpec {
    /// A fixed number of decision periods with no mortality (all hazards zero)
    Fixed(usize),
    /// Periods and hazards derived from the cohort's mortality
    Cohort(Vec<Person>),
}
