//! Per-period portfolio return law for a given safe-asset allocation

use statrs::distribution::{ContinuousCDF, Normal};

use crate::config::ModelParameters;

/// Normal return law of the two-asset mixture, net of expenses
#[derive(Debug, Clone)]
pub struct ReturnLaw {
    mean: f64,
    std_dev: f64,
    /// `None` when the law is degenerate (zero variance)
    normal: Option<Normal>,
}

impl ReturnLaw {
    /// Law of the gross return when `alpha` is held in the safe asset
    pub fn for_allocation(params: &ModelParameters, alpha: f64) -> Self {
        let net = 1.0 - params.expense_ratio;
        let mean = net * (1.0 + alpha * params.safe_mean + (1.0 - alpha) * params.risky_mean);
        let variance = alpha.powi(2) * params.safe_variance
            + (1.0 - alpha).powi(2) * params.risky_variance
            + 2.0 * alpha * (1.0 - alpha) * params.covariance;
        let std_dev = net * variance.max(0.0).sqrt();

        Self {
            mean,
            std_dev,
            normal: Normal::new(mean, std_dev).ok(),
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    /// P(return <= x)
    pub fn cdf(&self, x: f64) -> f64 {
        match &self.normal {
            Some(normal) => normal.cdf(x),
            None if x >= self.mean => 1.0,
            None => 0.0,
        }
    }
}
