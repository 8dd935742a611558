//! Hazard rates for the cohort's joint active status
//!
//! Each person's death-at-age column is shifted to their start age and
//! renormalized on survival to it, giving a per-person CDF over periods. The
//! per-person CDFs are folded into a joint termination CDF (first death or
//! last survivor) and converted to conditional per-period hazards.

use log::{info, warn};
use serde::Serialize;

use super::table::AgeProbabilityTable;
use crate::cohort::{JointLifeStatus, Person, Sex};
use crate::error::{Result, SolverError};

/// Tolerance on probability columns summing to one
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-15;

/// Conditional termination probabilities, one per period
///
/// `rates[t]` is the probability the cohort's active status ends in period `t`
/// given it survived to `t`. The final entry belongs to the terminal age, at
/// which no allocation decision is made, so a schedule of length `L` carries
/// `L - 1` decision periods.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HazardRates {
    rates: Vec<f64>,
}

impl HazardRates {
    pub fn new(rates: Vec<f64>) -> Self {
        Self { rates }
    }

    /// Zero hazards for a fixed number of decision periods
    pub fn fixed(periods: usize) -> Self {
        Self {
            rates: vec![0.0; periods + 1],
        }
    }

    /// Length of the schedule (decision periods plus the terminal age)
    pub fn horizon(&self) -> usize {
        self.rates.len()
    }

    /// Number of periods with an allocation decision
    pub fn decision_periods(&self) -> usize {
        self.rates.len().saturating_sub(1)
    }

    /// Last decision period, solved without a continuation value
    pub fn terminal_period(&self) -> usize {
        self.decision_periods().saturating_sub(1)
    }

    /// Hazard of period `t`
    pub fn rate(&self, period: usize) -> f64 {
        self.rates[period]
    }

    /// Largest probability of ruin attainable in period `t`
    pub fn max_ruin_probability(&self, period: usize) -> f64 {
        1.0 - self.rates[period]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.rates
    }
}

/// Derive the cohort's hazard schedule from an age probability table
pub fn derive_hazard_rates(
    table: &AgeProbabilityTable,
    cohort: &[Person],
    status: JointLifeStatus,
) -> Result<HazardRates> {
    let male_sum = table.probability_sum(Sex::Male);
    let female_sum = table.probability_sum(Sex::Female);
    if (male_sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE
        || (female_sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE
    {
        return Err(SolverError::ProbabilitySum {
            male: male_sum,
            female: female_sum,
        });
    }

    // Validate ages and find the longest remaining lifetime
    let mut horizon = 0usize;
    for (i, person) in cohort.iter().enumerate() {
        let max_age = table.max_age(person.sex).unwrap_or(table.start_age());
        if person.start_age < table.start_age() || person.start_age > max_age {
            return Err(SolverError::AgeOutOfRange {
                person: i + 1,
                sex: person.sex,
                age: person.start_age,
                min_age: table.start_age(),
                max_age,
            });
        }
        horizon = horizon.max((max_age - person.start_age + 1) as usize);
    }
    if horizon < 2 {
        return Err(SolverError::HorizonTooShort { horizon });
    }

    let cdfs: Vec<Vec<f64>> = cohort
        .iter()
        .enumerate()
        .map(|(i, person)| person_cdf(table, person, i + 1, horizon))
        .collect();

    let joint: Vec<f64> = (0..horizon)
        .map(|t| status.combine(cdfs.iter().map(|cdf| cdf[t])))
        .collect();

    let mut rates = Vec::with_capacity(horizon);
    rates.push(joint[0]);
    for t in 1..horizon {
        let surviving = 1.0 - joint[t - 1];
        let rate = if surviving <= 0.0 {
            1.0
        } else {
            ((joint[t] - joint[t - 1]) / surviving).clamp(0.0, 1.0)
        };
        rates.push(rate);
    }

    info!(
        "Derived {} hazard rates for a cohort of {} ({:?})",
        rates.len(),
        cohort.len(),
        status
    );

    Ok(HazardRates::new(rates))
}

/// Cumulative death probability by period, conditional on surviving to the start age
fn person_cdf(
    table: &AgeProbabilityTable,
    person: &Person,
    number: usize,
    horizon: usize,
) -> Vec<f64> {
    let column = table.probabilities(person.sex);
    let offset = (person.start_age - table.start_age()) as usize;
    let remaining = &column[offset..];
    let surviving: f64 = remaining.iter().rev().sum();

    let mut pmf = vec![0.0; horizon];
    for (slot, &p) in pmf.iter_mut().zip(remaining.iter()) {
        *slot = p / surviving;
    }

    let total: f64 = pmf.iter().sum();
    if (total - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        warn!(
            "Conditional probabilities for person #{} sum to {} rather than 1",
            number, total
        );
    }

    let mut cumulative = 0.0;
    pmf.iter()
        .map(|p| {
            cumulative += p;
            cumulative
        })
        .collect()
}
