//! Mortality input and hazard-rate derivation

mod hazard;
mod table;

pub use hazard::{derive_hazard_rates, HazardRates, PROBABILITY_SUM_TOLERANCE};
pub use table::{load_age_table, AgeProbabilityTable, AGE_TABLE_FILE};
