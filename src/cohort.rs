//! Cohort description: the people whose joint survival ends the decumulation

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sex of a cohort member, selecting the mortality column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m" | "male" => Ok(Sex::Male),
            "f" | "female" => Ok(Sex::Female),
            other => Err(format!("unknown sex token: {}", other)),
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Male => write!(f, "M"),
            Sex::Female => write!(f, "F"),
        }
    }
}

/// A single cohort member at the start of retirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub sex: Sex,
    pub start_age: u32,
}

impl Person {
    pub fn new(sex: Sex, start_age: u32) -> Self {
        Self { sex, start_age }
    }
}

/// Which death ends the cohort's "active" status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum JointLifeStatus {
    /// Terminates at the first death: joint CDF = 1 - prod(1 - CDF_i)
    #[default]
    FirstDeath,
    /// Terminates once every member has died: joint CDF = prod(CDF_i)
    LastSurvivor,
}

impl JointLifeStatus {
    /// Fold per-person cumulative death probabilities for one period
    pub fn combine(&self, cdfs: impl Iterator<Item = f64>) -> f64 {
        match self {
            JointLifeStatus::FirstDeath => 1.0 - cdfs.map(|c| 1.0 - c).product::<f64>(),
            JointLifeStatus::LastSurvivor => cdfs.product(),
        }
    }
}
