//! Death-at-age probability table
//!
//! Each row gives, for one age, the probability that a life observed from the
//! table's first age dies at that age. Columns are per sex and must each sum
//! to one.

use std::path::Path;

use crate::cohort::Sex;
use crate::error::{Result, SolverError};

/// Name of the age probability file inside the config directory
pub const AGE_TABLE_FILE: &str = "ageprobs.txt";

/// Death-at-age probabilities over a contiguous age range
#[derive(Debug, Clone, PartialEq)]
pub struct AgeProbabilityTable {
    start_age: u32,
    /// Index = age - start_age
    male: Vec<f64>,
    /// Index = age - start_age
    female: Vec<f64>,
}

impl AgeProbabilityTable {
    /// Build from `(age, male_prob, female_prob)` rows
    pub fn from_rows(rows: &[(u32, f64, f64)]) -> std::result::Result<Self, String> {
        let first = rows.first().ok_or_else(|| "table has no rows".to_string())?;
        let start_age = first.0;

        let mut male = Vec::with_capacity(rows.len());
        let mut female = Vec::with_capacity(rows.len());
        for (i, &(age, m, f)) in rows.iter().enumerate() {
            if age != start_age + i as u32 {
                return Err(format!(
                    "ages must be contiguous: expected {}, found {}",
                    start_age + i as u32,
                    age
                ));
            }
            if !(m >= 0.0 && f >= 0.0) {
                return Err(format!("age {} has a negative or missing probability", age));
            }
            male.push(m);
            female.push(f);
        }

        Ok(Self {
            start_age,
            male,
            female,
        })
    }

    /// First age covered by the table
    pub fn start_age(&self) -> u32 {
        self.start_age
    }

    pub fn probabilities(&self, sex: Sex) -> &[f64] {
        match sex {
            Sex::Male => &self.male,
            Sex::Female => &self.female,
        }
    }

    /// Oldest age with a non-zero death probability
    pub fn max_age(&self, sex: Sex) -> Option<u32> {
        self.probabilities(sex)
            .iter()
            .rposition(|&p| p > 0.0)
            .map(|i| self.start_age + i as u32)
    }

    /// Column sum, accumulated from the oldest age down
    pub fn probability_sum(&self, sex: Sex) -> f64 {
        self.probabilities(sex).iter().rev().sum()
    }
}

/// Load `ageprobs.txt` from a config directory
pub fn load_age_table(config_dir: &Path) -> Result<AgeProbabilityTable> {
    let path = config_dir.join(AGE_TABLE_FILE);
    let table_error = |message: String| SolverError::AgeTable {
        path: path.clone(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(&path)
        .map_err(|e| SolverError::csv(&path, e))?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| SolverError::csv(&path, e))?;
        let fields: Vec<&str> = record.iter().filter(|f| !f.is_empty()).collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() != 3 {
            return Err(table_error(format!(
                "expected `age male female`, found {} field(s) on line {}",
                fields.len(),
                record.position().map(|p| p.line()).unwrap_or(0)
            )));
        }
        let age: u32 = fields[0]
            .parse()
            .map_err(|_| table_error(format!("invalid age: {}", fields[0])))?;
        let male: f64 = fields[1]
            .parse()
            .map_err(|_| table_error(format!("invalid male probability: {}", fields[1])))?;
        let female: f64 = fields[2]
            .parse()
            .map_err(|_| table_error(format!("invalid female probability: {}", fields[2])))?;
        rows.push((age, male, female));
    }

    AgeProbabilityTable::from_rows(&rows).map_err(table_error)
}
