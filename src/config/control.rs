//! Control file loader
//!
//! The control file is a stream of whitespace-separated tokens:
//!
//! ```text
//! safe_mean safe_var risky_mean risky_var cov rf_max expense_ratio prune_places
//! bucket_precision allocation_steps
//! n [sex age]*n        (n > 0: cohort)   |   0 periods   (fixed horizon)
//! ```

use std::fs;
use std::path::Path;

use super::{Discretization, HorizonSpec, ModelParameters};
use crate::cohort::{Person, Sex};
use crate::error::{Result, SolverError};

/// Name of the control file inside the config directory
pub const CONTROL_FILE: &str = "control.txt";

/// Parsed contents of the control file
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFile {
    pub params: ModelParameters,
    pub grid: Discretization,
    pub horizon: HorizonSpec,
}

/// Load `control.txt` from a config directory
pub fn load_control_file(config_dir: &Path) -> Result<ControlFile> {
    let path = config_dir.join(CONTROL_FILE);
    let text = fs::read_to_string(&path).map_err(|e| SolverError::io(&path, e))?;
    parse_control(&text).map_err(|message| SolverError::Control { path, message })
}

/// Parse control file text
pub fn parse_control(text: &str) -> std::result::Result<ControlFile, String> {
    let mut tokens = text.split_whitespace();

    let mut reals = [0.0_f64; 8];
    for (i, slot) in reals.iter_mut().enumerate() {
        *slot = next_parsed(&mut tokens, &format!("parameter #{}", i + 1))?;
    }
    let params = ModelParameters {
        safe_mean: reals[0],
        safe_variance: reals[1],
        risky_mean: reals[2],
        risky_variance: reals[3],
        covariance: reals[4],
        rf_max: reals[5],
        expense_ratio: reals[6],
        pruning_decimal_places: reals[7],
    };
    params.validate()?;

    let bucket_precision: u32 = next_parsed(&mut tokens, "bucket precision")?;
    let allocation_steps: u32 = next_parsed(&mut tokens, "allocation steps")?;
    if bucket_precision == 0 || allocation_steps == 0 {
        return Err("bucket precision and allocation steps must be at least 1".to_string());
    }
    let grid = Discretization::new(bucket_precision, allocation_steps, params.rf_max);
    if grid.bucket_count() == 0 {
        return Err(format!(
            "RFMax {} with precision {} leaves no buckets",
            params.rf_max, bucket_precision
        ));
    }

    let persons: usize = next_parsed(&mut tokens, "cohort size")?;
    let horizon = if persons > 0 {
        let mut cohort = Vec::with_capacity(persons);
        for i in 0..persons {
            let sex_token = tokens
                .next()
                .ok_or_else(|| format!("missing sex for person #{}", i + 1))?;
            let sex: Sex = sex_token
                .parse()
                .map_err(|e| format!("person #{}: {}", i + 1, e))?;
            let start_age: u32 = next_parsed(&mut tokens, &format!("age of person #{}", i + 1))?;
            cohort.push(Person::new(sex, start_age));
        }
        HorizonSpec::Cohort(cohort)
    } else {
        let periods: usize = next_parsed(&mut tokens, "fixed number of periods")?;
        if periods == 0 {
            return Err("fixed horizon must be at least one period".to_string());
        }
        HorizonSpec::Fixed(periods)
    };

    if let Some(extra) = tokens.next() {
        return Err(format!("unexpected trailing token: {}", extra));
    }

    Ok(ControlFile {
        params,
        grid,
        horizon,
    })
}

fn next_parsed<'a, T, I>(tokens: &mut I, what: &str) -> std::result::Result<T, String>
where
    T: std::str::FromStr,
    I: Iterator<Item = &'a str>,
{
    let token = tokens.next().ok_or_else(|| format!("missing {}", what))?;
    token
        .parse()
        .map_err(|_| format!("invalid {}: {}", what, token))
}
