//! Ruin Solver CLI
//!
//! Reads `control.txt` (and `ageprobs.txt` for cohort horizons) from the config
//! directory, solves every period and writes the results to the output
//! directory. Use `--json` to print the run report for downstream tooling.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use ruin_solver::config::{load_control_file, HorizonSpec, DEFAULT_CONFIG_DIR};
use ruin_solver::induction::{default_workers, BackwardInduction};
use ruin_solver::mortality::{derive_hazard_rates, load_age_table, HazardRates};
use ruin_solver::{JointLifeStatus, StageStore};

#[derive(Parser, Debug)]
#[command(
    name = "ruin_solver",
    about = "Minimize the probability of ruin in retirement by backward induction"
)]
struct Cli {
    /// Directory holding control.txt and ageprobs.txt
    #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Directory for intermediate and final results (defaults to the config directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Worker threads per period, at least 2 (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// How the cohort's deaths end the decumulation
    #[arg(long, value_enum, default_value_t = JointLifeStatus::FirstDeath)]
    joint_status: JointLifeStatus,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let start = Instant::now();

    let control = load_control_file(&cli.config_dir).context("Failed to load control file")?;
    let output_dir = cli.output_dir.unwrap_or_else(|| cli.config_dir.clone());
    let store = StageStore::create(&output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let hazards = match &control.horizon {
        HorizonSpec::Fixed(periods) => {
            info!("Fixed horizon of {} periods with no mortality", periods);
            HazardRates::fixed(*periods)
        }
        HorizonSpec::Cohort(cohort) => {
            let table = load_age_table(&cli.config_dir).context("Failed to load age table")?;
            let hazards = derive_hazard_rates(&table, cohort, cli.joint_status)
                .context("Failed to derive hazard rates")?;
            let path = store.write_hazard_rates(hazards.as_slice())?;
            info!("Hazard rates written to {}", path.display());
            hazards
        }
    };

    let workers = cli.workers.unwrap_or_else(default_workers);
    let report = BackwardInduction::new(&control.params, &control.grid, &hazards, &store, workers)
        .run()
        .context("Backward induction failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    info!("Total time: {:?}", start.elapsed());
    Ok(())
}
