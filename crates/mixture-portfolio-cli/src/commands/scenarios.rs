use clap::Args;
use serde_json::Value;

use mixture_portfolio_core::correlation::copula::{generate_scenarios, ScenarioInput};

use super::log_progress;
use crate::input;

/// Arguments for scenario generation
#[derive(Args)]
pub struct SampleArgs {
    /// Path to JSON/YAML file with assets and correlation matrix
    #[arg(long)]
    pub input: Option<String>,

    /// Override the number of scenarios
    #[arg(long)]
    pub n_samples: Option<usize>,

    /// Override the RNG seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Sample each asset on its own, ignoring the correlation matrix
    #[arg(long)]
    pub independent: bool,
}

pub fn run_sample(args: SampleArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut scenario_input: ScenarioInput = input::load(args.input.as_deref(), "sample")?;
    if let Some(n) = args.n_samples {
        scenario_input.n_samples = n;
    }
    if args.seed.is_some() {
        scenario_input.seed = args.seed;
    }
    scenario_input.independent |= args.independent;

    let output = generate_scenarios(&scenario_input, &log_progress("sample"))?;
    Ok(serde_json::to_value(output)?)
}
