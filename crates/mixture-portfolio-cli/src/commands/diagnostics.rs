use clap::Args;
use serde_json::Value;

use mixture_portfolio_core::diagnostics::cross_validation::{detect_overfitting, CrossValidationInput};

use super::log_progress;
use crate::input;

/// Arguments for k-fold cross-validation of the grid optimum
#[derive(Args)]
pub struct CrossValidateArgs {
    /// Path to JSON/YAML file with the optimisation problem
    #[arg(long)]
    pub input: Option<String>,

    /// Override the number of folds
    #[arg(long)]
    pub n_folds: Option<usize>,

    /// Override the RNG seed
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run_cross_validate(args: CrossValidateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut cv: CrossValidationInput = input::load(args.input.as_deref(), "cross-validate")?;
    if let Some(n_folds) = args.n_folds {
        cv.n_folds = n_folds;
    }
    if args.seed.is_some() {
        cv.seed = args.seed;
    }

    let output = detect_overfitting(&cv, &log_progress("cross-validate"))?;
    Ok(serde_json::to_value(output)?)
}
