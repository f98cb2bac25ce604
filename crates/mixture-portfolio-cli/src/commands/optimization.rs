use clap::Args;
use serde_json::Value;

use mixture_portfolio_core::optimization::continuous::{
    optimize_continuous, ContinuousOptimizationInput,
};
use mixture_portfolio_core::optimization::grid::{optimize_grid, GridOptimizationInput};

use super::log_progress;
use crate::input;

/// Arguments for the exhaustive grid search
#[derive(Args)]
pub struct OptimizeGridArgs {
    /// Path to JSON/YAML file with the optimisation problem
    #[arg(long)]
    pub input: Option<String>,

    /// Override the weight increment
    #[arg(long)]
    pub step: Option<f64>,

    /// Override the CVaR floor (e.g. -0.2)
    #[arg(long, allow_hyphen_values = true)]
    pub cvar_limit: Option<f64>,

    /// Override the number of scenarios
    #[arg(long)]
    pub n_samples: Option<usize>,

    /// Override the RNG seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Drop the per-candidate table and scenario matrix from the output
    #[arg(long)]
    pub summary: bool,
}

/// Arguments for the continuous solver
#[derive(Args)]
pub struct OptimizeContinuousArgs {
    /// Path to JSON/YAML file with the optimisation problem
    #[arg(long)]
    pub input: Option<String>,

    /// Override the CVaR floor (e.g. -0.2)
    #[arg(long, allow_hyphen_values = true)]
    pub cvar_limit: Option<f64>,

    /// Override the number of scenarios
    #[arg(long)]
    pub n_samples: Option<usize>,

    /// Override the RNG seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the solver's iteration cap
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Drop the scenario matrix from the output
    #[arg(long)]
    pub summary: bool,
}

pub fn run_optimize_grid(args: OptimizeGridArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut problem: GridOptimizationInput = input::load(args.input.as_deref(), "optimize-grid")?;
    if let Some(step) = args.step {
        problem.step = step;
    }
    if let Some(limit) = args.cvar_limit {
        problem.cvar_limit = limit;
    }
    if let Some(n) = args.n_samples {
        problem.n_samples = n;
    }
    if args.seed.is_some() {
        problem.seed = args.seed;
    }

    let output = optimize_grid(&problem, &log_progress("optimize-grid"))?;
    let mut value = serde_json::to_value(output)?;
    if args.summary {
        strip_result_fields(&mut value, &["candidates", "scenarios"]);
    }
    Ok(value)
}

pub fn run_optimize_continuous(
    args: OptimizeContinuousArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let mut problem: ContinuousOptimizationInput =
        input::load(args.input.as_deref(), "optimize-continuous")?;
    apply_continuous_overrides(&mut problem, &args);

    let output = optimize_continuous(&problem, &log_progress("optimize-continuous"))?;
    let mut value = serde_json::to_value(output)?;
    if args.summary {
        strip_result_fields(&mut value, &["scenarios"]);
    }
    Ok(value)
}

fn apply_continuous_overrides(problem: &mut ContinuousOptimizationInput, args: &OptimizeContinuousArgs) {
    if let Some(limit) = args.cvar_limit {
        problem.cvar_limit = limit;
    }
    if let Some(n) = args.n_samples {
        problem.n_samples = n;
    }
    if args.seed.is_some() {
        problem.seed = args.seed;
    }
    if let Some(max_iterations) = args.max_iterations {
        problem.solver.max_iterations = max_iterations;
    }
}

fn strip_result_fields(value: &mut Value, fields: &[&str]) {
    if let Some(result) = value.get_mut("result").and_then(Value::as_object_mut) {
        for field in fields {
            result.remove(*field);
        }
    }
}
