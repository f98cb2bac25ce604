use clap::Args;
use serde_json::Value;

use mixture_portfolio_core::api::handlers::{handle_validate_correlation, ValidateCorrelationRequest};

use crate::input;

/// Arguments for correlation-matrix validation
#[derive(Args)]
pub struct ValidateCorrelationArgs {
    /// Path to JSON/YAML file with a `correlation_matrix` field
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_validate_correlation(
    args: ValidateCorrelationArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let request: ValidateCorrelationRequest =
        input::load(args.input.as_deref(), "validate-correlation")?;
    let check = handle_validate_correlation(&request);
    Ok(serde_json::to_value(check)?)
}
