use clap::Args;
use serde_json::Value;

use mixture_portfolio_core::api::handlers::handle_optimize_value;

use crate::input;

/// Arguments for the request/response optimisation contract
#[derive(Args)]
pub struct OptimizeArgs {
    /// Path to JSON/YAML request body
    #[arg(long)]
    pub input: Option<String>,
}

/// Runs one optimise request. Failures are part of the response body, so
/// this only errors when no request can be read at all.
pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let body = input::load_value(args.input.as_deref(), "optimize")?;
    let response = handle_optimize_value(body);
    if !response.is_success() {
        tracing::warn!("optimise request returned an error response");
    }
    Ok(serde_json::to_value(response)?)
}
