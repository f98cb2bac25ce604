use clap::Args;
use serde_json::Value;

use mixture_portfolio_core::risk::metrics::{analyze_returns, RiskReportInput};

use crate::input;

/// Arguments for tail-risk metrics on a return sample
#[derive(Args)]
pub struct RiskArgs {
    /// Path to JSON/YAML file: either a bare array of returns or an
    /// object with a `returns` field
    #[arg(long)]
    pub input: Option<String>,

    /// Comma-separated returns (e.g. "0.05,0.02,-0.01,0.03")
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub returns: Option<Vec<f64>>,

    /// Tail probability (0.05 = worst 5%)
    #[arg(long, default_value = "0.05")]
    pub alpha: f64,

    /// Per-period risk-free rate for the Sharpe ratio
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    pub risk_free_rate: f64,
}

pub fn run_risk(args: RiskArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let returns = match args.returns {
        Some(returns) => returns,
        None => returns_from_value(input::load_value(args.input.as_deref(), "risk")?)?,
    };
    let report_input = RiskReportInput {
        returns,
        alpha: args.alpha,
        risk_free_rate: args.risk_free_rate,
    };
    let output = analyze_returns(&report_input)?;
    Ok(serde_json::to_value(output)?)
}

fn returns_from_value(data: Value) -> Result<Vec<f64>, Box<dyn std::error::Error>> {
    let array = match data {
        Value::Array(_) => data,
        Value::Object(mut map) => map
            .remove("returns")
            .ok_or("Input object must contain a 'returns' array")?,
        _ => return Err("Expected an array of returns or an object with a 'returns' key".into()),
    };
    Ok(serde_json::from_value(array)?)
}
