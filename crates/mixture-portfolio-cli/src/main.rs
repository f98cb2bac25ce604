mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::api::OptimizeArgs;
use commands::correlation::ValidateCorrelationArgs;
use commands::diagnostics::CrossValidateArgs;
use commands::optimization::{OptimizeContinuousArgs, OptimizeGridArgs};
use commands::risk::RiskArgs;
use commands::scenarios::SampleArgs;

/// CVaR-constrained portfolio optimisation over mixture-of-normals assets
#[derive(Parser)]
#[command(
    name = "mixport",
    version,
    about = "CVaR-constrained portfolio optimisation over mixture-of-normals assets",
    long_about = "Simulates correlated asset returns from Gaussian-mixture marginals joined \
                  by a Gaussian copula, then searches for the maximum-Sharpe long-only \
                  portfolio whose CVaR stays above a floor. Inputs are JSON or YAML, \
                  read from --input or stdin."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log progress of long-running steps to stderr
    #[arg(long, global = true)]
    progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a correlation matrix is square, symmetric and PSD
    ValidateCorrelation(ValidateCorrelationArgs),
    /// Draw correlated return scenarios
    Sample(SampleArgs),
    /// Exhaustive grid search over simplex weights
    OptimizeGrid(OptimizeGridArgs),
    /// Gradient-based search over continuous weights
    OptimizeContinuous(OptimizeContinuousArgs),
    /// K-fold out-of-sample check of the grid optimum
    CrossValidate(CrossValidateArgs),
    /// Run an optimise request and print the response body
    Optimize(OptimizeArgs),
    /// Tail-risk metrics (VaR, CVaR, Sharpe) for a return series
    Risk(RiskArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(progress: bool) {
    let default_level = if progress { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.progress);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::ValidateCorrelation(args) => commands::correlation::run_validate_correlation(args),
        Commands::Sample(args) => commands::scenarios::run_sample(args),
        Commands::OptimizeGrid(args) => commands::optimization::run_optimize_grid(args),
        Commands::OptimizeContinuous(args) => commands::optimization::run_optimize_continuous(args),
        Commands::CrossValidate(args) => commands::diagnostics::run_cross_validate(args),
        Commands::Optimize(args) => commands::api::run_optimize(args),
        Commands::Risk(args) => commands::risk::run_risk(args),
        Commands::Version => {
            println!("mixport {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
