use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::correlation::copula::ScenarioMatrix;
use crate::error::PortfolioError;
use crate::types::{with_metadata, ComputationOutput, Rate, Weight};
use crate::PortfolioResult;

/// Standard deviations at or below this (relative to `max(|mean|, 1)`) are
/// treated as zero when computing a Sharpe ratio.
pub const ZERO_VARIANCE_TOL: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Mean and population standard deviation of a return sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnSummary {
    pub mean: f64,
    pub std: f64,
}

/// Input for a stand-alone tail-risk report on a return sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReportInput {
    /// Return observations (as decimals).
    pub returns: Vec<Rate>,
    /// Tail probability (0.05 = worst 5%).
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub risk_free_rate: Rate,
}

fn default_alpha() -> f64 {
    0.05
}

/// Tail-risk report for one return sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub cvar: f64,
    pub var: f64,
    /// `None` when the sample has zero variance.
    pub sharpe: Option<f64>,
    pub mean: f64,
    pub std: f64,
    pub n_observations: usize,
    /// Number of observations averaged into the CVaR.
    pub tail_count: usize,
}

// ---------------------------------------------------------------------------
// Core metrics
// ---------------------------------------------------------------------------

/// One portfolio return per scenario: `S · w`.
pub fn portfolio_returns(weights: &[Weight], scenarios: &ScenarioMatrix) -> PortfolioResult<Vec<f64>> {
    if weights.len() != scenarios.n_assets() {
        return Err(PortfolioError::InvalidInput {
            field: "weights".into(),
            reason: format!(
                "Expected {} weights for {} assets, got {}",
                scenarios.n_assets(),
                scenarios.n_assets(),
                weights.len()
            ),
        });
    }
    Ok(scenarios
        .rows()
        .map(|row| row.iter().zip(weights).map(|(r, w)| r * w).sum())
        .collect())
}

/// Number of lowest observations averaged by [`cvar`]: `⌊n·α⌋`, but never
/// less than one.
pub fn tail_count(n: usize, alpha: f64) -> usize {
    ((n as f64 * alpha).floor() as usize).clamp(1, n.max(1))
}

fn validate_sample(returns: &[f64], alpha: f64) -> PortfolioResult<()> {
    if returns.is_empty() {
        return Err(PortfolioError::InvalidInput {
            field: "returns".into(),
            reason: "At least one return observation is required".into(),
        });
    }
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Err(PortfolioError::InvalidInput {
            field: "alpha".into(),
            reason: format!("Tail probability must be in (0, 1], got {alpha}"),
        });
    }
    Ok(())
}

/// Conditional Value-at-Risk: mean of the worst `⌊n·α⌋` returns.
///
/// When `n·α < 1` the tail would be empty; the single worst return is used
/// instead.
pub fn cvar(returns: &[f64], alpha: f64) -> PortfolioResult<f64> {
    validate_sample(returns, alpha)?;
    let k = tail_count(returns.len(), alpha);
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Ok(sorted[..k].iter().sum::<f64>() / k as f64)
}

/// Value-at-Risk: the `α`-th percentile of `returns`, linearly interpolated
/// between order statistics.
pub fn var(returns: &[f64], alpha: f64) -> PortfolioResult<f64> {
    validate_sample(returns, alpha)?;
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Ok(percentile_sorted(&sorted, alpha))
}

/// Percentile of a **sorted** slice, `p` in `[0, 1]`.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Sharpe ratio: mean excess return over its population standard deviation.
pub fn sharpe(returns: &[f64], risk_free_rate: Rate) -> PortfolioResult<f64> {
    if returns.is_empty() {
        return Err(PortfolioError::InsufficientData(
            "At least one return observation is required".into(),
        ));
    }
    let excess: Vec<f64> = returns.iter().map(|r| r - risk_free_rate).collect();
    let ReturnSummary { mean, std } = summarize(&excess);
    if std <= ZERO_VARIANCE_TOL * mean.abs().max(1.0) {
        return Err(PortfolioError::DivisionByZero {
            context: "Sharpe ratio (zero return variance)".into(),
        });
    }
    Ok(mean / std)
}

/// Mean and population standard deviation. An empty slice yields NaNs.
pub fn summarize(returns: &[f64]) -> ReturnSummary {
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    ReturnSummary {
        mean,
        std: variance.sqrt(),
    }
}

// ---------------------------------------------------------------------------
// Public API: risk report
// ---------------------------------------------------------------------------

/// CVaR, VaR, Sharpe and summary statistics for a return sample.
pub fn analyze_returns(input: &RiskReportInput) -> PortfolioResult<ComputationOutput<RiskReport>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    validate_sample(&input.returns, input.alpha)?;
    if input.returns.iter().any(|r| !r.is_finite()) {
        return Err(PortfolioError::InvalidInput {
            field: "returns".into(),
            reason: "All returns must be finite".into(),
        });
    }

    let n = input.returns.len();
    let raw_tail = (n as f64 * input.alpha).floor() as usize;
    if raw_tail == 0 {
        warnings.push(format!(
            "Tail of {n} x {} is empty; CVaR uses the single worst observation",
            input.alpha
        ));
    }

    let summary = summarize(&input.returns);
    let sharpe_ratio = match sharpe(&input.returns, input.risk_free_rate) {
        Ok(s) => Some(s),
        Err(PortfolioError::DivisionByZero { .. }) => {
            warnings.push("Returns have zero variance; Sharpe ratio is undefined".into());
            None
        }
        Err(e) => return Err(e),
    };

    let output = RiskReport {
        cvar: cvar(&input.returns, input.alpha)?,
        var: var(&input.returns, input.alpha)?,
        sharpe: sharpe_ratio,
        mean: summary.mean,
        std: summary.std,
        n_observations: n,
        tail_count: tail_count(n, input.alpha),
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Historical CVaR / VaR and Sharpe ratio",
        &serde_json::json!({
            "observations": n,
            "alpha": input.alpha,
            "risk_free_rate": input.risk_free_rate,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
