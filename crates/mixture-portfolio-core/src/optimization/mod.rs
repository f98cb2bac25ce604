pub mod continuous;
pub mod grid;

use serde::{Deserialize, Serialize};

use crate::correlation::copula::{seeded_rng, CopulaSampler, ScenarioMatrix, ScenarioOutput};
use crate::distributions::mixture::Asset;
use crate::error::PortfolioError;
use crate::risk::metrics::{portfolio_returns, summarize};
use crate::types::{ProgressSink, Weight, WeightBounds};
use crate::PortfolioResult;

/// Return series and moments of the selected portfolio over the scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub returns: Vec<f64>,
    pub mean: f64,
    pub std: f64,
}

impl PortfolioSummary {
    pub(crate) fn from_weights(
        weights: &[Weight],
        scenarios: &ScenarioMatrix,
    ) -> PortfolioResult<Self> {
        let returns = portfolio_returns(weights, scenarios)?;
        let summary = summarize(&returns);
        Ok(Self {
            returns,
            mean: summary.mean,
            std: summary.std,
        })
    }
}

/// Checks shared by every optimiser input.
pub(crate) fn validate_problem(
    assets: &[Asset],
    correlation_matrix: &[Vec<f64>],
    n_samples: usize,
    cvar_limit: f64,
    cvar_alpha: f64,
    asset_bounds: Option<&[WeightBounds]>,
) -> PortfolioResult<()> {
    if assets.is_empty() {
        return Err(PortfolioError::InsufficientData(
            "At least one asset is required".into(),
        ));
    }
    if correlation_matrix.len() != assets.len() {
        return Err(PortfolioError::InvalidInput {
            field: "correlation_matrix".into(),
            reason: format!(
                "Expected a {n}x{n} matrix for {n} assets, got {} rows",
                correlation_matrix.len(),
                n = assets.len()
            ),
        });
    }
    if n_samples == 0 {
        return Err(PortfolioError::InvalidInput {
            field: "n_samples".into(),
            reason: "Must be at least 1".into(),
        });
    }
    if !cvar_limit.is_finite() {
        return Err(PortfolioError::InvalidInput {
            field: "cvar_limit".into(),
            reason: "Must be finite".into(),
        });
    }
    if !(cvar_alpha > 0.0 && cvar_alpha < 1.0) {
        return Err(PortfolioError::InvalidInput {
            field: "cvar_alpha".into(),
            reason: format!("Must be in (0, 1), got {cvar_alpha}"),
        });
    }
    if let Some(bounds) = asset_bounds {
        if bounds.len() != assets.len() {
            return Err(PortfolioError::InvalidInput {
                field: "asset_bounds".into(),
                reason: format!(
                    "Expected {} (min, max) pairs, got {}",
                    assets.len(),
                    bounds.len()
                ),
            });
        }
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if !(0.0 <= lo && lo <= hi && hi <= 1.0) {
                return Err(PortfolioError::InvalidInput {
                    field: format!("asset_bounds[{i}]"),
                    reason: format!("Require 0 <= min <= max <= 1, got ({lo}, {hi})"),
                });
            }
        }
    }
    Ok(())
}

/// One sample-average-approximation draw, shared by every candidate.
pub(crate) fn draw_scenarios(
    assets: &[Asset],
    correlation_matrix: &[Vec<f64>],
    n_samples: usize,
    seed: Option<u64>,
    progress: &dyn ProgressSink,
) -> PortfolioResult<ScenarioOutput> {
    let mut rng = seeded_rng(seed);
    CopulaSampler::new(correlation_matrix)?.sample(assets, n_samples, &mut rng, progress)
}
