//! Request/response records for the validate and optimise endpoints.
//!
//! Handlers never fail: every problem, including a malformed request, is
//! reported as `{"error": "..."}` in the response body.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::correlation::validation::{validate_correlation, CorrelationCheck};
use crate::distributions::mixture::Asset;
use crate::optimization::continuous::{
    optimize_continuous, ContinuousOptimizationInput, SolverOptions, CONSTRAINT_TOLERANCE,
};
use crate::optimization::grid::{optimize_grid, GridOptimizationInput};
use crate::risk::metrics::{portfolio_returns, summarize};
use crate::types::{NoProgress, WeightBounds};
use crate::PortfolioResult;

/// Upper limit on scenarios per request.
pub const MAX_SAMPLES: usize = 20_000;
pub const MIN_STEP: f64 = 0.005;
pub const MAX_STEP: f64 = 0.2;

pub const NO_FEASIBLE_PORTFOLIO: &str = "No feasible portfolio found. Try relaxing the CVaR limit.";

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateCorrelationRequest {
    #[serde(default)]
    pub correlation_matrix: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    #[default]
    Grid,
    Continuous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub assets: Vec<Asset>,
    pub correlation_matrix: Vec<Vec<f64>>,
    #[serde(default = "default_cvar_limit")]
    pub cvar_limit: f64,
    /// Capped at [`MAX_SAMPLES`].
    #[serde(default = "default_n_samples")]
    pub n_samples: usize,
    /// `[min, max]` per asset. An empty list means unbounded.
    #[serde(default)]
    pub asset_bounds: Option<Vec<[f64; 2]>>,
    /// Clamped to `[MIN_STEP, MAX_STEP]`.
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub method: OptimizationMethod,
}

fn default_cvar_limit() -> f64 {
    -0.15
}

fn default_n_samples() -> usize {
    5000
}

fn default_step() -> f64 {
    0.05
}

fn default_seed() -> u64 {
    42
}

impl OptimizeRequest {
    pub fn effective_n_samples(&self) -> usize {
        self.n_samples.min(MAX_SAMPLES)
    }

    /// Step after clamping; a NaN step falls back to [`MAX_STEP`].
    pub fn effective_step(&self) -> f64 {
        self.step.min(MAX_STEP).max(MIN_STEP)
    }

    fn bounds(&self) -> Option<Vec<WeightBounds>> {
        match &self.asset_bounds {
            Some(b) if !b.is_empty() => Some(b.iter().map(|[lo, hi]| (*lo, *hi)).collect()),
            _ => None,
        }
    }

    pub fn to_grid_input(&self) -> GridOptimizationInput {
        GridOptimizationInput {
            assets: self.assets.clone(),
            correlation_matrix: self.correlation_matrix.clone(),
            n_samples: self.effective_n_samples(),
            cvar_limit: self.cvar_limit,
            cvar_alpha: 0.05,
            step: self.effective_step(),
            asset_bounds: self.bounds(),
            seed: Some(self.seed),
        }
    }

    pub fn to_continuous_input(&self) -> ContinuousOptimizationInput {
        ContinuousOptimizationInput {
            assets: self.assets.clone(),
            correlation_matrix: self.correlation_matrix.clone(),
            n_samples: self.effective_n_samples(),
            cvar_limit: self.cvar_limit,
            cvar_alpha: 0.05,
            asset_bounds: self.bounds(),
            seed: Some(self.seed),
            solver: SolverOptions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptimizeResponse {
    Success {
        optimal_weights: Vec<f64>,
        /// `None` when not finite.
        sharpe: Option<f64>,
        cvar: Option<f64>,
        mean: f64,
        std: f64,
        portfolio_returns: Vec<f64>,
    },
    Failure {
        error: String,
    },
}

impl OptimizeResponse {
    fn failure(error: impl Into<String>) -> Self {
        OptimizeResponse::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OptimizeResponse::Success { .. })
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub fn handle_validate_correlation(request: &ValidateCorrelationRequest) -> CorrelationCheck {
    validate_correlation(&request.correlation_matrix)
}

/// Decode an optimise request from raw JSON, then handle it. Decoding
/// failures (including invalid assets) become error responses.
pub fn handle_optimize_value(body: serde_json::Value) -> OptimizeResponse {
    match serde_json::from_value::<OptimizeRequest>(body) {
        Ok(request) => handle_optimize(&request),
        Err(e) => OptimizeResponse::failure(e.to_string()),
    }
}

/// Validate the correlation matrix up front, then run the requested
/// optimiser with a fixed seed.
pub fn handle_optimize(request: &OptimizeRequest) -> OptimizeResponse {
    let check = validate_correlation(&request.correlation_matrix);
    if !check.valid {
        return OptimizeResponse::failure(format!("Invalid correlation matrix: {}", check.message));
    }

    match run_optimizer(request) {
        Ok(Some(weights_and_returns)) => weights_and_returns,
        Ok(None) => OptimizeResponse::failure(NO_FEASIBLE_PORTFOLIO),
        Err(e) => {
            if e.is_numerical() {
                warn!(error = %e, "optimiser failed numerically");
            } else {
                debug!(error = %e, "optimise request rejected");
            }
            OptimizeResponse::failure(e.to_string())
        }
    }
}

fn run_optimizer(request: &OptimizeRequest) -> PortfolioResult<Option<OptimizeResponse>> {
    debug!(method = ?request.method, n_assets = request.assets.len(), "handling optimise request");
    let (weights, sharpe, cvar, scenarios) = match request.method {
        OptimizationMethod::Grid => {
            let out = optimize_grid(&request.to_grid_input(), &NoProgress)?.result;
            let Some(weights) = out.optimal_weights else {
                return Ok(None);
            };
            (weights, out.optimal_sharpe, out.optimal_cvar, out.scenarios)
        }
        OptimizationMethod::Continuous => {
            let out = optimize_continuous(&request.to_continuous_input(), &NoProgress)?.result;
            if out.solver.constraint_violation > CONSTRAINT_TOLERANCE {
                return Ok(None);
            }
            (
                out.optimal_weights,
                out.optimal_sharpe,
                Some(out.optimal_cvar),
                out.scenarios,
            )
        }
    };

    let returns = portfolio_returns(&weights, &scenarios)?;
    let summary = summarize(&returns);
    Ok(Some(OptimizeResponse::Success {
        optimal_weights: weights,
        sharpe: sharpe.filter(|s| s.is_finite()),
        cvar: cvar.filter(|c| c.is_finite()),
        mean: summary.mean,
        std: summary.std,
        portfolio_returns: returns,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request_body() -> serde_json::Value {
        json!({
            "assets": [
                {"name": "Stock", "weights": [0.8, 0.2], "means": [0.15, -0.20], "stds": [0.12, 0.25]},
                {"name": "Bond", "weights": [1.0], "means": [0.04], "stds": [0.03]}
            ],
            "correlation_matrix": [[1.0, -0.3], [-0.3, 1.0]],
            "n_samples": 500,
            "cvar_limit": -0.30,
            "step": 0.2
        })
    }

    #[test]
    fn test_validate_correlation_request() {
        let req: ValidateCorrelationRequest =
            serde_json::from_value(json!({"correlation_matrix": [[1.0, 0.3], [0.2, 1.0]]})).unwrap();
        let check = handle_validate_correlation(&req);
        assert!(!check.valid);
        assert_eq!(check.message, "Matrix must be symmetric");
    }

    #[test]
    fn test_validate_correlation_missing_matrix() {
        let req: ValidateCorrelationRequest = serde_json::from_value(json!({})).unwrap();
        assert!(!handle_validate_correlation(&req).valid);
    }

    #[test]
    fn test_request_defaults() {
        let body = json!({
            "assets": [{"name": "Bond", "weights": [1.0], "means": [0.04], "stds": [0.03]}],
            "correlation_matrix": [[1.0]]
        });
        let req: OptimizeRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.cvar_limit, -0.15);
        assert_eq!(req.n_samples, 5000);
        assert_eq!(req.step, 0.05);
        assert_eq!(req.seed, 42);
        assert_eq!(req.method, OptimizationMethod::Grid);
    }

    #[test]
    fn test_request_caps_and_clamps() {
        let mut body = request_body();
        body["n_samples"] = json!(50_000);
        body["step"] = json!(0.5);
        body["asset_bounds"] = json!([]);
        let req: OptimizeRequest = serde_json::from_value(body).unwrap();
        let input = req.to_grid_input();
        assert_eq!(input.n_samples, MAX_SAMPLES);
        assert_eq!(input.step, MAX_STEP);
        assert!(input.asset_bounds.is_none());
        assert_eq!(input.seed, Some(42));

        let mut tiny = req.clone();
        tiny.step = 0.0001;
        assert_eq!(tiny.effective_step(), MIN_STEP);
    }

    #[test]
    fn test_optimize_success_shape() {
        let response = handle_optimize_value(request_body());
        match &response {
            OptimizeResponse::Success {
                optimal_weights,
                sharpe,
                cvar,
                mean,
                std,
                portfolio_returns,
            } => {
                assert!((optimal_weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
                assert!(sharpe.is_some());
                assert!(cvar.unwrap() >= -0.30);
                assert_eq!(portfolio_returns.len(), 500);
                assert!(mean.is_finite() && *std > 0.0);
            }
            OptimizeResponse::Failure { error } => panic!("unexpected failure: {error}"),
        }

        let value = serde_json::to_value(&response).unwrap();
        for key in ["optimal_weights", "sharpe", "cvar", "mean", "std", "portfolio_returns"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_optimize_is_deterministic_with_default_seed() {
        assert_eq!(
            handle_optimize_value(request_body()),
            handle_optimize_value(request_body())
        );
    }

    #[test]
    fn test_optimize_invalid_correlation() {
        let mut body = request_body();
        body["correlation_matrix"] = json!([[0.5, 0.3], [0.3, 1.0]]);
        let response = handle_optimize_value(body);
        assert_eq!(
            response,
            OptimizeResponse::Failure {
                error: "Invalid correlation matrix: Diagonal elements must be 1".into()
            }
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"error": "Invalid correlation matrix: Diagonal elements must be 1"})
        );
    }

    #[test]
    fn test_optimize_no_feasible_portfolio() {
        let mut body = request_body();
        body["cvar_limit"] = json!(0.5);
        assert_eq!(
            handle_optimize_value(body),
            OptimizeResponse::Failure {
                error: NO_FEASIBLE_PORTFOLIO.into()
            }
        );
    }

    #[test]
    fn test_optimize_invalid_asset_is_error_response() {
        let mut body = request_body();
        body["assets"][1]["weights"] = json!([0.5]);
        let response = handle_optimize_value(body);
        assert!(!response.is_success());
    }

    #[test]
    fn test_optimize_continuous_method() {
        let mut body = request_body();
        body["method"] = json!("continuous");
        let response = handle_optimize_value(body);
        match response {
            OptimizeResponse::Success { optimal_weights, .. } => {
                assert!((optimal_weights.iter().sum::<f64>() - 1.0).abs() < 1e-6);
            }
            OptimizeResponse::Failure { error } => panic!("unexpected failure: {error}"),
        }
    }
}
