use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use crate::correlation::copula::ScenarioMatrix;
use crate::distributions::mixture::Asset;
use crate::error::PortfolioError;
use crate::optimization::grid::{evaluate_candidates, select_best, WeightGrid};
use crate::optimization::{draw_scenarios, validate_problem};
use crate::risk::metrics::{cvar, portfolio_returns, sharpe};
use crate::types::{with_metadata, ComputationOutput, NoProgress, ProgressSink, Weight};
use crate::PortfolioResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input for k-fold out-of-sample validation of the grid optimiser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationInput {
    pub assets: Vec<Asset>,
    pub correlation_matrix: Vec<Vec<f64>>,
    #[serde(default = "default_n_samples")]
    pub n_samples: usize,
    #[serde(default = "default_n_folds")]
    pub n_folds: usize,
    #[serde(default = "default_cvar_limit")]
    pub cvar_limit: f64,
    #[serde(default = "default_cvar_alpha")]
    pub cvar_alpha: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    /// Train-minus-test Sharpe above which the fit is flagged as overfit.
    #[serde(default = "default_degradation_threshold")]
    pub degradation_threshold: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_n_samples() -> usize {
    10_000
}

fn default_n_folds() -> usize {
    5
}

fn default_cvar_limit() -> f64 {
    -0.20
}

fn default_cvar_alpha() -> f64 {
    0.05
}

fn default_step() -> f64 {
    0.10
}

fn default_degradation_threshold() -> f64 {
    0.1
}

/// In-sample optimum of one fold and its held-out performance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub weights: Vec<Weight>,
    pub train_sharpe: Option<f64>,
    pub test_sharpe: Option<f64>,
    pub train_cvar: f64,
    pub test_cvar: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationOutput {
    pub fold_results: Vec<FoldResult>,
    /// Folds with no feasible training portfolio.
    pub skipped_folds: Vec<usize>,
    pub mean_train_sharpe: f64,
    pub mean_test_sharpe: f64,
    pub sharpe_degradation: f64,
    /// Population standard deviation of each asset's weight across folds.
    pub weight_stability: Vec<f64>,
    pub overfitting_detected: bool,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Split one scenario draw into contiguous folds, grid-optimise on each
/// training set and score the optimum on the held-out fold.
///
/// Folds are `n_samples / n_folds` rows each; any remainder rows always stay
/// in the training set.
pub fn detect_overfitting(
    input: &CrossValidationInput,
    progress: &dyn ProgressSink,
) -> PortfolioResult<ComputationOutput<CrossValidationOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    validate_problem(
        &input.assets,
        &input.correlation_matrix,
        input.n_samples,
        input.cvar_limit,
        input.cvar_alpha,
        None,
    )?;
    if input.n_folds < 2 {
        return Err(PortfolioError::InvalidInput {
            field: "n_folds".into(),
            reason: "At least 2 folds are required".into(),
        });
    }
    let fold_size = input.n_samples / input.n_folds;
    if fold_size == 0 {
        return Err(PortfolioError::InsufficientData(format!(
            "{} samples cannot fill {} folds",
            input.n_samples, input.n_folds
        )));
    }

    let weight_sets: Vec<Vec<Weight>> = WeightGrid::new(input.assets.len(), input.step, None)?.collect();
    let drawn = draw_scenarios(
        &input.assets,
        &input.correlation_matrix,
        input.n_samples,
        input.seed,
        &NoProgress,
    )?;
    warnings.extend(drawn.warnings);
    let scenarios = drawn.scenarios;

    let mut fold_results = Vec::new();
    let mut skipped_folds = Vec::new();
    for fold in 0..input.n_folds {
        let test_start = fold * fold_size;
        let test_end = test_start + fold_size;
        let train = scenarios.without_rows(test_start, test_end);
        let test = scenarios.slice_rows(test_start, test_end);

        let candidates = evaluate_candidates(
            &weight_sets,
            &train,
            input.cvar_limit,
            input.cvar_alpha,
            &NoProgress,
        )?;
        progress.on_progress(fold + 1, input.n_folds);

        let Some(best) = select_best(&candidates) else {
            debug!(fold, "no feasible training portfolio; skipping fold");
            skipped_folds.push(fold);
            continue;
        };
        let weights = candidates[best].weights.clone();
        fold_results.push(score_fold(fold, weights, &train, &test, input.cvar_alpha)?);
    }

    if fold_results.is_empty() {
        return Err(PortfolioError::InsufficientData(
            "No fold produced a feasible portfolio; try relaxing the CVaR limit".into(),
        ));
    }
    if !skipped_folds.is_empty() {
        warnings.push(format!(
            "{} fold(s) had no feasible portfolio and were skipped",
            skipped_folds.len()
        ));
    }

    let mean_train_sharpe = mean_defined(fold_results.iter().map(|f| f.train_sharpe));
    let mean_test_sharpe = mean_defined(fold_results.iter().map(|f| f.test_sharpe));
    let sharpe_degradation = mean_train_sharpe - mean_test_sharpe;
    let overfitting_detected = sharpe_degradation > input.degradation_threshold;
    if overfitting_detected {
        warn!(sharpe_degradation, "out-of-sample Sharpe degradation above threshold");
        warnings.push(format!(
            "Sharpe degrades by {sharpe_degradation:.4} out of sample; the optimum may be overfit"
        ));
    }

    let weight_stability = weight_dispersion(&fold_results, input.assets.len());

    let output = CrossValidationOutput {
        fold_results,
        skipped_folds,
        mean_train_sharpe,
        mean_test_sharpe,
        sharpe_degradation,
        weight_stability,
        overfitting_detected,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Contiguous k-fold cross-validation of the CVaR-constrained grid optimum",
        &serde_json::json!({
            "n_samples": input.n_samples,
            "n_folds": input.n_folds,
            "fold_size": fold_size,
            "cvar_limit": input.cvar_limit,
            "cvar_alpha": input.cvar_alpha,
            "step": input.step,
            "degradation_threshold": input.degradation_threshold,
            "seed": input.seed,
        }),
        warnings,
        elapsed,
        output,
    ))
}

fn score_fold(
    fold: usize,
    weights: Vec<Weight>,
    train: &ScenarioMatrix,
    test: &ScenarioMatrix,
    cvar_alpha: f64,
) -> PortfolioResult<FoldResult> {
    let train_returns = portfolio_returns(&weights, train)?;
    let test_returns = portfolio_returns(&weights, test)?;
    Ok(FoldResult {
        fold,
        train_sharpe: sharpe(&train_returns, 0.0).ok(),
        test_sharpe: sharpe(&test_returns, 0.0).ok(),
        train_cvar: cvar(&train_returns, cvar_alpha)?,
        test_cvar: cvar(&test_returns, cvar_alpha)?,
        weights,
    })
}

/// Mean over the defined values; NaN when none are defined.
fn mean_defined(values: impl Iterator<Item = Option<f64>>) -> f64 {
    let defined: Vec<f64> = values.flatten().collect();
    defined.iter().sum::<f64>() / defined.len() as f64
}

fn weight_dispersion(folds: &[FoldResult], n_assets: usize) -> Vec<f64> {
    let n = folds.len() as f64;
    (0..n_assets)
        .map(|asset| {
            let mean = folds.iter().map(|f| f.weights[asset]).sum::<f64>() / n;
            let variance = folds
                .iter()
                .map(|f| (f.weights[asset] - mean).powi(2))
                .sum::<f64>()
                / n;
            variance.sqrt()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
