use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::{draw_scenarios, validate_problem, PortfolioSummary};
use crate::correlation::copula::ScenarioMatrix;
use crate::distributions::mixture::Asset;
use crate::error::PortfolioError;
use crate::risk::metrics::{cvar, portfolio_returns, sharpe, summarize};
use crate::types::{with_metadata, ComputationOutput, ProgressSink, Weight, WeightBounds};
use crate::PortfolioResult;

/// A candidate's weights must sum to one within this tolerance.
pub const SUM_TOLERANCE: f64 = 1e-9;

// Extra room on the pruning tests so accumulated rounding in a partial sum
// never discards a combination the final sum check would accept.
const PRUNE_SLACK: f64 = 1e-12;

const PROGRESS_STRIDE: usize = 64;

/// Finest accepted weight increment; caps the grid near 10 000 values per
/// asset.
pub const MIN_GRID_STEP: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input for the exhaustive grid search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridOptimizationInput {
    pub assets: Vec<Asset>,
    pub correlation_matrix: Vec<Vec<f64>>,
    #[serde(default = "default_n_samples")]
    pub n_samples: usize,
    /// CVaR floor: a portfolio is feasible when its CVaR is at least this.
    #[serde(default = "default_cvar_limit")]
    pub cvar_limit: f64,
    #[serde(default = "default_cvar_alpha")]
    pub cvar_alpha: f64,
    /// Grid spacing for each weight.
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default)]
    pub asset_bounds: Option<Vec<WeightBounds>>,
    /// Fixed seed for reproducible scenarios; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

pub(crate) fn default_n_samples() -> usize {
    10_000
}

pub(crate) fn default_cvar_limit() -> f64 {
    -0.20
}

pub(crate) fn default_cvar_alpha() -> f64 {
    0.05
}

fn default_step() -> f64 {
    0.05
}

/// Risk and return of one grid point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvaluation {
    pub weights: Vec<Weight>,
    /// `None` when the portfolio's returns have zero variance.
    pub sharpe: Option<f64>,
    pub cvar: f64,
    pub mean: f64,
    pub std: f64,
    pub feasible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridOptimizationOutput {
    /// `None` when no candidate satisfies the CVaR floor.
    pub optimal_weights: Option<Vec<Weight>>,
    pub optimal_sharpe: Option<f64>,
    pub optimal_cvar: Option<f64>,
    /// Every evaluated candidate, in enumeration order.
    pub candidates: Vec<CandidateEvaluation>,
    pub n_candidates: usize,
    pub n_feasible: usize,
    pub scenarios: ScenarioMatrix,
    pub portfolio: Option<PortfolioSummary>,
}

// ---------------------------------------------------------------------------
// WeightGrid
// ---------------------------------------------------------------------------

/// Grid values `i * step` for `i in 0..=floor(1 / step)`.
///
/// `step` must lie in `[MIN_GRID_STEP, 1]`.
pub fn grid_values(step: f64) -> PortfolioResult<Vec<f64>> {
    if !(MIN_GRID_STEP..=1.0).contains(&step) {
        return Err(PortfolioError::InvalidInput {
            field: "step".into(),
            reason: format!("Must be in [{MIN_GRID_STEP}, 1], got {step}"),
        });
    }
    let steps = (1.0 / step).floor() as usize + 1;
    Ok((0..steps).map(|i| i as f64 * step).collect())
}

/// Lazy enumeration of the discretised simplex.
///
/// Yields every combination of [`grid_values`] (one per asset) whose sum is
/// within [`SUM_TOLERANCE`] of one and whose coordinates lie inside their
/// bounds, in lexicographic order of the full Cartesian product. Partial
/// prefixes that can no longer reach a unit sum are abandoned, so the
/// product is never materialised.
#[derive(Debug, Clone)]
pub struct WeightGrid {
    values: Vec<f64>,
    /// Per asset, indices into `values` inside that asset's bounds.
    allowed: Vec<Vec<usize>>,
    /// `rest_min[d]` / `rest_max[d]`: smallest / largest total reachable by
    /// assets `d..n`.
    rest_min: Vec<f64>,
    rest_max: Vec<f64>,
    cursor: Vec<usize>,
    /// `sums[d]` is the left-to-right sum of the first `d` coordinates.
    sums: Vec<f64>,
    depth: usize,
    done: bool,
}

impl WeightGrid {
    pub fn new(
        n_assets: usize,
        step: f64,
        asset_bounds: Option<&[WeightBounds]>,
    ) -> PortfolioResult<Self> {
        if n_assets == 0 {
            return Err(PortfolioError::InsufficientData(
                "At least one asset is required".into(),
            ));
        }
        let values = grid_values(step)?;
        if let Some(bounds) = asset_bounds {
            if bounds.len() != n_assets {
                return Err(PortfolioError::InvalidInput {
                    field: "asset_bounds".into(),
                    reason: format!("Expected {n_assets} (min, max) pairs, got {}", bounds.len()),
                });
            }
        }

        let allowed: Vec<Vec<usize>> = (0..n_assets)
            .map(|asset| {
                (0..values.len())
                    .filter(|&k| match asset_bounds {
                        Some(b) => b[asset].0 <= values[k] && values[k] <= b[asset].1,
                        None => true,
                    })
                    .collect()
            })
            .collect();

        let mut rest_min = vec![0.0; n_assets + 1];
        let mut rest_max = vec![0.0; n_assets + 1];
        for d in (0..n_assets).rev() {
            let lo = allowed[d].first().map(|&k| values[k]).unwrap_or(0.0);
            let hi = allowed[d].last().map(|&k| values[k]).unwrap_or(0.0);
            rest_min[d] = rest_min[d + 1] + lo;
            rest_max[d] = rest_max[d + 1] + hi;
        }

        let done = allowed.iter().any(|a| a.is_empty());
        Ok(Self {
            values,
            allowed,
            rest_min,
            rest_max,
            cursor: vec![0; n_assets],
            sums: vec![0.0; n_assets + 1],
            depth: 0,
            done,
        })
    }

    pub fn n_assets(&self) -> usize {
        self.allowed.len()
    }

    fn current(&self) -> Vec<Weight> {
        self.cursor
            .iter()
            .zip(&self.allowed)
            .map(|(&c, allowed)| self.values[allowed[c]])
            .collect()
    }

    // Step back one level and advance the parent cursor.
    fn backtrack(&mut self) {
        if self.depth == 0 {
            self.done = true;
            return;
        }
        if self.depth < self.cursor.len() {
            self.cursor[self.depth] = 0;
        }
        self.depth -= 1;
        self.cursor[self.depth] += 1;
    }
}

impl Iterator for WeightGrid {
    type Item = Vec<Weight>;

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.n_assets();
        while !self.done {
            let d = self.depth;
            if d == n {
                let total = self.sums[n];
                let combo = self.current();
                self.backtrack();
                if (total - 1.0).abs() < SUM_TOLERANCE {
                    return Some(combo);
                }
                continue;
            }

            if self.cursor[d] >= self.allowed[d].len() {
                self.backtrack();
                continue;
            }

            let s = self.sums[d] + self.values[self.allowed[d][self.cursor[d]]];
            if s + self.rest_min[d + 1] > 1.0 + SUM_TOLERANCE + PRUNE_SLACK {
                // Larger values at this level only overshoot further.
                self.cursor[d] = self.allowed[d].len();
                continue;
            }
            if s + self.rest_max[d + 1] < 1.0 - SUM_TOLERANCE - PRUNE_SLACK {
                self.cursor[d] += 1;
                continue;
            }

            self.sums[d + 1] = s;
            self.depth += 1;
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Candidate evaluation
// ---------------------------------------------------------------------------

/// Evaluate one weight vector against fixed scenarios.
pub fn evaluate_candidate(
    weights: &[Weight],
    scenarios: &ScenarioMatrix,
    cvar_limit: f64,
    cvar_alpha: f64,
) -> PortfolioResult<CandidateEvaluation> {
    let returns = portfolio_returns(weights, scenarios)?;
    let tail = cvar(&returns, cvar_alpha)?;
    let sharpe_ratio = match sharpe(&returns, 0.0) {
        Ok(s) => Some(s),
        Err(PortfolioError::DivisionByZero { .. }) => None,
        Err(e) => return Err(e),
    };
    let summary = summarize(&returns);
    Ok(CandidateEvaluation {
        weights: weights.to_vec(),
        sharpe: sharpe_ratio,
        cvar: tail,
        mean: summary.mean,
        std: summary.std,
        feasible: tail >= cvar_limit,
    })
}

/// Evaluate every candidate, preserving input order.
pub fn evaluate_candidates(
    candidates: &[Vec<Weight>],
    scenarios: &ScenarioMatrix,
    cvar_limit: f64,
    cvar_alpha: f64,
    progress: &dyn ProgressSink,
) -> PortfolioResult<Vec<CandidateEvaluation>> {
    let total = candidates.len();
    let completed = AtomicUsize::new(0);

    let evaluate = |w: &Vec<Weight>| {
        let evaluation = evaluate_candidate(w, scenarios, cvar_limit, cvar_alpha);
        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % PROGRESS_STRIDE == 0 || done == total {
            progress.on_progress(done, total);
        }
        evaluation
    };

    #[cfg(feature = "parallel")]
    let evaluated: Vec<PortfolioResult<CandidateEvaluation>> =
        candidates.par_iter().map(evaluate).collect();
    #[cfg(not(feature = "parallel"))]
    let evaluated: Vec<PortfolioResult<CandidateEvaluation>> =
        candidates.iter().map(evaluate).collect();

    evaluated.into_iter().collect()
}

/// Index of the first feasible candidate with the strictly greatest Sharpe.
pub fn select_best(candidates: &[CandidateEvaluation]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, c) in candidates.iter().enumerate() {
        let Some(s) = c.sharpe else { continue };
        if !c.feasible || s.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, best_sharpe)| s > best_sharpe) {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Exhaustive search over the weight grid for the highest-Sharpe portfolio
/// whose CVaR stays at or above `cvar_limit`.
///
/// All candidates share one scenario draw. Finding no feasible candidate is
/// not an error: the optimum fields are `None` and a warning is added.
pub fn optimize_grid(
    input: &GridOptimizationInput,
    progress: &dyn ProgressSink,
) -> PortfolioResult<ComputationOutput<GridOptimizationOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    validate_problem(
        &input.assets,
        &input.correlation_matrix,
        input.n_samples,
        input.cvar_limit,
        input.cvar_alpha,
        input.asset_bounds.as_deref(),
    )?;
    let grid = WeightGrid::new(input.assets.len(), input.step, input.asset_bounds.as_deref())?;

    let drawn = draw_scenarios(
        &input.assets,
        &input.correlation_matrix,
        input.n_samples,
        input.seed,
        progress,
    )?;
    warnings.extend(drawn.warnings);
    let scenarios = drawn.scenarios;

    let weight_sets: Vec<Vec<Weight>> = grid.collect();
    debug!(n_candidates = weight_sets.len(), step = input.step, "enumerated weight grid");
    if weight_sets.is_empty() {
        warnings.push("Weight grid is empty for the given step and bounds".into());
    }

    let candidates = evaluate_candidates(
        &weight_sets,
        &scenarios,
        input.cvar_limit,
        input.cvar_alpha,
        progress,
    )?;

    let undefined = candidates.iter().filter(|c| c.sharpe.is_none()).count();
    if undefined > 0 {
        warnings.push(format!(
            "{undefined} candidate(s) have zero return variance; their Sharpe ratio is undefined"
        ));
    }
    let n_feasible = candidates.iter().filter(|c| c.feasible).count();

    let (optimal_weights, optimal_sharpe, optimal_cvar, portfolio) = match select_best(&candidates) {
        Some(i) => {
            let best = &candidates[i];
            info!(sharpe = ?best.sharpe, cvar = best.cvar, "grid optimum found");
            (
                Some(best.weights.clone()),
                best.sharpe,
                Some(best.cvar),
                Some(PortfolioSummary::from_weights(&best.weights, &scenarios)?),
            )
        }
        None => {
            warn!(cvar_limit = input.cvar_limit, "no feasible portfolio on the grid");
            warnings.push(format!(
                "No feasible portfolio: every candidate has CVaR below {}",
                input.cvar_limit
            ));
            (None, None, None, None)
        }
    };

    let output = GridOptimizationOutput {
        optimal_weights,
        optimal_sharpe,
        optimal_cvar,
        n_candidates: candidates.len(),
        n_feasible,
        candidates,
        scenarios,
        portfolio,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Grid search: max Sharpe subject to CVaR floor (sample average approximation)",
        &serde_json::json!({
            "n_assets": input.assets.len(),
            "n_samples": input.n_samples,
            "cvar_limit": input.cvar_limit,
            "cvar_alpha": input.cvar_alpha,
            "step": input.step,
            "asset_bounds": input.asset_bounds,
            "seed": input.seed,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NoProgress;
    use pretty_assertions::assert_eq;

    const SEED: u64 = 42;

    fn stock() -> Asset {
        Asset::new("Stock", vec![0.8, 0.2], vec![0.15, -0.20], vec![0.12, 0.25]).unwrap()
    }

    fn bond() -> Asset {
        Asset::new("Bond", vec![1.0], vec![0.04], vec![0.03]).unwrap()
    }

    fn two_asset_input() -> GridOptimizationInput {
        GridOptimizationInput {
            assets: vec![stock(), bond()],
            correlation_matrix: vec![vec![1.0, -0.3], vec![-0.3, 1.0]],
            n_samples: 500,
            cvar_limit: -0.30,
            cvar_alpha: 0.05,
            step: 0.2,
            asset_bounds: None,
            seed: Some(SEED),
        }
    }

    /// Reference enumeration: full product, then filter.
    fn brute_force(n: usize, step: f64, bounds: Option<&[WeightBounds]>) -> Vec<Vec<f64>> {
        let values = grid_values(step).unwrap();
        let mut out = Vec::new();
        let mut idx = vec![0usize; n];
        loop {
            let combo: Vec<f64> = idx.iter().map(|&i| values[i]).collect();
            let total: f64 = combo.iter().sum();
            let in_bounds = match bounds {
                Some(b) => combo.iter().zip(b).all(|(w, (lo, hi))| *lo <= *w && *w <= *hi),
                None => true,
            };
            if (total - 1.0).abs() < SUM_TOLERANCE && in_bounds {
                out.push(combo);
            }
            let mut pos = n;
            loop {
                if pos == 0 {
                    return out;
                }
                pos -= 1;
                idx[pos] += 1;
                if idx[pos] < values.len() {
                    break;
                }
                idx[pos] = 0;
            }
        }
    }

    // --- WeightGrid ---

    #[test]
    fn test_grid_values() {
        assert_eq!(grid_values(0.25).unwrap(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(grid_values(1.0).unwrap(), vec![0.0, 1.0]);
        assert_eq!(grid_values(0.3).unwrap().len(), 4);
    }

    #[test]
    fn test_two_asset_grid_in_lexicographic_order() {
        let grid: Vec<Vec<f64>> = WeightGrid::new(2, 0.5, None).unwrap().collect();
        assert_eq!(grid, vec![vec![0.0, 1.0], vec![0.5, 0.5], vec![1.0, 0.0]]);
    }

    #[test]
    fn test_grid_matches_filtered_product() {
        for (n, step) in [(2, 0.1), (3, 0.1), (3, 0.05), (4, 0.2), (3, 0.3)] {
            let lazy: Vec<Vec<f64>> = WeightGrid::new(n, step, None).unwrap().collect();
            assert_eq!(lazy, brute_force(n, step, None), "n={n}, step={step}");
        }
    }

    #[test]
    fn test_grid_matches_filtered_product_with_bounds() {
        let bounds = vec![(0.2, 1.0), (0.0, 0.5), (0.1, 0.6)];
        let lazy: Vec<Vec<f64>> = WeightGrid::new(3, 0.1, Some(&bounds)).unwrap().collect();
        assert!(!lazy.is_empty());
        assert_eq!(lazy, brute_force(3, 0.1, Some(&bounds)));
    }

    #[test]
    fn test_grid_three_assets_count() {
        // Compositions of 10 into 3 non-negative parts: C(12, 2) = 66.
        assert_eq!(WeightGrid::new(3, 0.1, None).unwrap().count(), 66);
    }

    #[test]
    fn test_grid_weights_sum_to_one() {
        for w in WeightGrid::new(4, 0.1, None).unwrap() {
            assert!((w.iter().sum::<f64>() - 1.0).abs() < SUM_TOLERANCE);
        }
    }

    #[test]
    fn test_grid_single_asset() {
        let grid: Vec<Vec<f64>> = WeightGrid::new(1, 0.1, None).unwrap().collect();
        assert_eq!(grid, vec![vec![1.0]]);
    }

    #[test]
    fn test_grid_step_not_dividing_one() {
        // Values 0, 0.3, 0.6, 0.9: no pair reaches exactly one.
        assert_eq!(WeightGrid::new(2, 0.3, None).unwrap().count(), 0);
    }

    #[test]
    fn test_grid_infeasible_bounds_is_empty() {
        let bounds = vec![(0.0, 0.2), (0.0, 0.2)];
        assert_eq!(WeightGrid::new(2, 0.1, Some(&bounds)).unwrap().count(), 0);
    }

    #[test]
    fn test_grid_rejects_bad_step() {
        assert!(WeightGrid::new(2, 0.0, None).is_err());
        assert!(WeightGrid::new(2, -0.1, None).is_err());
        assert!(WeightGrid::new(2, 1.5, None).is_err());
        assert!(WeightGrid::new(2, f64::NAN, None).is_err());
    }

    #[test]
    fn test_grid_rejects_step_below_minimum() {
        assert!(matches!(
            WeightGrid::new(2, 1e-12, None),
            Err(PortfolioError::InvalidInput { .. })
        ));
        assert!(grid_values(MIN_GRID_STEP / 2.0).is_err());
        assert!(grid_values(MIN_GRID_STEP).unwrap().len() >= 10_000);

        let mut input = two_asset_input();
        input.step = 1e-12;
        assert!(matches!(
            optimize_grid(&input, &NoProgress),
            Err(PortfolioError::InvalidInput { .. })
        ));
    }

    // --- Selection ---

    fn candidate(sharpe: Option<f64>, feasible: bool) -> CandidateEvaluation {
        CandidateEvaluation {
            weights: vec![1.0],
            sharpe,
            cvar: -0.1,
            mean: 0.05,
            std: 0.1,
            feasible,
        }
    }

    #[test]
    fn test_select_best_first_wins_ties() {
        let c = vec![
            candidate(Some(0.5), true),
            candidate(Some(0.9), true),
            candidate(Some(0.9), true),
        ];
        assert_eq!(select_best(&c), Some(1));
    }

    #[test]
    fn test_select_best_skips_infeasible_and_undefined() {
        let c = vec![
            candidate(Some(2.0), false),
            candidate(None, true),
            candidate(Some(0.1), true),
        ];
        assert_eq!(select_best(&c), Some(2));
    }

    #[test]
    fn test_select_best_none_feasible() {
        let c = vec![candidate(Some(1.0), false)];
        assert_eq!(select_best(&c), None);
    }

    #[test]
    fn test_select_best_accepts_negative_sharpe() {
        let c = vec![candidate(Some(-0.4), true), candidate(Some(-0.2), true)];
        assert_eq!(select_best(&c), Some(1));
    }

    // --- optimize_grid ---

    #[test]
    fn test_optimize_grid_two_assets() {
        let out = optimize_grid(&two_asset_input(), &NoProgress).unwrap();
        let r = &out.result;
        let w = r.optimal_weights.as_ref().expect("feasible optimum");
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert_eq!(r.n_candidates, 6);
        assert_eq!(r.candidates.len(), 6);
        assert!(r.optimal_cvar.unwrap() >= -0.30);
        assert_eq!(r.scenarios.n_samples(), 500);
        assert_eq!(r.portfolio.as_ref().unwrap().returns.len(), 500);
    }

    #[test]
    fn test_optimize_grid_optimum_dominates_feasible_candidates() {
        let out = optimize_grid(&two_asset_input(), &NoProgress).unwrap();
        let best = out.result.optimal_sharpe.unwrap();
        for c in out.result.candidates.iter().filter(|c| c.feasible) {
            assert!(c.sharpe.unwrap() <= best);
        }
    }

    #[test]
    fn test_optimize_grid_is_reproducible() {
        let a = optimize_grid(&two_asset_input(), &NoProgress).unwrap();
        let b = optimize_grid(&two_asset_input(), &NoProgress).unwrap();
        assert_eq!(a.result.optimal_weights, b.result.optimal_weights);
        assert_eq!(a.result.candidates, b.result.candidates);
    }

    #[test]
    fn test_optimize_grid_respects_bounds() {
        let mut input = two_asset_input();
        input.step = 0.1;
        input.asset_bounds = Some(vec![(0.2, 1.0), (0.0, 0.5)]);
        let out = optimize_grid(&input, &NoProgress).unwrap();
        for c in &out.result.candidates {
            assert!(c.weights[0] >= 0.2 && c.weights[1] <= 0.5);
        }
        let w = out.result.optimal_weights.unwrap();
        assert!(w[0] >= 0.2 && w[1] <= 0.5);
    }

    #[test]
    fn test_optimize_grid_no_feasible_portfolio() {
        let mut input = two_asset_input();
        input.cvar_limit = 0.5;
        let out = optimize_grid(&input, &NoProgress).unwrap();
        assert_eq!(out.result.optimal_weights, None);
        assert_eq!(out.result.optimal_sharpe, None);
        assert_eq!(out.result.optimal_cvar, None);
        assert_eq!(out.result.n_feasible, 0);
        assert!(out.result.portfolio.is_none());
        assert!(out.warnings.iter().any(|w| w.contains("No feasible portfolio")));
    }

    #[test]
    fn test_optimize_grid_reports_progress() {
        use crate::types::ProgressFn;
        let calls = AtomicUsize::new(0);
        let sink = ProgressFn(|done: usize, total: usize| {
            assert!(done <= total);
            calls.fetch_add(1, Ordering::Relaxed);
        });
        optimize_grid(&two_asset_input(), &sink).unwrap();
        assert!(calls.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_optimize_grid_validation() {
        let mut input = two_asset_input();
        input.step = 0.0;
        assert!(optimize_grid(&input, &NoProgress).is_err());

        let mut input = two_asset_input();
        input.asset_bounds = Some(vec![(0.0, 1.0)]);
        assert!(optimize_grid(&input, &NoProgress).is_err());

        let mut input = two_asset_input();
        input.asset_bounds = Some(vec![(0.6, 0.4), (0.0, 1.0)]);
        assert!(optimize_grid(&input, &NoProgress).is_err());

        let mut input = two_asset_input();
        input.cvar_alpha = 1.0;
        assert!(optimize_grid(&input, &NoProgress).is_err());

        let mut input = two_asset_input();
        input.n_samples = 0;
        assert!(optimize_grid(&input, &NoProgress).is_err());
    }

    #[test]
    fn test_optimize_grid_non_pd_correlation_fails() {
        let mut input = two_asset_input();
        input.correlation_matrix = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        assert!(matches!(
            optimize_grid(&input, &NoProgress),
            Err(PortfolioError::NotPositiveDefinite { .. })
        ));
    }

    #[test]
    fn test_input_defaults() {
        let json = r#"{
            "assets": [{"name": "Bond", "weights": [1.0], "means": [0.04], "stds": [0.03]}],
            "correlation_matrix": [[1.0]]
        }"#;
        let input: GridOptimizationInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.n_samples, 10_000);
        assert_eq!(input.cvar_limit, -0.20);
        assert_eq!(input.cvar_alpha, 0.05);
        assert_eq!(input.step, 0.05);
        assert!(input.asset_bounds.is_none());
        assert!(input.seed.is_none());
    }
}
