//! Continuous max-Sharpe optimisation under a CVaR floor.
//!
//! The weights live on the bounded simplex `{w : Σw = 1, lo ≤ w ≤ hi}`.
//! The CVaR inequality is handled by an augmented Lagrangian outer loop;
//! each subproblem is solved by projected gradient descent with central
//! finite-difference gradients and Armijo backtracking. The projection onto
//! the bounded simplex is exact, so every iterate satisfies the budget and
//! box constraints.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::grid::{default_cvar_alpha, default_cvar_limit, default_n_samples};
use super::{draw_scenarios, validate_problem, PortfolioSummary};
use crate::correlation::copula::ScenarioMatrix;
use crate::distributions::mixture::Asset;
use crate::distributions::root_finding::{Bisection, RootFinder};
use crate::error::PortfolioError;
use crate::risk::metrics::{cvar, portfolio_returns, sharpe};
use crate::types::{with_metadata, ComputationOutput, ProgressSink, Weight, WeightBounds};
use crate::PortfolioResult;

/// CVaR shortfall below the floor tolerated at a reported solution.
pub const CONSTRAINT_TOLERANCE: f64 = 1e-6;

const FD_STEP: f64 = 1e-6;
const ARMIJO_SIGMA: f64 = 1e-4;
const MAX_BACKTRACKS: u32 = 40;
const MAX_OUTER_ITERATIONS: u32 = 20;
const INITIAL_PENALTY: f64 = 10.0;
const PENALTY_GROWTH: f64 = 10.0;
const PROJECTION_XTOL: f64 = 1e-15;
const MULTIPLIER_TOLERANCE: f64 = 1e-3;
const STATIONARITY_STEP: f64 = 1e-4;
const STATIONARITY_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Stopping rules for the gradient solver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Relative change in the merit function below which a subproblem is
    /// considered solved.
    #[serde(default = "default_ftol")]
    pub ftol: f64,
    /// Budget of projected-gradient iterations across all outer rounds.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_ftol() -> f64 {
    1e-8
}

fn default_max_iterations() -> u32 {
    100
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            ftol: default_ftol(),
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousOptimizationInput {
    pub assets: Vec<Asset>,
    pub correlation_matrix: Vec<Vec<f64>>,
    #[serde(default = "default_n_samples")]
    pub n_samples: usize,
    #[serde(default = "default_cvar_limit")]
    pub cvar_limit: f64,
    #[serde(default = "default_cvar_alpha")]
    pub cvar_alpha: f64,
    /// Per-asset weight bounds; `[0, 1]` each when absent.
    #[serde(default)]
    pub asset_bounds: Option<Vec<WeightBounds>>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub solver: SolverOptions,
}

/// How the solver terminated. Non-convergence is reported here, not raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverOutcome {
    pub success: bool,
    pub message: String,
    pub iterations: u32,
    pub function_evaluations: usize,
    /// `max(0, cvar_limit - cvar)` at the reported weights.
    pub constraint_violation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousOptimizationOutput {
    pub optimal_weights: Vec<Weight>,
    /// `None` when the optimum has zero return variance.
    pub optimal_sharpe: Option<f64>,
    pub optimal_cvar: f64,
    pub solver: SolverOutcome,
    pub scenarios: ScenarioMatrix,
    pub portfolio: PortfolioSummary,
}

// ---------------------------------------------------------------------------
// Bounded simplex projection
// ---------------------------------------------------------------------------

/// Euclidean projection of `v` onto `{w : Σw = 1, lower ≤ w ≤ upper}`.
///
/// The projection is `clamp(v - τ, lower, upper)` for the shift `τ` that
/// makes the weights sum to one; `τ` is found by bisection. Requires
/// `Σlower ≤ 1 ≤ Σupper`.
pub fn project_onto_bounded_simplex(
    v: &[f64],
    lower: &[f64],
    upper: &[f64],
) -> PortfolioResult<Vec<f64>> {
    let clamped_sum = |tau: f64| -> f64 {
        v.iter()
            .zip(lower.iter().zip(upper))
            .map(|(x, (lo, hi))| (x - tau).clamp(*lo, *hi))
            .sum::<f64>()
            - 1.0
    };

    // At `tau_low` every coordinate sits at its upper bound, at `tau_high`
    // at its lower bound.
    let tau_low = v
        .iter()
        .zip(upper)
        .map(|(x, hi)| x - hi)
        .fold(f64::INFINITY, f64::min);
    let tau_high = v
        .iter()
        .zip(lower)
        .map(|(x, lo)| x - lo)
        .fold(f64::NEG_INFINITY, f64::max);

    let xtol = PROJECTION_XTOL * (1.0 + tau_low.abs().max(tau_high.abs()));
    let tau = Bisection::default().solve(&clamped_sum, tau_low, tau_high, xtol, 1.0)?;
    Ok(v.iter()
        .zip(lower.iter().zip(upper))
        .map(|(x, (lo, hi))| (x - tau).clamp(*lo, *hi))
        .collect())
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

struct Evaluation {
    neg_sharpe: f64,
    /// `cvar - cvar_limit`, non-negative when feasible.
    constraint: f64,
}

struct AugmentedLagrangian<'a> {
    scenarios: &'a ScenarioMatrix,
    cvar_limit: f64,
    cvar_alpha: f64,
    lower: Vec<f64>,
    upper: Vec<f64>,
    options: SolverOptions,
    evaluations: usize,
    iterations: u32,
}

impl AugmentedLagrangian<'_> {
    fn evaluate(&mut self, w: &[f64]) -> PortfolioResult<Evaluation> {
        self.evaluations += 1;
        let returns = portfolio_returns(w, self.scenarios)?;
        // A zero-variance portfolio earns no Sharpe credit.
        let neg_sharpe = match sharpe(&returns, 0.0) {
            Ok(s) => -s,
            Err(PortfolioError::DivisionByZero { .. }) => 0.0,
            Err(e) => return Err(e),
        };
        Ok(Evaluation {
            neg_sharpe,
            constraint: cvar(&returns, self.cvar_alpha)? - self.cvar_limit,
        })
    }

    fn merit(&mut self, w: &[f64], lambda: f64, rho: f64) -> PortfolioResult<f64> {
        let e = self.evaluate(w)?;
        let shifted = (lambda - rho * e.constraint).max(0.0);
        Ok(e.neg_sharpe + (shifted * shifted - lambda * lambda) / (2.0 * rho))
    }

    fn gradient(&mut self, w: &[f64], lambda: f64, rho: f64) -> PortfolioResult<Vec<f64>> {
        let mut grad = vec![0.0; w.len()];
        let mut probe = w.to_vec();
        for i in 0..w.len() {
            probe[i] = w[i] + FD_STEP;
            let up = self.merit(&probe, lambda, rho)?;
            probe[i] = w[i] - FD_STEP;
            let down = self.merit(&probe, lambda, rho)?;
            probe[i] = w[i];
            grad[i] = (up - down) / (2.0 * FD_STEP);
        }
        Ok(grad)
    }

    fn project(&self, v: &[f64]) -> PortfolioResult<Vec<f64>> {
        project_onto_bounded_simplex(v, &self.lower, &self.upper)
    }

    /// Projected gradient descent on the merit function for fixed
    /// multiplier and penalty. Returns whether the subproblem converged
    /// before the iteration budget ran out.
    fn solve_subproblem(
        &mut self,
        w: &mut Vec<f64>,
        lambda: f64,
        rho: f64,
        progress: &dyn ProgressSink,
    ) -> PortfolioResult<bool> {
        let budget = self.options.max_iterations;
        let mut current = self.merit(w, lambda, rho)?;
        let mut step = 1.0;

        while self.iterations < budget {
            let grad = self.gradient(w, lambda, rho)?;

            let mut accepted: Option<(Vec<f64>, f64)> = None;
            let mut t = step;
            for _ in 0..MAX_BACKTRACKS {
                let trial: Vec<f64> = w.iter().zip(&grad).map(|(x, g)| x - t * g).collect();
                let candidate = self.project(&trial)?;
                let descent: f64 = grad
                    .iter()
                    .zip(candidate.iter().zip(w.iter()))
                    .map(|(g, (c, x))| g * (c - x))
                    .sum();
                let value = self.merit(&candidate, lambda, rho)?;
                if value <= current + ARMIJO_SIGMA * descent {
                    accepted = Some((candidate, value));
                    break;
                }
                t *= 0.5;
            }

            self.iterations += 1;
            progress.on_progress(self.iterations as usize, budget as usize);

            let Some((candidate, value)) = accepted else {
                // No descent along the projected gradient: stationary.
                return Ok(true);
            };

            let moved = candidate
                .iter()
                .zip(w.iter())
                .map(|(c, x)| (c - x).abs())
                .fold(0.0, f64::max);
            let change = (current - value).abs();
            *w = candidate;
            let scale = current.abs().max(value.abs()).max(1.0);
            current = value;
            step = (2.0 * t).min(1.0);

            if moved < 1e-12 || change <= self.options.ftol * scale {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// First-order test on the bounded simplex. Every feasible direction
    /// is a combination of pairwise transfers `e_i - e_j`, so the point is
    /// stationary when no transfer of `STATIONARITY_STEP` that stays inside
    /// the box and above the CVaR floor raises the Sharpe ratio by more than
    /// `STATIONARITY_TOLERANCE` (relative). Finite transfers keep the test
    /// meaningful at the kinks of the empirical CVaR.
    fn is_stationary(&mut self, w: &[f64]) -> PortfolioResult<bool> {
        let base = self.evaluate(w)?;
        let tolerance = STATIONARITY_TOLERANCE * base.neg_sharpe.abs().max(1.0);
        let mut trial = w.to_vec();
        for i in 0..w.len() {
            if w[i] + STATIONARITY_STEP > self.upper[i] {
                continue;
            }
            for j in 0..w.len() {
                if i == j || w[j] - STATIONARITY_STEP < self.lower[j] {
                    continue;
                }
                trial[i] = w[i] + STATIONARITY_STEP;
                trial[j] = w[j] - STATIONARITY_STEP;
                let moved = self.evaluate(&trial)?;
                trial[i] = w[i];
                trial[j] = w[j];
                let feasible = moved.constraint >= -CONSTRAINT_TOLERANCE;
                if feasible && base.neg_sharpe - moved.neg_sharpe > tolerance {
                    debug!(to = i, from = j, "feasible ascent direction remains");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn run(
        &mut self,
        x0: &[f64],
        progress: &dyn ProgressSink,
    ) -> PortfolioResult<(Vec<f64>, SolverOutcome)> {
        let mut w = self.project(x0)?;
        let mut lambda = 0.0_f64;
        let mut rho = INITIAL_PENALTY;
        let mut previous_violation = f64::INFINITY;
        let mut message = String::from("Outer iteration limit reached");

        for outer in 0..MAX_OUTER_ITERATIONS {
            let converged = self.solve_subproblem(&mut w, lambda, rho, progress)?;
            let g = self.evaluate(&w)?.constraint;
            let violation = (-g).max(0.0);
            let next_lambda = (lambda - rho * g).max(0.0);
            debug!(outer, lambda, rho, violation, iterations = self.iterations, "augmented Lagrangian round");

            if !converged || self.iterations >= self.options.max_iterations {
                message = "Iteration limit reached".into();
                break;
            }
            // On an active floor the multiplier keeps creeping, so its
            // change is only checked loosely.
            let multiplier_settled =
                (next_lambda - lambda).abs() <= MULTIPLIER_TOLERANCE * lambda.max(1.0);
            if violation <= CONSTRAINT_TOLERANCE && (multiplier_settled || self.is_stationary(&w)?) {
                message = "Multiplier settled away from a stationary point".into();
                break;
            }
            if violation > 0.25 * previous_violation {
                rho *= PENALTY_GROWTH;
            }
            previous_violation = violation;
            lambda = next_lambda;
        }

        let violation = (-self.evaluate(&w)?.constraint).max(0.0);
        let success = violation <= CONSTRAINT_TOLERANCE && self.is_stationary(&w)?;
        if success {
            message = "Optimization terminated successfully".into();
        }
        Ok((
            w,
            SolverOutcome {
                success,
                message,
                iterations: self.iterations,
                function_evaluations: self.evaluations,
                constraint_violation: violation,
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Local gradient-based search for the highest-Sharpe portfolio whose CVaR
/// stays at or above `cvar_limit`, starting from equal weights.
///
/// Solver failure is data: the outcome carries `success = false` and the
/// last iterate is returned. A warning is added when the reported weights
/// violate the CVaR floor.
pub fn optimize_continuous(
    input: &ContinuousOptimizationInput,
    progress: &dyn ProgressSink,
) -> PortfolioResult<ComputationOutput<ContinuousOptimizationOutput>> {
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
    if !(input.solver.ftol > 0.0) {
        return Err(PortfolioError::InvalidInput {
            field: "solver.ftol".into(),
            reason: "Must be positive".into(),
        });
    }

    let n = input.assets.len();
    let (lower, upper): (Vec<f64>, Vec<f64>) = match &input.asset_bounds {
        Some(bounds) => bounds.iter().copied().unzip(),
        None => (vec![0.0; n], vec![1.0; n]),
    };
    let min_total: f64 = lower.iter().sum();
    let max_total: f64 = upper.iter().sum();
    if min_total > 1.0 || max_total < 1.0 {
        return Err(PortfolioError::InvalidInput {
            field: "asset_bounds".into(),
            reason: format!(
                "Bounds cannot sum to one: minimums total {min_total}, maximums total {max_total}"
            ),
        });
    }

    let drawn = draw_scenarios(
        &input.assets,
        &input.correlation_matrix,
        input.n_samples,
        input.seed,
        progress,
    )?;
    warnings.extend(drawn.warnings);
    let scenarios = drawn.scenarios;

    let mut solver = AugmentedLagrangian {
        scenarios: &scenarios,
        cvar_limit: input.cvar_limit,
        cvar_alpha: input.cvar_alpha,
        lower,
        upper,
        options: input.solver,
        evaluations: 0,
        iterations: 0,
    };
    let x0 = vec![1.0 / n as f64; n];
    let (weights, outcome) = solver.run(&x0, progress)?;

    let portfolio = PortfolioSummary::from_weights(&weights, &scenarios)?;
    let optimal_cvar = cvar(&portfolio.returns, input.cvar_alpha)?;
    let optimal_sharpe = match sharpe(&portfolio.returns, 0.0) {
        Ok(s) => Some(s),
        Err(PortfolioError::DivisionByZero { .. }) => {
            warnings.push("Optimal portfolio has zero return variance; Sharpe ratio is undefined".into());
            None
        }
        Err(e) => return Err(e),
    };

    if !outcome.success {
        warn!(reason = %outcome.message, "continuous optimiser did not converge");
        warnings.push(format!("Solver did not converge: {}", outcome.message));
    }
    if outcome.constraint_violation > CONSTRAINT_TOLERANCE {
        warnings.push(format!(
            "CVaR {optimal_cvar:.6} is below the limit {} at the reported weights",
            input.cvar_limit
        ));
    }
    info!(
        iterations = outcome.iterations,
        evaluations = outcome.function_evaluations,
        success = outcome.success,
        "continuous optimisation finished"
    );

    let output = ContinuousOptimizationOutput {
        optimal_weights: weights,
        optimal_sharpe,
        optimal_cvar,
        solver: outcome,
        scenarios,
        portfolio,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Augmented Lagrangian projected gradient: max Sharpe subject to CVaR floor",
        &serde_json::json!({
            "n_assets": n,
            "n_samples": input.n_samples,
            "cvar_limit": input.cvar_limit,
            "cvar_alpha": input.cvar_alpha,
            "asset_bounds": input.asset_bounds,
            "seed": input.seed,
            "ftol": input.solver.ftol,
            "max_iterations": input.solver.max_iterations,
            "initial_guess": "equal weights",
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
