use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::root_finding::{Brent, RootFinder, DEFAULT_XTOL};
use crate::error::PortfolioError;
use crate::types::ProgressSink;
use crate::PortfolioResult;

/// Quantiles are clamped to `[QUANTILE_CLAMP, 1 - QUANTILE_CLAMP]` before
/// inversion so the root bracket always straddles the target.
pub const QUANTILE_CLAMP: f64 = 1e-10;

/// Half-width of the inversion bracket, in overall mixture standard deviations.
pub const BRACKET_STD_DEVS: f64 = 10.0;

/// Component weights must sum to one within `1e-8 + 1e-5`.
const WEIGHT_SUM_ATOL: f64 = 1e-8;
const WEIGHT_SUM_RTOL: f64 = 1e-5;

/// Emit a progress event roughly every this many inverted quantiles.
const PROGRESS_STRIDE: usize = 256;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Serialized shape of an [`Asset`]; every deserialized asset is validated
/// through [`Asset::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSpec {
    pub name: String,
    pub weights: Vec<f64>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

/// One asset whose periodic return follows a mixture of normals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AssetSpec", into = "AssetSpec")]
pub struct Asset {
    name: String,
    marginal: MixtureMarginal,
}

/// Weighted sum of `K` normal components.
#[derive(Debug, Clone)]
pub struct MixtureMarginal {
    weights: Vec<f64>,
    means: Vec<f64>,
    stds: Vec<f64>,
    components: Vec<Normal>,
    mean: f64,
    std_dev: f64,
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

impl Asset {
    /// Build an asset, rejecting mismatched component lists, non-positive
    /// standard deviations and weights that do not sum to one.
    pub fn new(
        name: impl Into<String>,
        weights: Vec<f64>,
        means: Vec<f64>,
        stds: Vec<f64>,
    ) -> PortfolioResult<Self> {
        let name = name.into();
        let marginal = MixtureMarginal::new(weights, means, stds).map_err(|e| match e {
            PortfolioError::InvalidInput { field, reason } => PortfolioError::InvalidInput {
                field: format!("{name}.{field}"),
                reason,
            },
            other => other,
        })?;
        Ok(Self { name, marginal })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weights(&self) -> &[f64] {
        &self.marginal.weights
    }

    pub fn means(&self) -> &[f64] {
        &self.marginal.means
    }

    pub fn stds(&self) -> &[f64] {
        &self.marginal.stds
    }

    pub fn marginal(&self) -> &MixtureMarginal {
        &self.marginal
    }

    /// Analytical expected return: `Σ w_k μ_k`.
    pub fn expected_return(&self) -> f64 {
        self.marginal.mean
    }

    /// `Σ w_k (σ_k² + μ_k²) − μ̄²`.
    pub fn variance(&self) -> f64 {
        self.marginal.std_dev * self.marginal.std_dev
    }

    /// Analytical standard deviation of the mixture.
    pub fn std_dev(&self) -> f64 {
        self.marginal.std_dev
    }

    /// Draw `n` independent returns (no correlation with other assets).
    pub fn sample(&self, rng: &mut StdRng, n: usize) -> PortfolioResult<Vec<f64>> {
        self.marginal.sample(rng, n)
    }
}

impl TryFrom<AssetSpec> for Asset {
    type Error = PortfolioError;

    fn try_from(spec: AssetSpec) -> Result<Self, Self::Error> {
        Asset::new(spec.name, spec.weights, spec.means, spec.stds)
    }
}

impl From<Asset> for AssetSpec {
    fn from(asset: Asset) -> Self {
        let MixtureMarginal {
            weights,
            means,
            stds,
            ..
        } = asset.marginal;
        AssetSpec {
            name: asset.name,
            weights,
            means,
            stds,
        }
    }
}

// ---------------------------------------------------------------------------
// MixtureMarginal
// ---------------------------------------------------------------------------

impl MixtureMarginal {
    pub fn new(weights: Vec<f64>, means: Vec<f64>, stds: Vec<f64>) -> PortfolioResult<Self> {
        validate_components(&weights, &means, &stds)?;

        let components = means
            .iter()
            .zip(&stds)
            .map(|(&mu, &sigma)| {
                Normal::new(mu, sigma).map_err(|e| PortfolioError::InvalidInput {
                    field: "stds".into(),
                    reason: format!("Invalid Normal parameters: {e}"),
                })
            })
            .collect::<PortfolioResult<Vec<_>>>()?;

        let mean: f64 = weights.iter().zip(&means).map(|(w, mu)| w * mu).sum();
        let second_moment: f64 = weights
            .iter()
            .zip(means.iter().zip(&stds))
            .map(|(w, (mu, sigma))| w * (sigma * sigma + mu * mu))
            .sum();
        let std_dev = (second_moment - mean * mean).max(0.0).sqrt();

        Ok(Self {
            weights,
            means,
            stds,
            components,
            mean,
            std_dev,
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    /// `Σ w_k Φ((x − μ_k) / σ_k)`.
    pub fn cdf(&self, x: f64) -> f64 {
        self.weights
            .iter()
            .zip(&self.components)
            .map(|(w, n)| w * n.cdf(x))
            .sum()
    }

    pub fn pdf(&self, x: f64) -> f64 {
        self.weights
            .iter()
            .zip(&self.components)
            .map(|(w, n)| w * n.pdf(x))
            .sum()
    }

    /// Root-finding interval `[μ̄ − 10σ̄, μ̄ + 10σ̄]`.
    pub fn bracket(&self) -> (f64, f64) {
        let half_width = BRACKET_STD_DEVS * self.std_dev;
        (self.mean - half_width, self.mean + half_width)
    }

    /// Inverse CDF using Brent's method.
    pub fn ppf(&self, q: f64) -> PortfolioResult<f64> {
        self.ppf_with(&Brent::default(), q)
    }

    /// Inverse CDF using the supplied root finder.
    pub fn ppf_with(&self, finder: &dyn RootFinder, q: f64) -> PortfolioResult<f64> {
        if q.is_nan() {
            return Err(PortfolioError::InvalidInput {
                field: "quantile".into(),
                reason: "Quantile must not be NaN".into(),
            });
        }
        let q = q.clamp(QUANTILE_CLAMP, 1.0 - QUANTILE_CLAMP);
        let (lower, upper) = self.bracket();
        finder.solve(&|x| self.cdf(x) - q, lower, upper, DEFAULT_XTOL, q)
    }

    /// Invert every quantile in `quantiles`, preserving order.
    ///
    /// Each inversion only reads the mixture parameters, so the batch runs
    /// in parallel when the `parallel` feature is enabled. On failure the
    /// error for the lowest failing index is returned.
    pub fn ppf_batch(
        &self,
        quantiles: &[f64],
        finder: &dyn RootFinder,
        progress: &dyn ProgressSink,
    ) -> PortfolioResult<Vec<f64>> {
        let total = quantiles.len();
        let completed = AtomicUsize::new(0);

        let invert = |q: &f64| {
            let value = self.ppf_with(finder, *q);
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if done % PROGRESS_STRIDE == 0 || done == total {
                progress.on_progress(done, total);
            }
            value
        };

        #[cfg(feature = "parallel")]
        let solved: Vec<PortfolioResult<f64>> = quantiles.par_iter().map(invert).collect();
        #[cfg(not(feature = "parallel"))]
        let solved: Vec<PortfolioResult<f64>> = quantiles.iter().map(invert).collect();

        solved.into_iter().collect()
    }

    /// Draw `n` samples by picking a component per draw, then sampling it.
    pub fn sample(&self, rng: &mut StdRng, n: usize) -> PortfolioResult<Vec<f64>> {
        let picker = WeightedIndex::new(&self.weights).map_err(|e| PortfolioError::InvalidInput {
            field: "weights".into(),
            reason: format!("Cannot sample components: {e}"),
        })?;
        Ok((0..n)
            .map(|_| {
                let k = rng.sample(&picker);
                rng.sample(&self.components[k])
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_components(weights: &[f64], means: &[f64], stds: &[f64]) -> PortfolioResult<()> {
    if weights.is_empty() {
        return Err(PortfolioError::InvalidInput {
            field: "weights".into(),
            reason: "At least one mixture component is required".into(),
        });
    }
    if means.len() != weights.len() || stds.len() != weights.len() {
        return Err(PortfolioError::InvalidInput {
            field: "means".into(),
            reason: format!(
                "weights, means and stds must have equal length (got {}, {}, {})",
                weights.len(),
                means.len(),
                stds.len()
            ),
        });
    }
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(PortfolioError::InvalidInput {
            field: "weights".into(),
            reason: "Component weights must be finite and non-negative".into(),
        });
    }
    if means.iter().any(|m| !m.is_finite()) {
        return Err(PortfolioError::InvalidInput {
            field: "means".into(),
            reason: "Component means must be finite".into(),
        });
    }
    if stds.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        return Err(PortfolioError::InvalidInput {
            field: "stds".into(),
            reason: "Component standard deviations must be finite and positive".into(),
        });
    }

    let total: f64 = weights.iter().sum();
    if (total - 1.0).abs() > WEIGHT_SUM_ATOL + WEIGHT_SUM_RTOL {
        return Err(PortfolioError::InvalidInput {
            field: "weights".into(),
            reason: format!("Weights must sum to 1, got {total}"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::root_finding::Bisection;
    use crate::types::NoProgress;
    use rand::SeedableRng;

    const SEED: u64 = 42;

    fn stock() -> Asset {
        Asset::new("Stock", vec![0.8, 0.2], vec![0.15, -0.20], vec![0.12, 0.25]).unwrap()
    }

    fn bond() -> Asset {
        Asset::new("Bond", vec![1.0], vec![0.04], vec![0.03]).unwrap()
    }

    // --- Construction ---

    #[test]
    fn test_create_asset() {
        let asset = stock();
        assert_eq!(asset.name(), "Stock");
        assert!((asset.expected_return() - 0.08).abs() < 1e-12);
        assert_eq!(asset.marginal().n_components(), 2);
    }

    #[test]
    fn test_weights_not_summing_to_one_rejected() {
        let result = Asset::new("Bad", vec![0.5, 0.3], vec![0.1, 0.2], vec![0.1, 0.1]);
        match result {
            Err(PortfolioError::InvalidInput { field, reason }) => {
                assert_eq!(field, "Bad.weights");
                assert!(reason.contains("sum to 1"), "reason={reason}");
            }
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_weight_sum_tolerance() {
        assert!(Asset::new("Ok", vec![0.5, 0.500_000_001], vec![0.0, 0.0], vec![0.1, 0.1]).is_ok());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        assert!(Asset::new("Bad", vec![0.5, 0.5], vec![0.1], vec![0.1, 0.1]).is_err());
    }

    #[test]
    fn test_non_positive_std_rejected() {
        assert!(Asset::new("Bad", vec![1.0], vec![0.1], vec![0.0]).is_err());
        assert!(Asset::new("Bad", vec![1.0], vec![0.1], vec![-0.1]).is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        assert!(Asset::new("Bad", vec![1.2, -0.2], vec![0.1, 0.0], vec![0.1, 0.1]).is_err());
    }

    #[test]
    fn test_empty_components_rejected() {
        assert!(Asset::new("Empty", vec![], vec![], vec![]).is_err());
    }

    #[test]
    fn test_serde_roundtrip_revalidates() {
        let json = serde_json::to_string(&bond()).unwrap();
        let restored: Asset = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.name(), "Bond");
        assert_eq!(restored.weights(), &[1.0]);

        let bad = r#"{"name":"Bad","weights":[0.5,0.3],"means":[0.1,0.2],"stds":[0.1,0.1]}"#;
        assert!(serde_json::from_str::<Asset>(bad).is_err());
    }

    // --- Moments ---

    #[test]
    fn test_overall_std_dev() {
        // E[x^2] = 0.8 (0.0144 + 0.0225) + 0.2 (0.0625 + 0.04) = 0.05002
        let expected = (0.05002_f64 - 0.08 * 0.08).sqrt();
        assert!((stock().std_dev() - expected).abs() < 1e-12);
        assert!((stock().variance() - (0.05002 - 0.0064)).abs() < 1e-12);
    }

    #[test]
    fn test_pdf_integrates_to_cdf_increment() {
        let m = stock();
        let (a, b) = (-0.1, 0.2);
        let n = 2000;
        let h = (b - a) / n as f64;
        // Trapezoid rule.
        let integral: f64 = (0..n)
            .map(|i| {
                let x0 = a + i as f64 * h;
                0.5 * h * (m.marginal().pdf(x0) + m.marginal().pdf(x0 + h))
            })
            .sum();
        let increment = m.marginal().cdf(b) - m.marginal().cdf(a);
        assert!((integral - increment).abs() < 1e-6);
    }

    #[test]
    fn test_single_component_matches_normal() {
        let m = bond();
        let normal = Normal::new(0.04, 0.03).unwrap();
        for x in [-0.05, 0.0, 0.04, 0.1] {
            assert!((m.marginal().cdf(x) - normal.cdf(x)).abs() < 1e-15);
        }
        let median = m.marginal().ppf(0.5).unwrap();
        assert!((median - 0.04).abs() < 1e-9, "median={median}");
    }

    // --- CDF / PPF ---

    #[test]
    fn test_cdf_non_decreasing() {
        let m = stock();
        let mut prev = 0.0;
        for i in 0..=400 {
            let x = -1.0 + i as f64 * 0.005;
            let c = m.marginal().cdf(x);
            assert!(c >= prev, "cdf decreased at x={x}");
            assert!((0.0..=1.0).contains(&c));
            prev = c;
        }
    }

    #[test]
    fn test_ppf_cdf_roundtrip() {
        let m = stock();
        for x in [-0.4, -0.15, 0.0, 0.08, 0.2, 0.35] {
            let q = m.marginal().cdf(x);
            let back = m.marginal().ppf(q).unwrap();
            assert!((back - x).abs() < 1e-8, "x={x}, back={back}");
        }
    }

    #[test]
    fn test_ppf_with_bisection_agrees_with_brent() {
        let m = stock();
        for q in [0.01, 0.25, 0.5, 0.9, 0.999] {
            let brent = m.marginal().ppf(q).unwrap();
            let bisect = m.marginal().ppf_with(&Bisection::default(), q).unwrap();
            assert!((brent - bisect).abs() < 1e-9, "q={q}");
        }
    }

    #[test]
    fn test_ppf_clamps_extreme_quantiles() {
        let m = stock();
        let (lower, upper) = m.marginal().bracket();
        let low = m.marginal().ppf(0.0).unwrap();
        let high = m.marginal().ppf(1.0).unwrap();
        assert!(low > lower && low < m.expected_return());
        assert!(high < upper && high > m.expected_return());
        assert_eq!(low, m.marginal().ppf(QUANTILE_CLAMP).unwrap());
    }

    #[test]
    fn test_ppf_rejects_nan() {
        assert!(stock().marginal().ppf(f64::NAN).is_err());
    }

    #[test]
    fn test_ppf_bracket_failure_for_extreme_mixture() {
        // The wide, rare component carries far more tail mass than the
        // bracket derived from the overall variance can reach.
        let m = MixtureMarginal::new(vec![0.01, 0.99], vec![0.0, 0.0], vec![1.0, 0.01]).unwrap();
        let result = m.ppf(1e-6);
        assert!(
            matches!(result, Err(PortfolioError::RootBracketing { .. })),
            "got {result:?}"
        );
    }

    #[test]
    fn test_ppf_batch_preserves_order() {
        let m = stock();
        let qs: Vec<f64> = (1..100).map(|i| i as f64 / 100.0).collect();
        let xs = m
            .marginal()
            .ppf_batch(&qs, &Brent::default(), &NoProgress)
            .unwrap();
        assert_eq!(xs.len(), qs.len());
        for (q, x) in qs.iter().zip(&xs) {
            assert!((m.marginal().cdf(*x) - q).abs() < 1e-9);
        }
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_ppf_batch_reports_progress() {
        use crate::types::ProgressFn;
        use std::sync::atomic::AtomicUsize;

        let last = AtomicUsize::new(0);
        let sink = ProgressFn(|done: usize, total: usize| {
            assert_eq!(total, 1000);
            last.fetch_max(done, Ordering::Relaxed);
        });
        let qs = vec![0.5; 1000];
        bond()
            .marginal()
            .ppf_batch(&qs, &Brent::default(), &sink)
            .unwrap();
        assert_eq!(last.load(Ordering::Relaxed), 1000);
    }

    // --- Sampling ---

    #[test]
    fn test_mixture_sampling_mean() {
        let m = MixtureMarginal::new(vec![0.5, 0.5], vec![-0.1, 0.2], vec![0.05, 0.05]).unwrap();
        let mut rng = StdRng::seed_from_u64(SEED);
        let samples = m.sample(&mut rng, 10_000).unwrap();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((mean - 0.05).abs() < 0.01, "mean={mean}");
    }

    #[test]
    fn test_sampling_is_seeded() {
        let a = stock().sample(&mut StdRng::seed_from_u64(SEED), 50).unwrap();
        let b = stock().sample(&mut StdRng::seed_from_u64(SEED), 50).unwrap();
        assert_eq!(a, b);
    }
}
