//! Gaussian-copula scenario generation.
//!
//! Correlated standard normals are drawn through the Cholesky factor of the
//! target correlation matrix, mapped to uniforms with Φ, and pushed through
//! each asset's mixture inverse CDF. Asset marginals are exact; the target
//! correlation holds for the Gaussian latents, and only approximately for
//! the transformed returns.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::time::Instant;
use tracing::{debug, warn};

use super::validation::{cholesky, validate_correlation, CorrelationCheck};
use crate::distributions::mixture::Asset;
use crate::distributions::root_finding::{Brent, RootFinder};
use crate::error::PortfolioError;
use crate::types::{with_metadata, ComputationOutput, NoProgress, ProgressSink};
use crate::PortfolioResult;

// ---------------------------------------------------------------------------
// ScenarioMatrix
// ---------------------------------------------------------------------------

/// `n_samples × n_assets` simulated returns, row-major. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct ScenarioMatrix {
    n_samples: usize,
    n_assets: usize,
    data: Vec<f64>,
}

impl ScenarioMatrix {
    /// Build from row-major data.
    pub fn from_row_major(
        n_samples: usize,
        n_assets: usize,
        data: Vec<f64>,
    ) -> PortfolioResult<Self> {
        if data.len() != n_samples * n_assets {
            return Err(PortfolioError::InvalidInput {
                field: "scenarios".into(),
                reason: format!(
                    "Expected {} values for a {n_samples}x{n_assets} matrix, got {}",
                    n_samples * n_assets,
                    data.len()
                ),
            });
        }
        Ok(Self {
            n_samples,
            n_assets,
            data,
        })
    }

    /// Build from per-asset columns of equal length.
    pub fn from_columns(columns: &[Vec<f64>]) -> PortfolioResult<Self> {
        let n_assets = columns.len();
        let n_samples = columns.first().map_or(0, |c| c.len());
        if columns.iter().any(|c| c.len() != n_samples) {
            return Err(PortfolioError::InvalidInput {
                field: "scenarios".into(),
                reason: "All asset columns must have the same length".into(),
            });
        }
        let mut data = Vec::with_capacity(n_samples * n_assets);
        for s in 0..n_samples {
            data.extend(columns.iter().map(|c| c[s]));
        }
        Self::from_row_major(n_samples, n_assets, data)
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_assets(&self) -> usize {
        self.n_assets
    }

    pub fn row(&self, sample: usize) -> &[f64] {
        let start = sample * self.n_assets;
        &self.data[start..start + self.n_assets]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact(0) panics; a zero-asset matrix has no rows anyway.
        self.data.chunks_exact(self.n_assets.max(1))
    }

    pub fn column(&self, asset: usize) -> Vec<f64> {
        self.rows().map(|r| r[asset]).collect()
    }

    pub fn get(&self, sample: usize, asset: usize) -> f64 {
        self.data[sample * self.n_assets + asset]
    }

    /// Rows `[start, end)` as a new matrix.
    pub fn slice_rows(&self, start: usize, end: usize) -> ScenarioMatrix {
        let end = end.min(self.n_samples);
        let start = start.min(end);
        ScenarioMatrix {
            n_samples: end - start,
            n_assets: self.n_assets,
            data: self.data[start * self.n_assets..end * self.n_assets].to_vec(),
        }
    }

    /// Every row except `[start, end)`, order preserved.
    pub fn without_rows(&self, start: usize, end: usize) -> ScenarioMatrix {
        let end = end.min(self.n_samples);
        let start = start.min(end);
        let mut data = Vec::with_capacity((self.n_samples - (end - start)) * self.n_assets);
        data.extend_from_slice(&self.data[..start * self.n_assets]);
        data.extend_from_slice(&self.data[end * self.n_assets..]);
        ScenarioMatrix {
            n_samples: self.n_samples - (end - start),
            n_assets: self.n_assets,
            data,
        }
    }

    /// Sample Pearson correlation between two asset columns.
    pub fn sample_correlation(&self, a: usize, b: usize) -> f64 {
        let xa = self.column(a);
        let xb = self.column(b);
        let n = xa.len() as f64;
        let ma = xa.iter().sum::<f64>() / n;
        let mb = xb.iter().sum::<f64>() / n;
        let cov: f64 = xa.iter().zip(&xb).map(|(x, y)| (x - ma) * (y - mb)).sum();
        let va: f64 = xa.iter().map(|x| (x - ma).powi(2)).sum();
        let vb: f64 = xb.iter().map(|y| (y - mb).powi(2)).sum();
        cov / (va.sqrt() * vb.sqrt())
    }
}

impl TryFrom<Vec<Vec<f64>>> for ScenarioMatrix {
    type Error = PortfolioError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        let n_samples = rows.len();
        let n_assets = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != n_assets) {
            return Err(PortfolioError::InvalidInput {
                field: "scenarios".into(),
                reason: "All scenario rows must have the same length".into(),
            });
        }
        Self::from_row_major(n_samples, n_assets, rows.into_iter().flatten().collect())
    }
}

impl From<ScenarioMatrix> for Vec<Vec<f64>> {
    fn from(m: ScenarioMatrix) -> Self {
        m.rows().map(|r| r.to_vec()).collect()
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Scenarios plus any non-fatal diagnostics raised while producing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutput {
    pub scenarios: ScenarioMatrix,
    pub correlation_check: CorrelationCheck,
    pub warnings: Vec<String>,
}

/// Gaussian copula over a fixed correlation matrix.
///
/// Validation runs once at construction and is advisory: a failing check is
/// logged and kept as a warning. The Cholesky factorization is the actual
/// gate and fails hard on a matrix that is not positive definite.
pub struct CopulaSampler {
    factor: Vec<Vec<f64>>,
    check: CorrelationCheck,
    finder: Box<dyn RootFinder>,
}

impl CopulaSampler {
    pub fn new(correlation_matrix: &[Vec<f64>]) -> PortfolioResult<Self> {
        let check = validate_correlation(correlation_matrix);
        if !check.valid {
            warn!(reason = %check.message, "correlation matrix failed validation; continuing");
        }
        let factor = cholesky(correlation_matrix)?;
        Ok(Self {
            factor,
            check,
            finder: Box::new(Brent::default()),
        })
    }

    /// Swap the root finder used for mixture inversion.
    pub fn with_root_finder(mut self, finder: Box<dyn RootFinder>) -> Self {
        self.finder = finder;
        self
    }

    pub fn n_assets(&self) -> usize {
        self.factor.len()
    }

    pub fn correlation_check(&self) -> &CorrelationCheck {
        &self.check
    }

    pub fn cholesky_factor(&self) -> &[Vec<f64>] {
        &self.factor
    }

    /// Correlated standard normals, `n_samples × n_assets` row-major:
    /// each row is `z · Lᵀ` for an iid standard-normal row `z`.
    pub fn correlated_normals(&self, n_samples: usize, rng: &mut StdRng) -> PortfolioResult<Vec<f64>> {
        let n = self.n_assets();
        let standard = standard_normal()?;
        let mut out = vec![0.0; n_samples * n];
        let mut z = vec![0.0; n];
        for row in out.chunks_exact_mut(n) {
            for zi in z.iter_mut() {
                *zi = rng.sample(&standard);
            }
            for (i, cell) in row.iter_mut().enumerate() {
                *cell = self.factor[i]
                    .iter()
                    .zip(&z)
                    .take(i + 1)
                    .map(|(l, zj)| l * zj)
                    .sum();
            }
        }
        Ok(out)
    }

    /// Draw `n_samples` joint scenarios for `assets`.
    pub fn sample(
        &self,
        assets: &[Asset],
        n_samples: usize,
        rng: &mut StdRng,
        progress: &dyn ProgressSink,
    ) -> PortfolioResult<ScenarioOutput> {
        let n = self.n_assets();
        if assets.len() != n {
            return Err(PortfolioError::InvalidInput {
                field: "assets".into(),
                reason: format!(
                    "Got {} assets for a {n}x{n} correlation matrix",
                    assets.len()
                ),
            });
        }
        if n_samples == 0 {
            return Err(PortfolioError::InvalidInput {
                field: "n_samples".into(),
                reason: "Must be at least 1".into(),
            });
        }

        let standard = standard_normal()?;
        let latents = self.correlated_normals(n_samples, rng)?;

        let mut columns = Vec::with_capacity(n);
        for (i, asset) in assets.iter().enumerate() {
            let uniforms: Vec<f64> = latents
                .iter()
                .skip(i)
                .step_by(n)
                .map(|z| standard.cdf(*z))
                .collect();
            debug!(asset = asset.name(), n_samples, "inverting mixture marginal");
            let column = asset
                .marginal()
                .ppf_batch(&uniforms, self.finder.as_ref(), progress)?;
            columns.push(column);
        }

        let mut warnings = Vec::new();
        if !self.check.valid {
            warnings.push(format!("Correlation matrix: {}", self.check.message));
        }

        Ok(ScenarioOutput {
            scenarios: ScenarioMatrix::from_columns(&columns)?,
            correlation_check: self.check.clone(),
            warnings,
        })
    }
}

fn standard_normal() -> PortfolioResult<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| PortfolioError::InvalidInput {
        field: "distribution".into(),
        reason: format!("Invalid Normal parameters: {e}"),
    })
}

/// Validate, factor, and draw `n_samples` correlated scenarios in one call.
pub fn sample_scenarios(
    assets: &[Asset],
    correlation_matrix: &[Vec<f64>],
    n_samples: usize,
    rng: &mut StdRng,
) -> PortfolioResult<ScenarioOutput> {
    CopulaSampler::new(correlation_matrix)?.sample(assets, n_samples, rng, &NoProgress)
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

// ---------------------------------------------------------------------------
// Public API: scenario report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioInput {
    pub assets: Vec<Asset>,
    pub correlation_matrix: Vec<Vec<f64>>,
    #[serde(default = "default_n_samples")]
    pub n_samples: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Draw each asset from its own mixture, ignoring the correlation matrix.
    #[serde(default)]
    pub independent: bool,
}

fn default_n_samples() -> usize {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub asset_names: Vec<String>,
    pub scenarios: ScenarioMatrix,
    pub correlation_check: CorrelationCheck,
    /// Pearson correlation of the simulated returns.
    pub sample_correlation: Vec<Vec<f64>>,
    pub sample_means: Vec<f64>,
    pub expected_returns: Vec<f64>,
}

/// Draw scenarios and report how closely they reproduce the inputs.
pub fn generate_scenarios(
    input: &ScenarioInput,
    progress: &dyn ProgressSink,
) -> PortfolioResult<ComputationOutput<ScenarioReport>> {
    let start = Instant::now();
    let mut rng = seeded_rng(input.seed);

    let (scenarios, correlation_check, warnings) = if input.independent {
        if input.n_samples == 0 {
            return Err(PortfolioError::InvalidInput {
                field: "n_samples".into(),
                reason: "Must be at least 1".into(),
            });
        }
        let columns = input
            .assets
            .iter()
            .map(|a| a.sample(&mut rng, input.n_samples))
            .collect::<PortfolioResult<Vec<_>>>()?;
        (
            ScenarioMatrix::from_columns(&columns)?,
            validate_correlation(&input.correlation_matrix),
            vec!["Independent sampling: the correlation matrix is not applied".to_string()],
        )
    } else {
        let out = CopulaSampler::new(&input.correlation_matrix)?.sample(
            &input.assets,
            input.n_samples,
            &mut rng,
            progress,
        )?;
        (out.scenarios, out.correlation_check, out.warnings)
    };

    let n = scenarios.n_assets();
    let sample_correlation = (0..n)
        .map(|a| (0..n).map(|b| scenarios.sample_correlation(a, b)).collect())
        .collect();
    let sample_means = (0..n)
        .map(|a| scenarios.column(a).iter().sum::<f64>() / scenarios.n_samples() as f64)
        .collect();

    let output = ScenarioReport {
        asset_names: input.assets.iter().map(|a| a.name().to_string()).collect(),
        expected_returns: input.assets.iter().map(Asset::expected_return).collect(),
        sample_correlation,
        sample_means,
        correlation_check,
        scenarios,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        if input.independent {
            "Independent mixture-of-normals sampling"
        } else {
            "Gaussian copula with mixture-of-normals marginals"
        },
        &serde_json::json!({
            "n_assets": input.assets.len(),
            "n_samples": input.n_samples,
            "seed": input.seed,
            "independent": input.independent,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
