use serde::{Deserialize, Serialize};

/// Portfolio weight as a fraction of capital (0.25 = 25%).
pub type Weight = f64;

/// Returns and rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = f64;

/// Inclusive `(min, max)` weight range for one asset.
pub type WeightBounds = (Weight, Weight);

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "ieee754_f64".to_string(),
        },
    }
}

/// Observer for long-running loops (grid enumeration, batch quantile
/// inversion, solver iterations). Purely observational.
///
/// Implementations are shared across rayon workers, so calls may arrive
/// out of order and from several threads.
pub trait ProgressSink: Sync {
    fn on_progress(&self, completed: usize, total: usize);
}

/// Progress sink that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Adapts a closure into a [`ProgressSink`].
pub struct ProgressFn<F>(pub F);

impl<F> ProgressSink for ProgressFn<F>
where
    F: Fn(usize, usize) + Sync,
{
    fn on_progress(&self, completed: usize, total: usize) {
        (self.0)(completed, total)
    }
}
