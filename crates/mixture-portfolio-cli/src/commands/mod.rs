pub mod api;
pub mod correlation;
pub mod diagnostics;
pub mod optimization;
pub mod risk;
pub mod scenarios;

use mixture_portfolio_core::ProgressFn;

/// Progress sink that reports through `tracing` at INFO level.
/// Visible with `--progress` or `RUST_LOG=info`.
pub fn log_progress(stage: &'static str) -> ProgressFn<impl Fn(usize, usize) + Sync> {
    ProgressFn(move |completed: usize, total: usize| {
        tracing::info!(target: "mixport::progress", stage, completed, total, "progress");
    })
}
