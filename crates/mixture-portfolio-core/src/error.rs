use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Matrix is not positive definite: pivot {pivot} has value {value:.6e}")]
    NotPositiveDefinite { pivot: usize, value: f64 },

    #[error(
        "Root not bracketed for quantile {quantile}: f({lower})={f_lower:.3e}, f({upper})={f_upper:.3e}"
    )]
    RootBracketing {
        quantile: f64,
        lower: f64,
        upper: f64,
        f_lower: f64,
        f_upper: f64,
    },

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: f64,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for PortfolioError {
    fn from(e: serde_json::Error) -> Self {
        PortfolioError::SerializationError(e.to_string())
    }
}

impl PortfolioError {
    /// True for failures of the numerical machinery (factorization, root
    /// finding, iteration limits) as opposed to rejected inputs.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            PortfolioError::NotPositiveDefinite { .. }
                | PortfolioError::RootBracketing { .. }
                | PortfolioError::ConvergenceFailure { .. }
                | PortfolioError::DivisionByZero { .. }
        )
    }
}
