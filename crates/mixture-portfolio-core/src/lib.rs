pub mod correlation;
pub mod distributions;
pub mod error;
pub mod types;

#[cfg(feature = "scenarios")]
pub mod risk;

#[cfg(feature = "optimization")]
pub mod optimization;

#[cfg(feature = "diagnostics")]
pub mod diagnostics;

#[cfg(feature = "api")]
pub mod api;

pub use error::PortfolioError;
pub use types::*;

/// Standard result type for all portfolio computations
pub type PortfolioResult<T> = Result<T, PortfolioError>;
