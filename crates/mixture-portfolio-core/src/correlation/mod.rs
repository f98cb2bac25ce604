#[cfg(feature = "scenarios")]
pub mod copula;
pub mod validation;
