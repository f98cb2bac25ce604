pub mod mixture;
pub mod root_finding;
