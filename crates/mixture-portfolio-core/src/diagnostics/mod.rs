pub mod cross_validation;
