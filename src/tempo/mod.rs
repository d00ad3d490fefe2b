// src/tempo/mod.rs

pub mod adapter;
pub mod envelope;
pub mod estimator;
pub mod filters;

pub use adapter::{decode_to_vec, detect_file};
pub use estimator::{TempoEstimator, TempoOptions, TempoResult};
