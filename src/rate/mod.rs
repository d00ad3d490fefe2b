// src/rate/mod.rs

pub mod controller;
pub mod tap;

pub use controller::{RateController, RateOptions};
pub use tap::TapEstimator;
