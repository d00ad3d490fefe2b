// src/step/mod.rs

pub mod detector;
pub mod tracker;

pub use detector::{AccelSample, GRAVITY_MSS, StepConfig, StepDetector, StepInput, StepOutput};
pub use tracker::StepTracker;
