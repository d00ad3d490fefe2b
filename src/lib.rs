// src/lib.rs

pub mod error;
pub mod rate;
pub mod step;
pub mod tempo;

pub use error::{StepError, TempoError};
pub use rate::{RateController, RateOptions, TapEstimator};
pub use step::{AccelSample, StepConfig, StepDetector, StepInput, StepOutput, StepTracker};
pub use tempo::{TempoEstimator, TempoOptions, TempoResult, detect_file};
