// src/error.rs

use thiserror::Error;

/// Errors from the step-detection side.
#[derive(Error, Debug)]
pub enum StepError {
    /// Motion-sensing consent was denied by the platform. Non-fatal:
    /// cadence sync is simply unavailable.
    #[error("motion sensing permission denied")]
    PermissionDenied,
}

/// Errors from tempo analysis.
#[derive(Error, Debug)]
pub enum TempoError {
    /// The usable analysis window is too short to say anything about tempo.
    #[error("analysis window too short: {secs:.1}s (need at least 5s)")]
    InsufficientData { secs: f32 },

    /// Upstream decode failed; tempo stays unset and manual entry remains.
    #[error("could not decode audio: {0}")]
    Decode(String),

    /// Sample rate the band filters cannot be built for.
    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),
}
