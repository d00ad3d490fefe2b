// src/step/detector.rs

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// 1g, the resting magnitude of an accelerometer that includes gravity.
pub const GRAVITY_MSS: f32 = 9.81;

/// One accelerometer reading, m/s² including gravity, monotonic timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelSample {
    pub timestamp_ms: u64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelSample {
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Unified feed input: real sensor samples and injected steps (desktop
/// simulation) both pass through the same acceptance/debounce/SPM logic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepInput {
    Sensor(AccelSample),
    Simulated { timestamp_ms: u64 },
}

/// What a feed (or decay poll) produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum StepOutput {
    Step { count: u64, timestamp_ms: u64 },
    SpmChange(u16),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepConfig {
    /// Deviation (smoothed − baseline) that arms the peak detector.
    pub threshold: f32,
    /// Debounce: one footfall's ringing must not count twice.
    pub min_step_interval_ms: u64,
    /// Step silence after which SPM decays back to 0 (walking stopped).
    pub decay_after_ms: u64,
    /// Slow EMA tracking orientation/gravity drift.
    pub baseline_alpha: f32,
    /// Fast EMA over the magnitude signal.
    pub smoothing_alpha: f32,
    /// Bounded step-timestamp history, oldest evicted.
    pub history_cap: usize,
    /// How many recent timestamps feed the median-interval SPM estimate.
    pub spm_window: usize,
    pub min_spm: u16,
    pub max_spm: u16,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            min_step_interval_ms: 280,
            decay_after_ms: 3000,
            baseline_alpha: 0.005,
            smoothing_alpha: 0.2,
            history_cap: 30,
            spm_window: 12,
            min_spm: 40,
            max_spm: 220,
        }
    }
}

/// Streaming step detector. Pure state machine: `feed` one input at a time,
/// `poll_decay` at ~1 Hz from whatever owns the clock.
pub struct StepDetector {
    config: StepConfig,
    baseline: f32,
    smoothed: f32,
    above_threshold: bool,
    last_step_ms: Option<u64>,
    history: VecDeque<u64>,
    step_count: u64,
    spm: u16,
}

impl StepDetector {
    pub fn new(config: StepConfig) -> Self {
        Self {
            config,
            baseline: GRAVITY_MSS,
            smoothed: GRAVITY_MSS,
            above_threshold: false,
            last_step_ms: None,
            history: VecDeque::with_capacity(config.history_cap),
            step_count: 0,
            spm: 0,
        }
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.config.threshold = threshold;
    }

    /// Current steps-per-minute estimate, 0 = unknown.
    pub fn spm(&self) -> u16 {
        self.spm
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Process one input. Returns at most a step event plus an SPM change.
    pub fn feed(&mut self, input: StepInput) -> Vec<StepOutput> {
        match input {
            StepInput::Sensor(sample) => self.feed_sensor(sample),
            StepInput::Simulated { timestamp_ms } => self.try_accept(timestamp_ms),
        }
    }

    fn feed_sensor(&mut self, sample: AccelSample) -> Vec<StepOutput> {
        let m = sample.magnitude();
        self.baseline += self.config.baseline_alpha * (m - self.baseline);
        self.smoothed += self.config.smoothing_alpha * (m - self.smoothed);
        let deviation = self.smoothed - self.baseline;

        // Hysteresis: arm on the rising crossing, trigger on the falling
        // edge. The downswing after a motion peak is the stable trigger.
        if deviation > self.config.threshold {
            self.above_threshold = true;
            Vec::new()
        } else if self.above_threshold {
            self.above_threshold = false;
            self.try_accept(sample.timestamp_ms)
        } else {
            Vec::new()
        }
    }

    fn try_accept(&mut self, timestamp_ms: u64) -> Vec<StepOutput> {
        if let Some(last) = self.last_step_ms {
            if timestamp_ms.saturating_sub(last) < self.config.min_step_interval_ms {
                return Vec::new();
            }
        }

        self.last_step_ms = Some(timestamp_ms);
        self.history.push_back(timestamp_ms);
        while self.history.len() > self.config.history_cap {
            self.history.pop_front();
        }
        self.step_count += 1;

        let mut out = vec![StepOutput::Step {
            count: self.step_count,
            timestamp_ms,
        }];
        if let Some(spm) = self.compute_spm() {
            if spm != self.spm {
                self.spm = spm;
                out.push(StepOutput::SpmChange(spm));
            }
        }
        out
    }

    /// Median of the recent consecutive intervals, converted to per-minute.
    /// Out-of-range results are rejected and the previous SPM is retained.
    fn compute_spm(&self) -> Option<u16> {
        if self.history.len() < 4 {
            return None;
        }
        let take = self.history.len().min(self.config.spm_window);
        let recent: Vec<u64> = self.history.iter().rev().take(take).rev().copied().collect();
        let mut intervals: Vec<u64> = recent.windows(2).map(|w| w[1] - w[0]).collect();
        intervals.sort_unstable();

        let mid = intervals.len() / 2;
        let median_ms = if intervals.len() % 2 == 1 {
            intervals[mid] as f64
        } else {
            (intervals[mid - 1] + intervals[mid]) as f64 / 2.0
        };
        if median_ms <= 0.0 {
            return None;
        }

        let spm = (60_000.0 / median_ms).round() as i64;
        if spm >= self.config.min_spm as i64 && spm <= self.config.max_spm as i64 {
            Some(spm as u16)
        } else {
            None
        }
    }

    /// Periodic (~1 Hz) silence check. Zeroes SPM and clears the history
    /// once `decay_after_ms` has passed since the last accepted step.
    pub fn poll_decay(&mut self, now_ms: u64) -> Option<StepOutput> {
        let last = self.last_step_ms?;
        if now_ms.saturating_sub(last) <= self.config.decay_after_ms {
            return None;
        }
        self.history.clear();
        self.last_step_ms = None;
        self.above_threshold = false;
        if self.spm != 0 {
            self.spm = 0;
            Some(StepOutput::SpmChange(0))
        } else {
            None
        }
    }

    /// Full reset, used on sync-stop. Step count survives.
    pub fn reset(&mut self) {
        self.baseline = GRAVITY_MSS;
        self.smoothed = GRAVITY_MSS;
        self.above_threshold = false;
        self.last_step_ms = None;
        self.history.clear();
        self.spm = 0;
    }
}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new(StepConfig::default())
    }
}
