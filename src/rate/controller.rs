// src/rate/controller.rs

use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateOptions {
    pub min_rate: f32,
    pub max_rate: f32,
    /// Exponential low-pass coefficient applied to the rate itself each
    /// render tick; keeps instantaneous SPM jumps from causing audible
    /// stutters.
    pub smoothing: f32,
    /// Proportional gain for the beat-phase correction. Empirical, kept
    /// tunable.
    pub phase_gain: f32,
    /// The sink is only updated when the smoothed rate moved more than this.
    pub apply_epsilon: f32,
}

impl Default for RateOptions {
    fn default() -> Self {
        Self {
            min_rate: 0.7,
            max_rate: 1.4,
            smoothing: 0.08,
            phase_gain: 0.4,
            apply_epsilon: 0.002,
        }
    }
}

const MIN_BPM: f32 = 60.0;
const MAX_BPM: f32 = 200.0;
const MIN_SPM: u16 = 40;
const MAX_SPM: u16 = 220;

/// Fuses live SPM with a track's tempo reference into a smoothed, clamped,
/// phase-corrected playback-rate multiplier. `tick()` runs once per
/// audio-render cycle; everything else is event-driven.
pub struct RateController {
    opts: RateOptions,
    original_bpm: Option<f32>,
    beat_offset: Option<f32>,
    spm: u16,
    target_rate: f32,
    current_rate: f32,
    phase_correction: f32,
    last_applied: Option<f32>,
}

impl RateController {
    pub fn new(opts: RateOptions) -> Self {
        Self {
            opts,
            original_bpm: None,
            beat_offset: None,
            spm: 0,
            target_rate: 1.0,
            current_rate: 1.0,
            phase_correction: 0.0,
            last_applied: None,
        }
    }

    /// Seed the tempo reference for the current track. Out-of-range BPM is
    /// policy-rejected: the previous reference is retained.
    pub fn set_track_tempo(&mut self, bpm: f32, beat_offset: Option<f32>) {
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            debug!("rejecting out-of-range track tempo {bpm:.1}");
            return;
        }
        self.original_bpm = Some(bpm);
        self.beat_offset = beat_offset;
        self.phase_correction = 0.0;
        self.retarget();
    }

    /// Live cadence update. 0 means unknown; other out-of-range values are
    /// rejected and the previous value kept.
    pub fn on_spm_update(&mut self, spm: u16) {
        if spm != 0 && !(MIN_SPM..=MAX_SPM).contains(&spm) {
            return;
        }
        self.spm = spm;
        self.retarget();
    }

    /// A step landed while the audio was at `audio_position_secs`. With a
    /// beat anchor, derive the signed phase error and fold a proportional
    /// correction into the target rate.
    pub fn on_step_event(&mut self, audio_position_secs: f32) {
        let (Some(bpm), Some(offset)) = (self.original_bpm, self.beat_offset) else {
            return;
        };
        let beat_period = 60.0 / bpm;
        let phase = (audio_position_secs - offset).rem_euclid(beat_period);
        // Normalized error wrapped to (-0.5, 0.5].
        let mut e = phase / beat_period;
        if e > 0.5 {
            e -= 1.0;
        }
        self.phase_correction = -self.opts.phase_gain * e;
        self.retarget();
    }

    /// One render-cycle update of the smoothed rate.
    pub fn tick(&mut self) -> f32 {
        self.current_rate += self.opts.smoothing * (self.target_rate - self.current_rate);
        self.current_rate = self.clamp(self.current_rate);
        self.current_rate
    }

    /// The rate to push to the playback sink, or None when it has not moved
    /// enough since the last push to matter.
    pub fn take_rate_update(&mut self) -> Option<f32> {
        let moved = self
            .last_applied
            .is_none_or(|a| (self.current_rate - a).abs() > self.opts.apply_epsilon);
        if moved {
            self.last_applied = Some(self.current_rate);
            Some(self.current_rate)
        } else {
            None
        }
    }

    /// Sync toggled off (or no tempo reference): back to normal speed. The
    /// per-track tempo reference survives.
    pub fn reset(&mut self) {
        self.target_rate = 1.0;
        self.current_rate = 1.0;
        self.phase_correction = 0.0;
        self.spm = 0;
        self.last_applied = None;
    }

    pub fn current_rate(&self) -> f32 {
        self.current_rate
    }

    pub fn target_rate(&self) -> f32 {
        self.target_rate
    }

    fn retarget(&mut self) {
        let base = match self.original_bpm {
            Some(bpm) if self.spm > 0 => self.spm as f32 / bpm,
            _ => {
                self.target_rate = 1.0;
                return;
            }
        };
        let mut target = self.clamp(base);
        target *= 1.0 + self.phase_correction;
        self.target_rate = self.clamp(target);
    }

    fn clamp(&self, rate: f32) -> f32 {
        rate.clamp(self.opts.min_rate, self.opts.max_rate)
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new(RateOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spm_over_bpm_sets_target() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, None);
        rc.on_spm_update(150);
        assert!((rc.target_rate() - 1.25).abs() < 1e-6);
    }

    #[test]
    fn no_tempo_reference_means_unity_target() {
        let mut rc = RateController::default();
        rc.on_spm_update(150);
        assert_eq!(rc.target_rate(), 1.0);
    }

    #[test]
    fn zero_spm_means_unity_target() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, None);
        rc.on_spm_update(150);
        rc.on_spm_update(0);
        assert_eq!(rc.target_rate(), 1.0);
    }

    #[test]
    fn target_clamps_at_both_boundaries() {
        let mut rc = RateController::default();
        rc.set_track_tempo(60.0, None);
        rc.on_spm_update(220); // ratio 3.67
        assert!((rc.target_rate() - 1.4).abs() < 1e-6);

        rc.set_track_tempo(200.0, None);
        rc.on_spm_update(40); // ratio 0.2
        assert!((rc.target_rate() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_bpm_is_rejected() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, None);
        rc.set_track_tempo(300.0, None); // ignored
        rc.on_spm_update(150);
        assert!((rc.target_rate() - 1.25).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_spm_retains_previous() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, None);
        rc.on_spm_update(150);
        rc.on_spm_update(500); // ignored
        assert!((rc.target_rate() - 1.25).abs() < 1e-6);
    }

    #[test]
    fn ticks_converge_monotonically_without_overshoot() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, None);
        rc.on_spm_update(150); // target 1.25
        let mut prev = rc.current_rate();
        for _ in 0..400 {
            let r = rc.tick();
            assert!(r >= prev, "no backwards motion");
            assert!(r <= 1.25 + 1e-6, "no overshoot");
            prev = r;
        }
        assert!((prev - 1.25).abs() < 0.002);
    }

    #[test]
    fn sink_updates_are_suppressed_below_epsilon() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, None);
        rc.on_spm_update(150);
        rc.tick();
        assert!(rc.take_rate_update().is_some());
        // No further tick: the rate has not moved.
        assert!(rc.take_rate_update().is_none());
        // Converge fully; updates dry up once steps are < epsilon.
        for _ in 0..600 {
            rc.tick();
        }
        rc.take_rate_update();
        rc.tick();
        assert!(rc.take_rate_update().is_none());
    }

    #[test]
    fn step_on_the_beat_needs_no_correction() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, Some(0.0));
        rc.on_spm_update(120);
        rc.on_step_event(1.0); // exactly on a beat (period 0.5s)
        assert!((rc.target_rate() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn late_phase_pulls_the_rate_down() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, Some(0.0));
        rc.on_spm_update(120);
        // Audio is a quarter period past the beat: e = 0.25, correction -0.1.
        rc.on_step_event(0.125);
        assert!((rc.target_rate() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn early_phase_pushes_the_rate_up() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, Some(0.0));
        rc.on_spm_update(120);
        // A quarter period before the next beat: e = -0.25, correction +0.1.
        rc.on_step_event(0.375);
        assert!((rc.target_rate() - 1.1).abs() < 1e-6);
    }

    #[test]
    fn phase_correction_needs_an_anchor() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, None);
        rc.on_spm_update(120);
        rc.on_step_event(0.125);
        assert!((rc.target_rate() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn corrected_target_stays_clamped() {
        let mut rc = RateController::default();
        rc.set_track_tempo(60.0, Some(0.0));
        rc.on_spm_update(85); // base ratio ~1.417 -> clamped to 1.4
        rc.on_step_event(0.25); // e = 0.25 at period 1.0s, correction -0.1
        assert!(rc.target_rate() <= 1.4 && rc.target_rate() >= 0.7);
    }

    #[test]
    fn reset_restores_unity_and_clears_state() {
        let mut rc = RateController::default();
        rc.set_track_tempo(120.0, Some(0.0));
        rc.on_spm_update(150);
        rc.on_step_event(0.1);
        for _ in 0..10 {
            rc.tick();
        }
        rc.reset();
        assert_eq!(rc.target_rate(), 1.0);
        assert_eq!(rc.current_rate(), 1.0);
        // Tempo reference survives a reset.
        rc.on_spm_update(150);
        assert!((rc.target_rate() - 1.25).abs() < 1e-6);
    }
}
