// src/tempo/estimator.rs

use log::{debug, info};
use rustfft::{FftPlanner, num_complex::Complex, num_traits::Zero};
use serde::{Deserialize, Serialize};

use crate::error::TempoError;
use crate::tempo::envelope::{downmix_to_mono, onset_strength, rms_frames};
use crate::tempo::filters::BandFilter;

/// Skip the intro: up to 15 s or 15% of the track, whichever is smaller.
const MAX_SKIP_SECS: f32 = 15.0;
const SKIP_FRACTION: f32 = 0.15;
/// Analyze at most 30 s after the skip; refuse anything under 5 s.
const MAX_WINDOW_SECS: f32 = 30.0;
const MIN_WINDOW_SECS: f32 = 5.0;
/// Onset envelope framing: 25 ms RMS windows at a 10 ms hop (~100 fps).
const RMS_WIN_SECS: f32 = 0.025;
const RMS_HOP_SECS: f32 = 0.010;
/// Neighborhood for the adaptive local-mean subtraction.
const LOCAL_MEAN_RADIUS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TempoOptions {
    pub min_bpm: usize,
    pub max_bpm: usize,
    /// Bass rhythm is the stronger tempo cue: `score = bass_weight·bass + full`.
    pub bass_weight: f32,
    /// Harmonics 1×..=N× of the beat period summed with equal weight.
    pub harmonics: usize,
    /// Prefer the half-tempo candidate when its score reaches this fraction
    /// of the winner's and the half-tempo itself is at least
    /// `half_tempo_floor`. Empirical, kept tunable.
    pub half_tempo_ratio: f32,
    pub half_tempo_floor: usize,
    /// Prefer the double-tempo candidate when it beats the winner by this
    /// factor. Empirical, kept tunable.
    pub double_tempo_ratio: f32,
    /// Mild Gaussian preference for musically common tempos.
    pub bias_center: f32,
    pub bias_width: f32,
    pub bias_floor: f32,
    pub bias_depth: f32,
}

impl Default for TempoOptions {
    fn default() -> Self {
        Self {
            min_bpm: 60,
            max_bpm: 200,
            bass_weight: 2.0,
            harmonics: 4,
            half_tempo_ratio: 0.85,
            half_tempo_floor: 80,
            double_tempo_ratio: 1.2,
            bias_center: 120.0,
            bias_width: 55.0,
            bias_floor: 0.8,
            bias_depth: 0.2,
        }
    }
}

/// One track's tempo analysis. Immutable once computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoResult {
    pub bpm: u16,
    /// Seconds from track start to the nearest beat, already reduced mod
    /// one beat period. Anchors beat prediction anywhere in the track.
    pub beat_offset: f32,
}

impl TempoResult {
    pub fn beat_period(&self) -> f32 {
        60.0 / self.bpm as f32
    }

    /// Predicted timestamp of the n-th beat: `beat_offset + n·period`.
    pub fn beat_time(&self, n: u32) -> f32 {
        self.beat_offset + n as f32 * self.beat_period()
    }
}

/// Offline tempo + beat-phase estimator. Runs once per loaded track, off
/// the real-time path.
pub struct TempoEstimator {
    opts: TempoOptions,
    planner: FftPlanner<f32>,
}

impl TempoEstimator {
    pub fn new() -> Self {
        Self::with_options(TempoOptions::default())
    }

    pub fn with_options(opts: TempoOptions) -> Self {
        Self {
            opts,
            planner: FftPlanner::new(),
        }
    }

    /// Analyze a decoded interleaved buffer.
    pub fn detect(
        &mut self,
        audio: &[f32],
        channels: usize,
        sample_rate: u32,
    ) -> Result<TempoResult, TempoError> {
        if channels == 0 || audio.is_empty() || sample_rate == 0 {
            return Err(TempoError::InsufficientData { secs: 0.0 });
        }
        let mono = downmix_to_mono(audio, channels);
        let sr = sample_rate as f32;
        let duration = mono.len() as f32 / sr;

        let skip = MAX_SKIP_SECS.min(SKIP_FRACTION * duration);
        let window_secs = MAX_WINDOW_SECS.min(duration - skip);
        if window_secs < MIN_WINDOW_SECS {
            return Err(TempoError::InsufficientData {
                secs: window_secs.max(0.0),
            });
        }
        let start = (skip * sr) as usize;
        let end = (start + (window_secs * sr) as usize).min(mono.len());
        let segment = &mono[start..end];

        let seg_rms =
            (segment.iter().map(|s| s * s).sum::<f32>() / segment.len() as f32).sqrt();
        if seg_rms < 1e-5 {
            // A silent window carries no rhythmic content.
            return Err(TempoError::InsufficientData { secs: window_secs });
        }

        let bass = BandFilter::bass(sample_rate)?.process(segment);
        let full = BandFilter::full_range(sample_rate)?.process(segment);

        let hop = ((sr * RMS_HOP_SECS).round() as usize).max(1);
        let win = ((sr * RMS_WIN_SECS).round() as usize).max(hop);
        let env_rate = sr / hop as f32;

        let bass_onset = onset_strength(&rms_frames(&bass, win, hop), LOCAL_MEAN_RADIUS);
        let full_onset = onset_strength(&rms_frames(&full, win, hop), LOCAL_MEAN_RADIUS);
        debug!(
            "tempo analysis: {:.1}s window, {} onset frames at {:.1} fps",
            window_secs,
            bass_onset.len(),
            env_rate
        );

        // Lags up to 4x the slowest candidate's beat period.
        let max_lag = ((4.0 * env_rate * 60.0 / self.opts.min_bpm as f32).ceil() as usize)
            .min(bass_onset.len().saturating_sub(1));
        let ac_bass = self.autocorrelate(&bass_onset, max_lag);
        let ac_full = self.autocorrelate(&full_onset, max_lag);

        let scores = self.comb_scores(&ac_bass, &ac_full, env_rate);
        let mut best = self.opts.min_bpm;
        for bpm in self.opts.min_bpm..=self.opts.max_bpm {
            if scores[bpm] > scores[best] {
                best = bpm;
            }
        }
        let chosen = resolve_octave(&scores, best, &self.opts);
        if chosen != best {
            debug!("octave disambiguation: {best} -> {chosen}");
        }

        let frame_event_secs = (win as f32 - hop as f32 / 2.0) / sr;
        let beat_offset = self.beat_phase(
            &bass_onset,
            &full_onset,
            chosen,
            env_rate,
            skip,
            frame_event_secs,
        );
        info!("tempo: {chosen} BPM, beat offset {beat_offset:.3}s");

        Ok(TempoResult {
            bpm: chosen as u16,
            beat_offset,
        })
    }

    /// Comb-filter score per integer BPM candidate: band autocorrelation
    /// summed at harmonics of the beat period, bass-weighted, biased toward
    /// common tempos.
    fn comb_scores(&self, ac_bass: &[f32], ac_full: &[f32], env_rate: f32) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.opts.max_bpm + 1];
        for bpm in self.opts.min_bpm..=self.opts.max_bpm {
            let period = env_rate * 60.0 / bpm as f32;
            let mut bass_score = 0.0f32;
            let mut full_score = 0.0f32;
            for h in 1..=self.opts.harmonics {
                let lag = (period * h as f32).round() as usize;
                if lag == 0 || lag >= ac_bass.len() {
                    continue;
                }
                bass_score += ac_bass[lag];
                full_score += ac_full[lag];
            }
            scores[bpm] =
                (self.opts.bass_weight * bass_score + full_score) * self.bias(bpm as f32);
        }
        scores
    }

    fn bias(&self, bpm: f32) -> f32 {
        let z = (bpm - self.opts.bias_center) / self.opts.bias_width;
        self.opts.bias_floor + self.opts.bias_depth * (-0.5 * z * z).exp()
    }

    /// Energy-normalized autocorrelation (zero-lag = 1) via FFT, linear
    /// through zero padding.
    fn autocorrelate(&mut self, x: &[f32], max_lag: usize) -> Vec<f32> {
        let n = x.len();
        if n == 0 || max_lag == 0 {
            return vec![0.0; max_lag + 1];
        }
        let mut conv = 1usize;
        while conv < n * 2 {
            conv <<= 1;
        }
        let fft = self.planner.plan_fft_forward(conv);
        let ifft = self.planner.plan_fft_inverse(conv);
        let mut buf: Vec<Complex<f32>> = vec![Complex::zero(); conv];
        for (slot, &v) in buf.iter_mut().zip(x.iter()) {
            slot.re = v;
        }
        fft.process(&mut buf);
        for v in buf.iter_mut() {
            let (re, im) = (v.re, v.im);
            *v = Complex {
                re: re * re + im * im,
                im: 0.0,
            };
        }
        ifft.process(&mut buf);

        let zero_lag = buf[0].re;
        if zero_lag <= f32::EPSILON {
            return vec![0.0; max_lag + 1];
        }
        (0..=max_lag)
            .map(|lag| if lag < n { buf[lag].re / zero_lag } else { 0.0 })
            .collect()
    }

    /// Search every onset-frame offset inside one beat period for the one
    /// maximizing beat-aligned onset energy, then convert back to track time.
    ///
    /// `frame_event_secs` is the time within a frame that an energy rise
    /// belongs to: the rise at diff index t comes from the hop of samples
    /// that just slid into the RMS window, centered at `t·hop + win − hop/2`.
    /// Without that attribution the anchor lands one to two frames early.
    fn beat_phase(
        &self,
        bass_onset: &[f32],
        full_onset: &[f32],
        bpm: usize,
        env_rate: f32,
        skip_secs: f32,
        frame_event_secs: f32,
    ) -> f32 {
        let period_frames = env_rate * 60.0 / bpm as f32;
        let phases = (period_frames.floor() as usize).max(1);
        let mut best_phase = 0usize;
        let mut best_sum = f32::MIN;
        for phase in 0..phases {
            let mut sum = 0.0f32;
            let mut pos = phase as f32;
            loop {
                let i = pos.round() as usize;
                if i >= bass_onset.len() {
                    break;
                }
                sum += self.opts.bass_weight * bass_onset[i] + full_onset[i];
                pos += period_frames;
            }
            if sum > best_sum {
                best_sum = sum;
                best_phase = phase;
            }
        }
        let beat_period = 60.0 / bpm as f32;
        (best_phase as f32 / env_rate + frame_event_secs + skip_secs).rem_euclid(beat_period)
    }
}

impl Default for TempoEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Half/double-tempo disambiguation. Autocorrelation comb scoring
/// systematically favors double tempo at harmonic peaks; the two checks
/// apply independently and may cascade.
fn resolve_octave(scores: &[f32], best: usize, opts: &TempoOptions) -> usize {
    let mut chosen = best;

    let half = chosen / 2;
    if half >= opts.half_tempo_floor
        && half >= opts.min_bpm
        && scores.get(half).copied().unwrap_or(0.0) >= opts.half_tempo_ratio * scores[chosen]
    {
        chosen = half;
    }

    let double = chosen * 2;
    if double <= opts.max_bpm
        && scores.get(double).copied().unwrap_or(0.0) > opts.double_tempo_ratio * scores[chosen]
    {
        chosen = double;
    }

    chosen
}
