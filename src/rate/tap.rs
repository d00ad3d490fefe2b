// src/rate/tap.rs

/// Manual tempo entry from user-timed taps. A long pause starts a fresh
/// run; the estimate is the average interval across the current run.
pub struct TapEstimator {
    taps: Vec<u64>,
    restart_gap_ms: u64,
    bpm: Option<f32>,
}

const DEFAULT_RESTART_GAP_MS: u64 = 2000;
const MAX_TAPS: usize = 16;
const MIN_BPM: f32 = 60.0;
const MAX_BPM: f32 = 200.0;

impl TapEstimator {
    pub fn new() -> Self {
        Self {
            taps: Vec::with_capacity(MAX_TAPS),
            restart_gap_ms: DEFAULT_RESTART_GAP_MS,
            bpm: None,
        }
    }

    /// Register a tap at a monotonic timestamp. Returns the current
    /// estimate once at least two taps are in the run. Out-of-range results
    /// are policy-rejected and the previous estimate retained.
    pub fn tap(&mut self, timestamp_ms: u64) -> Option<f32> {
        if let Some(&last) = self.taps.last() {
            if timestamp_ms.saturating_sub(last) > self.restart_gap_ms {
                self.taps.clear();
            }
        }
        self.taps.push(timestamp_ms);
        if self.taps.len() > MAX_TAPS {
            self.taps.remove(0);
        }

        if self.taps.len() >= 2 {
            let first = self.taps[0];
            let last = self.taps[self.taps.len() - 1];
            let mean_interval = (last - first) as f32 / (self.taps.len() - 1) as f32;
            if mean_interval > 0.0 {
                let bpm = 60_000.0 / mean_interval;
                if (MIN_BPM..=MAX_BPM).contains(&bpm) {
                    self.bpm = Some(bpm);
                }
            }
        }
        self.bpm
    }

    pub fn bpm(&self) -> Option<f32> {
        self.bpm
    }

    pub fn tap_count(&self) -> usize {
        self.taps.len()
    }

    pub fn reset(&mut self) {
        self.taps.clear();
        self.bpm = None;
    }
}

impl Default for TapEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_taps_give_their_tempo() {
        let mut tap = TapEstimator::new();
        assert_eq!(tap.tap(0), None);
        assert_eq!(tap.tap(500), Some(120.0));
        tap.tap(1000);
        let bpm = tap.tap(1500).unwrap();
        assert!((bpm - 120.0).abs() < 0.01);
    }

    #[test]
    fn long_pause_restarts_the_run() {
        let mut tap = TapEstimator::new();
        tap.tap(0);
        tap.tap(500);
        // 5 s pause: new run, old taps don't pollute the average.
        tap.tap(5500);
        tap.tap(6100);
        let bpm = tap.bpm().unwrap();
        assert!((bpm - 100.0).abs() < 0.01, "got {bpm}");
    }

    #[test]
    fn too_fast_taps_retain_previous_estimate() {
        let mut tap = TapEstimator::new();
        tap.tap(0);
        tap.tap(500); // 120 BPM
        let mut t = 500;
        for _ in 0..4 {
            t += 100; // 600 BPM territory
            tap.tap(t);
        }
        assert_eq!(tap.bpm(), Some(120.0));
    }

    #[test]
    fn reset_clears_everything() {
        let mut tap = TapEstimator::new();
        tap.tap(0);
        tap.tap(500);
        tap.reset();
        assert_eq!(tap.bpm(), None);
        assert_eq!(tap.tap_count(), 0);
    }
}
