// src/step/tracker.rs

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info, warn};

use crate::error::StepError;
use crate::step::detector::{AccelSample, StepConfig, StepDetector, StepInput, StepOutput};

const DECAY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Callback closure deciding whether motion-sensing consent is granted.
/// The platform collaborator owns the actual consent flow.
pub type PermissionProbe = Box<dyn FnMut() -> bool + Send>;

struct DecayTask {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Lifecycle wrapper around [`StepDetector`]: owns the ~1 Hz decay task
/// (started on `start()`, stopped on `stop()`, never free-running) and a
/// channel of [`StepOutput`] notices for whoever wants to listen. The
/// notice stream is informational only; detector state stays correct
/// whether or not anyone drains it.
pub struct StepTracker {
    detector: Arc<Mutex<StepDetector>>,
    tx: Sender<StepOutput>,
    rx: Receiver<StepOutput>,
    permission_probe: Option<PermissionProbe>,
    epoch: Instant,
    decay: Option<DecayTask>,
}

impl StepTracker {
    pub fn new(config: StepConfig) -> Self {
        let (tx, rx) = unbounded();
        Self {
            detector: Arc::new(Mutex::new(StepDetector::new(config))),
            tx,
            rx,
            permission_probe: None,
            epoch: Instant::now(),
            decay: None,
        }
    }

    pub fn with_permission_probe(mut self, probe: impl FnMut() -> bool + Send + 'static) -> Self {
        self.permission_probe = Some(Box::new(probe));
        self
    }

    /// Event stream; receivers can be cloned and dropped freely.
    pub fn events(&self) -> Receiver<StepOutput> {
        self.rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.decay.is_some()
    }

    /// Begin consuming. Checks motion-sensing consent, then spawns the
    /// decay task.
    pub fn start(&mut self) -> Result<(), StepError> {
        if self.decay.is_some() {
            return Ok(());
        }
        if let Some(probe) = self.permission_probe.as_mut() {
            if !probe() {
                warn!("step tracking unavailable: motion permission denied");
                return Err(StepError::PermissionDenied);
            }
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let detector = Arc::clone(&self.detector);
        let tx = self.tx.clone();
        let epoch = self.epoch;
        let handle = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(DECAY_POLL_INTERVAL) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let now_ms = epoch.elapsed().as_millis() as u64;
                        let decayed = detector.lock().ok().and_then(|mut d| d.poll_decay(now_ms));
                        if let Some(ev) = decayed {
                            debug!("step silence: spm decayed to 0");
                            let _ = tx.send(ev);
                        }
                    }
                }
            }
        });

        self.decay = Some(DecayTask { stop_tx, handle });
        info!("step tracking started");
        Ok(())
    }

    /// Halt consumption and clear timing/decay state.
    pub fn stop(&mut self) {
        if let Some(task) = self.decay.take() {
            let _ = task.stop_tx.send(());
            let _ = task.handle.join();
        }
        if let Ok(mut det) = self.detector.lock() {
            det.reset();
        }
        info!("step tracking stopped");
    }

    pub fn set_threshold(&self, threshold: f32) {
        if let Ok(mut det) = self.detector.lock() {
            det.set_threshold(threshold);
        }
    }

    /// Feed one sensor sample; called from the sensor callback, never blocks
    /// beyond the detector's own lock.
    pub fn feed(&self, sample: AccelSample) {
        self.process(StepInput::Sensor(sample));
    }

    /// Inject a synthetic step (desktop/simulation path). Funnels through
    /// the same acceptance/debounce/SPM logic as sensor-driven steps.
    pub fn simulate_step(&self) {
        let timestamp_ms = self.now_ms();
        self.process(StepInput::Simulated { timestamp_ms });
    }

    pub fn spm(&self) -> u16 {
        self.detector.lock().map(|d| d.spm()).unwrap_or(0)
    }

    pub fn step_count(&self) -> u64 {
        self.detector.lock().map(|d| d.step_count()).unwrap_or(0)
    }

    fn process(&self, input: StepInput) {
        let events = match self.detector.lock() {
            Ok(mut det) => det.feed(input),
            Err(_) => return,
        };
        for ev in events {
            let _ = self.tx.send(ev);
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Drop for StepTracker {
    fn drop(&mut self) {
        if let Some(task) = self.decay.take() {
            let _ = task.stop_tx.send(());
            let _ = task.handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_permission_fails_start() {
        let mut tracker = StepTracker::new(StepConfig::default()).with_permission_probe(|| false);
        assert!(matches!(tracker.start(), Err(StepError::PermissionDenied)));
        assert!(!tracker.is_running());
    }

    #[test]
    fn granted_permission_starts_and_stops() {
        let mut tracker = StepTracker::new(StepConfig::default()).with_permission_probe(|| true);
        tracker.start().unwrap();
        assert!(tracker.is_running());
        // start() while running is a no-op
        tracker.start().unwrap();
        tracker.stop();
        assert!(!tracker.is_running());
    }

    #[test]
    fn simulated_steps_reach_the_event_stream() {
        let tracker = StepTracker::new(StepConfig::default());
        let events = tracker.events();
        tracker.simulate_step();
        let ev = events.try_recv().expect("a step notice");
        assert!(matches!(ev, StepOutput::Step { count: 1, .. }));
    }

    #[test]
    fn back_to_back_simulated_steps_are_debounced() {
        let tracker = StepTracker::new(StepConfig::default());
        tracker.simulate_step();
        tracker.simulate_step(); // well inside the 280 ms window
        assert_eq!(tracker.step_count(), 1);
    }

    #[test]
    fn stop_clears_detector_state() {
        let mut tracker = StepTracker::new(StepConfig::default());
        tracker.start().unwrap();
        tracker.simulate_step();
        tracker.stop();
        assert_eq!(tracker.spm(), 0);
    }
}
