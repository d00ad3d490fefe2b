// src/main.rs

use anyhow::bail;

use stridebeat::step::GRAVITY_MSS;
use stridebeat::{
    AccelSample, RateController, StepConfig, StepDetector, StepInput, StepOutput, detect_file,
};

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let mut json = false;
    let mut free: Vec<String> = Vec::new();
    for arg in std::env::args().skip(1) {
        if arg == "--json" {
            json = true;
        } else {
            free.push(arg);
        }
    }
    let Some(path) = free.first() else {
        bail!("usage: stridebeat [--json] <audio-file> [walk-spm]");
    };
    let walk_spm: f32 = free
        .get(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(110.0);

    let result = detect_file(path)?;

    if json {
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }

    println!(
        "Detected {} BPM, beat offset {:.3}s",
        result.bpm, result.beat_offset
    );
    println!("Simulating a {walk_spm:.0} SPM walk...");
    simulate_walk(result.bpm as f32, result.beat_offset, walk_spm);
    Ok(())
}

/// Feed a synthetic walker through the full detector -> controller loop and
/// print the converging playback rate, one line per simulated second.
fn simulate_walk(bpm: f32, beat_offset: f32, spm: f32) {
    let mut detector = StepDetector::new(StepConfig::default());
    let mut controller = RateController::default();
    controller.set_track_tempo(bpm, Some(beat_offset));

    let step_interval_ms = (60_000.0 / spm) as u64;
    let sensor_period_ms = 17u64; // ~60 Hz sensor
    let mut audio_pos = 0.0f32;
    let mut now_ms = 0u64;
    let mut next_report_ms = 1000u64;

    while now_ms < 30_000 {
        // Spike for the first ~70 ms of every step, resting weight otherwise.
        let phase_ms = now_ms % step_interval_ms;
        let z = if phase_ms < 70 { GRAVITY_MSS + 3.0 } else { GRAVITY_MSS };
        let events = detector.feed(StepInput::Sensor(AccelSample {
            timestamp_ms: now_ms,
            x: 0.0,
            y: 0.0,
            z,
        }));
        for ev in events {
            match ev {
                StepOutput::Step { .. } => controller.on_step_event(audio_pos),
                StepOutput::SpmChange(v) => controller.on_spm_update(v),
            }
        }

        let rate = controller.tick();
        audio_pos += rate * sensor_period_ms as f32 / 1000.0;
        now_ms += sensor_period_ms;

        if now_ms >= next_report_ms {
            println!(
                "t={:>2}s  spm={:>3}  rate={:.3}",
                now_ms / 1000,
                detector.spm(),
                rate
            );
            next_report_ms += 1000;
        }
    }
}
