// src/tempo/envelope.rs

/// Interleaved to mono by channel averaging.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let frames = interleaved.len() / channels;
    let mut out = Vec::with_capacity(frames);
    for chunk in interleaved.chunks_exact(channels) {
        let mut s = 0.0f32;
        for &c in chunk {
            s += c;
        }
        out.push(s / channels as f32);
    }
    out
}

/// Short-time RMS energy: `win`-sample windows every `hop` samples.
pub fn rms_frames(x: &[f32], win: usize, hop: usize) -> Vec<f32> {
    if x.len() < win || win == 0 || hop == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity((x.len() - win) / hop + 1);
    let mut pos = 0usize;
    while pos + win <= x.len() {
        let sum: f32 = x[pos..pos + win].iter().map(|s| s * s).sum();
        out.push((sum / win as f32).sqrt());
        pos += hop;
    }
    out
}

/// Onset envelope from frame energies: half-wave rectified first difference
/// (rhythmic events are energy increases), then local-mean subtraction over
/// a ±`mean_radius` frame neighborhood so sustained loud sections don't
/// read as onset energy.
pub fn onset_strength(energies: &[f32], mean_radius: usize) -> Vec<f32> {
    let n = energies.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut onsets = vec![0.0f32; n];
    for t in 1..n {
        onsets[t] = (energies[t] - energies[t - 1]).max(0.0);
    }

    let mut out = vec![0.0f32; n];
    for t in 0..n {
        let lo = t.saturating_sub(mean_radius);
        let hi = (t + mean_radius).min(n - 1);
        let mean: f32 = onsets[lo..=hi].iter().sum::<f32>() / (hi - lo + 1) as f32;
        out[t] = (onsets[t] - mean).max(0.0);
    }
    out
}
