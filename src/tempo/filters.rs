// src/tempo/filters.rs

use biquad::{Biquad, Coefficients, DirectForm2Transposed, Q_BUTTERWORTH_F32, ToHertz, Type};

use crate::error::TempoError;

const BASS_CUTOFF_HZ: f32 = 200.0;
const RUMBLE_CUTOFF_HZ: f32 = 60.0;

/// One analysis band: a chain of biquad stages run over a block.
pub struct BandFilter {
    stages: Vec<DirectForm2Transposed<f32>>,
}

impl BandFilter {
    /// Bass band: 4th-order Butterworth low-pass at 200 Hz, built from two
    /// cascaded 2nd-order stages. Isolates kick/bass rhythm.
    pub fn bass(sample_rate: u32) -> Result<Self, TempoError> {
        let coeffs = coefficients(sample_rate, Type::LowPass, BASS_CUTOFF_HZ)?;
        Ok(Self {
            stages: vec![
                DirectForm2Transposed::<f32>::new(coeffs),
                DirectForm2Transposed::<f32>::new(coeffs),
            ],
        })
    }

    /// Full-range band: a single high-pass at 60 Hz to strip DC and rumble.
    pub fn full_range(sample_rate: u32) -> Result<Self, TempoError> {
        let coeffs = coefficients(sample_rate, Type::HighPass, RUMBLE_CUTOFF_HZ)?;
        Ok(Self {
            stages: vec![DirectForm2Transposed::<f32>::new(coeffs)],
        })
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        input
            .iter()
            .map(|&x| self.stages.iter_mut().fold(x, |acc, stage| stage.run(acc)))
            .collect()
    }
}

fn coefficients(sample_rate: u32, ty: Type<f32>, freq: f32) -> Result<Coefficients<f32>, TempoError> {
    Coefficients::<f32>::from_params(ty, (sample_rate as f32).hz(), freq.hz(), Q_BUTTERWORTH_F32)
        .map_err(|_| TempoError::UnsupportedSampleRate(sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    fn sine(freq: f32, secs: f32) -> Vec<f32> {
        let n = (secs * SR as f32) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|s| s * s).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn bass_band_passes_low_and_rejects_high() {
        let low = BandFilter::bass(SR).unwrap().process(&sine(50.0, 1.0));
        let high = BandFilter::bass(SR).unwrap().process(&sine(2000.0, 1.0));
        // Skip the transient before measuring.
        let low_rms = rms(&low[SR as usize / 10..]);
        let high_rms = rms(&high[SR as usize / 10..]);
        assert!(low_rms > 0.5, "50 Hz should pass, rms {low_rms}");
        assert!(high_rms < 0.05 * low_rms, "2 kHz should be crushed, rms {high_rms}");
    }

    #[test]
    fn full_range_band_strips_dc() {
        let dc: Vec<f32> = vec![1.0; SR as usize];
        let out = BandFilter::full_range(SR).unwrap().process(&dc);
        let settled = rms(&out[SR as usize / 2..]);
        assert!(settled < 0.01, "DC should be removed, rms {settled}");
    }

    #[test]
    fn full_range_band_passes_mids() {
        let out = BandFilter::full_range(SR).unwrap().process(&sine(1000.0, 1.0));
        assert!(rms(&out[SR as usize / 10..]) > 0.5);
    }

    #[test]
    fn absurd_sample_rate_is_rejected() {
        assert!(matches!(
            BandFilter::bass(100),
            Err(TempoError::UnsupportedSampleRate(100))
        ));
    }
}
