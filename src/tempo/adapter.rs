// src/tempo/adapter.rs

use std::fs::File;

use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::default::{get_codecs, get_probe};

use crate::error::TempoError;
use crate::tempo::estimator::{TempoEstimator, TempoResult};

/// Decode a file and run tempo analysis on it. Decode failures surface as
/// [`TempoError::Decode`]; the caller falls back to manual/tap entry.
pub fn detect_file(path: &str) -> Result<TempoResult, TempoError> {
    let (samples, sample_rate, channels) = decode_to_vec(path)?;
    TempoEstimator::new().detect(&samples, channels, sample_rate)
}

/// Full-file decode to interleaved f32. Format is locked from the first
/// valid packet; later mono/stereo mismatches are mapped onto it.
pub fn decode_to_vec(path: &str) -> Result<(Vec<f32>, u32, usize), TempoError> {
    let file = File::open(path).map_err(|e| TempoError::Decode(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = get_probe()
        .format(
            &Default::default(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| TempoError::Decode(e.to_string()))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| TempoError::Decode("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| TempoError::Decode(e.to_string()))?;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut out = Vec::<f32>::new();

    let mut sample_rate = 44_100u32;
    let mut channels = 2usize;
    let mut format_locked = false;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break, // end of stream
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue, // tolerate corrupt packets
        };

        let spec = decoded.spec();
        let current_channels = spec.channels.count();
        let current_rate = spec.rate;

        if !format_locked {
            if decoded.frames() > 0 {
                sample_rate = current_rate;
                channels = current_channels;
                format_locked = true;
                debug!("decode: locked format {} Hz / {} ch", sample_rate, channels);
            } else {
                continue;
            }
        }

        let needs_new = sample_buf
            .as_ref()
            .map_or(true, |b| b.capacity() < decoded.capacity());
        if needs_new {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, *spec));
        }
        let buf = match sample_buf.as_mut() {
            Some(b) => b,
            None => continue,
        };
        buf.copy_interleaved_ref(decoded);
        let new_samples = buf.samples();

        if current_channels == channels {
            out.extend_from_slice(new_samples);
        } else if current_channels == 1 && channels == 2 {
            for &s in new_samples {
                out.push(s);
                out.push(s);
            }
        } else if current_channels == 2 && channels == 1 {
            for pair in new_samples.chunks_exact(2) {
                out.push((pair[0] + pair[1]) * 0.5);
            }
        } else {
            warn!(
                "decode: skipping packet with {} channels (locked to {})",
                current_channels, channels
            );
        }
    }

    if out.is_empty() {
        return Err(TempoError::Decode("no decodable audio data".into()));
    }
    debug!("decode: {} samples total", out.len());
    Ok((out, sample_rate, channels))
}
