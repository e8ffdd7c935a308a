//! Decode & frame iterator.
//!
//! Decodes common compressed formats into a single mono `f32` channel at a
//! target sample rate, via `rodio`'s `Decoder` (which itself demuxes/decodes
//! through `symphonia`) followed by `rubato`'s `FastFixedIn` resampler.
//! Multi-channel sources are downmixed to mono; stereo uses the equal-power
//! `(l + r) * sqrt(2)/2` form.

use rodio::Source;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::f32::consts::SQRT_2;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::errors::DecodeError;

pub const DEFAULT_FRAME_SIZE: usize = 2_048;
pub const DEFAULT_HOP_SIZE: usize = 1_024;

/// Decoded audio: mono `f32` PCM at `sample_rate`.
#[derive(Debug, Clone)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn duration_ms(&self) -> i64 {
        ((self.samples.len() as f64 / self.sample_rate as f64) * 1000.0).round() as i64
    }

    /// A windowed view over the PCM buffer with the given frame size and hop,
    /// for frequency-domain analyses.
    pub fn frames(&self, frame_size: usize, hop: usize) -> FrameIter<'_> {
        FrameIter {
            samples: &self.samples,
            frame_size,
            hop,
            pos: 0,
        }
    }

    /// Normalize RMS toward `target_dbfs`, hard-limiting peaks to +/-1.0.
    pub fn normalize_to(&mut self, target_dbfs: f64) {
        let rms = rms(&self.samples);
        if rms <= 0.0 {
            return;
        }
        let target_rms = 10f64.powf(target_dbfs / 20.0);
        let gain = (target_rms / rms as f64) as f32;
        for s in &mut self.samples {
            *s = (*s * gain).clamp(-1.0, 1.0);
        }
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// A frame iterator over a borrowed sample slice. Shorter trailing frames are
/// zero-padded so every frame has exactly `frame_size` samples.
pub struct FrameIter<'a> {
    samples: &'a [f32],
    frame_size: usize,
    hop: usize,
    pos: usize,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Vec<f32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.samples.len() {
            return None;
        }
        let end = (self.pos + self.frame_size).min(self.samples.len());
        let mut frame = vec![0.0f32; self.frame_size];
        frame[..end - self.pos].copy_from_slice(&self.samples[self.pos..end]);
        self.pos += self.hop;
        Some(frame)
    }
}

/// Decode `path` to mono PCM at `target_sample_rate`.
pub fn decode(path: &Path, target_sample_rate: u32) -> Result<Pcm, DecodeError> {
    let file = BufReader::new(File::open(path)?);
    let source = rodio::Decoder::new(file)
        .map_err(|e| DecodeError::Failed(e.to_string()))?
        .convert_samples::<f32>();

    let num_channels = source.channels() as usize;
    let source_sample_rate = source.sample_rate();
    if num_channels == 0 {
        return Err(DecodeError::Failed("no audio streams in file".into()));
    }

    let raw: Vec<f32> = source.collect();
    if raw.is_empty() {
        return Err(DecodeError::Failed("truncated or empty audio stream".into()));
    }

    let mono = downmix(&raw, num_channels);
    let resampled = resample(mono, source_sample_rate, target_sample_rate)?;

    Ok(Pcm {
        samples: resampled,
        sample_rate: target_sample_rate,
    })
}

fn downmix(interleaved: &[f32], num_channels: usize) -> Vec<f32> {
    match num_channels {
        1 => interleaved.to_vec(),
        2 => interleaved
            .chunks_exact(2)
            .map(|c| (c[0] + c[1]) * SQRT_2 / 2.0)
            .collect(),
        n => {
            log::warn!("downmixing {n}-channel source to mono by averaging");
            interleaved
                .chunks_exact(n)
                .map(|c| c.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

fn resample(mono: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>, DecodeError> {
    if from_rate == to_rate {
        return Ok(mono);
    }
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler = FastFixedIn::new(ratio, 1.0, PolynomialDegree::Cubic, mono.len(), 1)
        .map_err(|e| DecodeError::Failed(format!("resampler init failed: {e}")))?;
    let out = resampler
        .process(&[&mono], None)
        .map_err(|e| DecodeError::Failed(format!("resample failed: {e}")))?;
    Ok(out[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_iter_pads_trailing_frame() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let pcm = Pcm { samples, sample_rate: 44_100 };
        let frames: Vec<_> = pcm.frames(4, 2).collect();
        assert_eq!(frames[0], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(frames[1], vec![3.0, 4.0, 5.0, 0.0]);
    }

    #[test]
    fn duration_ms_matches_sample_count() {
        let pcm = Pcm { samples: vec![0.0; 44_100], sample_rate: 44_100 };
        assert_eq!(pcm.duration_ms(), 1000);
    }

    #[test]
    fn normalize_clips_peaks_to_unit_range() {
        let mut pcm = Pcm { samples: vec![0.01; 1000], sample_rate: 44_100 };
        pcm.normalize_to(-3.0);
        assert!(pcm.samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn downmix_stereo_uses_equal_power_sum() {
        let interleaved = vec![1.0, 1.0, 0.0, 0.0];
        let mono = downmix(&interleaved, 2);
        assert!((mono[0] - SQRT_2).abs() < 1e-6);
        assert_eq!(mono[1], 0.0);
    }
}
