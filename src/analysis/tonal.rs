//! Tonal analyzer: key/mode detection and the Camelot wheel.
//!
//! Primary path: four 15s anchors (20%/35%/50%/80% of duration), high-passed
//! at 100 Hz and peak-normalized, each reduced to a 12-bin chroma vector via
//! `rustfft` and correlated against Krumhansl-Kessler major/minor key
//! profiles (the chroma/STFT idiom generalized from `mecomp-analysis`'s
//! `utils.rs`). Fallback: per-frame F0 histogram (aubio YinFFT, the same
//! crate + do_result idiom as the rhythm analyzer's onset tracker) matched
//! against diatonic scale templates.

use bliss_audio_aubio_rs::{Pitch, PitchMode};
use rustfft::{num_complex::Complex, FftPlanner};
use std::collections::HashMap;

use crate::decoder::Pcm;
use crate::types::{Camelot, CamelotLetter, Key, Mode, PitchClass};

#[derive(Debug, Clone)]
pub struct TonalDescriptor {
    pub key: Option<Key>,
    pub key_strength: f64,
    pub camelot: Camelot,
    pub camelot_compatible: [Camelot; 4],
}

const MIN_CHROMA_STRENGTH: f64 = 0.35;
const ANCHOR_LEN_MS: i64 = 15_000;
const ANCHOR_FRACTIONS: [f64; 4] = [0.20, 0.35, 0.50, 0.80];

// Krumhansl-Kessler key profiles, starting at C.
const MAJOR_PROFILE: [f64; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];
const MINOR_PROFILE: [f64; 12] = [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

// Diatonic scale templates (semitone presence from the tonic) for the fallback path.
const MAJOR_SCALE: [f64; 12] = [1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
const MINOR_SCALE: [f64; 12] = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0];

// The 24-cell Camelot wheel, indexed by pitch class (0 = C).
const MAJOR_CAMELOT_NUMBER: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];
const MINOR_CAMELOT_NUMBER: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];

pub fn analyze(pcm: &Pcm) -> TonalDescriptor {
    let duration_ms = pcm.duration_ms();
    let mut groups: HashMap<(usize, bool), Vec<f64>> = HashMap::new();

    for (start_ms, end_ms) in anchor_windows(duration_ms) {
        if end_ms <= start_ms {
            continue;
        }
        let mut slice = ms_slice(pcm, start_ms, end_ms);
        if slice.is_empty() {
            continue;
        }
        slice = high_pass(&slice, pcm.sample_rate, 100.0);
        peak_normalize(&mut slice, 0.99);
        let chroma = chroma_vector(&slice, pcm.sample_rate);
        let (key, strength) = best_key_for_chroma(&chroma);
        groups
            .entry((key.tonic.index(), key.mode == Mode::Major))
            .or_default()
            .push(strength);
    }

    let best_group = groups
        .iter()
        .max_by(|a, b| mean(a.1).partial_cmp(&mean(b.1)).unwrap());

    let (key, strength) = match best_group {
        Some((&(tonic_idx, is_major), strengths)) if mean(strengths) >= MIN_CHROMA_STRENGTH => {
            let mode = if is_major { Mode::Major } else { Mode::Minor };
            (Some(Key { tonic: PitchClass::from_index(tonic_idx), mode }), mean(strengths))
        }
        _ => fallback_key(pcm),
    };

    let camelot = key.map(key_to_camelot).unwrap_or(Camelot::new(8, CamelotLetter::B));
    let camelot_compatible = camelot.compatible();

    TonalDescriptor { key, key_strength: strength, camelot, camelot_compatible }
}

pub fn key_to_camelot(key: Key) -> Camelot {
    let idx = key.tonic.index();
    match key.mode {
        Mode::Major => Camelot::new(MAJOR_CAMELOT_NUMBER[idx], CamelotLetter::B),
        Mode::Minor => Camelot::new(MINOR_CAMELOT_NUMBER[idx], CamelotLetter::A),
    }
}

fn anchor_windows(duration_ms: i64) -> Vec<(i64, i64)> {
    ANCHOR_FRACTIONS
        .iter()
        .map(|&frac| {
            let center = (duration_ms as f64 * frac) as i64;
            let start = (center - ANCHOR_LEN_MS / 2).max(0);
            let end = (start + ANCHOR_LEN_MS).min(duration_ms);
            let start = (end - ANCHOR_LEN_MS).max(0);
            (start, end)
        })
        .collect()
}

fn ms_slice(pcm: &Pcm, start_ms: i64, end_ms: i64) -> Vec<f32> {
    let start = ((start_ms as f64 / 1000.0) * pcm.sample_rate as f64) as usize;
    let end = (((end_ms as f64 / 1000.0) * pcm.sample_rate as f64) as usize).min(pcm.samples.len());
    if start >= end {
        Vec::new()
    } else {
        pcm.samples[start..end].to_vec()
    }
}

fn high_pass(samples: &[f32], sample_rate: u32, cutoff_hz: f32) -> Vec<f32> {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f32;
    let alpha = rc / (rc + dt);
    let mut out = Vec::with_capacity(samples.len());
    let (mut prev_in, mut prev_out) = (0.0f32, 0.0f32);
    for &x in samples {
        let y = alpha * (prev_out + x - prev_in);
        out.push(y);
        prev_in = x;
        prev_out = y;
    }
    out
}

fn peak_normalize(samples: &mut [f32], target: f32) {
    let peak = samples.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    if peak > 0.0 {
        let gain = target / peak;
        for s in samples.iter_mut() {
            *s *= gain;
        }
    }
}

const CHROMA_FRAME: usize = 4_096;
const CHROMA_HOP: usize = 2_048;

fn chroma_vector(samples: &[f32], sample_rate: u32) -> [f64; 12] {
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(CHROMA_FRAME);
    let mut chroma = [0.0f64; 12];
    let mut pos = 0;
    while pos + CHROMA_FRAME <= samples.len() {
        let mut buffer: Vec<Complex<f32>> = samples[pos..pos + CHROMA_FRAME]
            .iter()
            .map(|&s| Complex { re: s, im: 0.0 })
            .collect();
        fft.process(&mut buffer);
        for (bin, c) in buffer.iter().enumerate().take(CHROMA_FRAME / 2) {
            let freq = bin as f64 * sample_rate as f64 / CHROMA_FRAME as f64;
            if !(27.5..4_200.0).contains(&freq) {
                continue;
            }
            chroma[freq_to_pitch_class(freq)] += c.norm() as f64;
        }
        pos += CHROMA_HOP;
    }
    let total: f64 = chroma.iter().sum();
    if total > 0.0 {
        for c in &mut chroma {
            *c /= total;
        }
    }
    chroma
}

fn freq_to_pitch_class(freq: f64) -> usize {
    let midi = 69.0 + 12.0 * (freq / 440.0).log2();
    (midi.round() as i64).rem_euclid(12) as usize
}

fn correlate(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
    let var_a: f64 = a.iter().map(|x| (x - mean_a).powi(2)).sum();
    let var_b: f64 = b.iter().map(|y| (y - mean_b).powi(2)).sum();
    if var_a <= 0.0 || var_b <= 0.0 {
        0.0
    } else {
        cov / (var_a.sqrt() * var_b.sqrt())
    }
}

fn rotate(profile: &[f64; 12], tonic_idx: usize) -> Vec<f64> {
    (0..12).map(|i| profile[(i + 12 - tonic_idx) % 12]).collect()
}

fn best_key_for_chroma(chroma: &[f64; 12]) -> (Key, f64) {
    let mut best = (Key { tonic: PitchClass::C, mode: Mode::Major }, f64::MIN);
    for tonic_idx in 0..12 {
        for (mode, profile) in [(Mode::Major, &MAJOR_PROFILE), (Mode::Minor, &MINOR_PROFILE)] {
            let score = correlate(chroma, &rotate(profile, tonic_idx));
            if score > best.1 {
                best = (Key { tonic: PitchClass::from_index(tonic_idx), mode }, score);
            }
        }
    }
    (best.0, ((best.1 + 1.0) / 2.0).clamp(0.0, 1.0))
}

fn fallback_key(pcm: &Pcm) -> (Option<Key>, f64) {
    let histogram = pitch_class_histogram(pcm);
    let total: f64 = histogram.iter().sum();
    if total <= 0.0 {
        return (None, 0.0);
    }

    let mut best = (Key { tonic: PitchClass::C, mode: Mode::Major }, f64::MIN);
    for tonic_idx in 0..12 {
        for (mode, template) in [(Mode::Major, &MAJOR_SCALE), (Mode::Minor, &MINOR_SCALE)] {
            let rotated = rotate(template, tonic_idx);
            let score: f64 = histogram.iter().zip(&rotated).map(|(h, t)| h * t).sum::<f64>() / total;
            if score > best.1 {
                best = (Key { tonic: PitchClass::from_index(tonic_idx), mode }, score);
            }
        }
    }
    (Some(best.0), best.1.clamp(0.0, 1.0))
}

fn pitch_class_histogram(pcm: &Pcm) -> [f64; 12] {
    const WINDOW: usize = 2_048;
    const HOP: usize = 1_024;
    let mut histogram = [0.0; 12];
    let Ok(mut detector) = Pitch::new(PitchMode::Yinfft, WINDOW, HOP, pcm.sample_rate) else {
        return histogram;
    };
    for chunk in pcm.samples.chunks(HOP) {
        if chunk.len() < HOP {
            break;
        }
        if let Ok(freq) = detector.do_result(chunk) {
            if freq > 20.0 {
                histogram[freq_to_pitch_class(freq as f64)] += 1.0;
            }
        }
    }
    histogram
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_major_maps_to_8b() {
        let key = Key { tonic: PitchClass::C, mode: Mode::Major };
        assert_eq!(key_to_camelot(key).to_code(), "8B");
    }

    #[test]
    fn a_minor_maps_to_8a() {
        let key = Key { tonic: PitchClass::A, mode: Mode::Minor };
        assert_eq!(key_to_camelot(key).to_code(), "8A");
    }

    #[test]
    fn relative_major_minor_share_camelot_number() {
        let c_major = key_to_camelot(Key { tonic: PitchClass::C, mode: Mode::Major });
        let a_minor = key_to_camelot(Key { tonic: PitchClass::A, mode: Mode::Minor });
        assert_eq!(c_major.number, a_minor.number);
    }

    #[test]
    fn silence_has_no_pitch_class_evidence() {
        let pcm = Pcm { samples: vec![0.0; 44_100 * 2], sample_rate: 44_100 };
        let (key, strength) = fallback_key(&pcm);
        assert!(key.is_none());
        assert_eq!(strength, 0.0);
    }

    #[test]
    fn correlate_identical_profiles_is_one() {
        assert!((correlate(&MAJOR_PROFILE, &MAJOR_PROFILE) - 1.0).abs() < 1e-9);
    }
}
