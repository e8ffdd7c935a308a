//! Rhythm analyzer: BPM, beat/downbeat grid, meter, phrases.
//!
//! Beat tracking has three paths, tried in order: an aubio onset-based
//! tracker (`bliss_audio_aubio_rs::Tempo`, the same crate + onset-detection
//! idiom `mecomp-analysis::temporal::BPMDesc` uses for its tempo feature);
//! a band-passed envelope with descending-threshold peak picking; and a
//! last-resort fixed-window energy-peak detector. Meter inference folds
//! per-beat energy over each candidate numerator/offset and keeps the one
//! with the strongest (preference-weighted) z-score.

use bliss_audio_aubio_rs::{OnsetMode, Tempo};
use ndarray::arr1;
use ndarray_stats::interpolate::Midpoint;
use ndarray_stats::Quantile1dExt;
use noisy_float::prelude::*;
use std::collections::HashMap;

use crate::decoder::Pcm;
use crate::errors::AnalysisError;
use crate::types::Meter;

/// Meters the data model allows (§3); the search in step 3 ranges over
/// numerators 2..12 but only these are valid output values.
const ALLOWED_NUMERATORS: [u8; 8] = [2, 3, 4, 5, 6, 7, 8, 12];

#[derive(Debug, Clone)]
pub struct RhythmDescriptor {
    pub bpm: f64,
    pub beats_ms: Vec<i64>,
    pub downbeats_ms: Vec<i64>,
    pub meter: Meter,
    pub phrases_ms: Vec<i64>,
    pub beats_loudness: Vec<f64>,
}

pub fn analyze(pcm: &Pcm) -> Result<RhythmDescriptor, AnalysisError> {
    let (beats_ms, method) = detect_beats(pcm);
    if beats_ms.len() < 2 {
        return Err(AnalysisError::Rhythm("fewer than 2 beats detected on all fallback paths".into()));
    }
    log::debug!("rhythm: beat tracking via {method}, {} beats", beats_ms.len());

    let bpm = bpm_from_beats(&beats_ms).clamp(40.0, 220.0);
    let energies = beat_energies(pcm, &beats_ms);
    let (numerator, offset) = infer_meter(&energies);
    let denominator = denominator_for(numerator);
    let meter = Meter { numerator, denominator };

    let downbeats_ms: Vec<i64> = beats_ms
        .iter()
        .skip(offset)
        .step_by(numerator as usize)
        .copied()
        .collect();
    let downbeats_ms = if downbeats_ms.is_empty() {
        vec![beats_ms[0]]
    } else {
        downbeats_ms
    };

    let phrases_ms = phrases_from_downbeats(&downbeats_ms);
    let beats_loudness = energies.iter().map(|&e| 10.0 * (e + 1e-12).log10()).collect();

    Ok(RhythmDescriptor {
        bpm,
        beats_ms,
        downbeats_ms,
        meter,
        phrases_ms,
        beats_loudness,
    })
}

fn phrases_from_downbeats(downbeats_ms: &[i64]) -> Vec<i64> {
    let mut phrases: Vec<i64> = downbeats_ms.iter().step_by(8).copied().collect();
    if let Some(&last) = downbeats_ms.last() {
        if phrases.last() != Some(&last) {
            phrases.push(last);
        }
    }
    phrases
}

fn denominator_for(numerator: u8) -> u8 {
    if matches!(numerator, 6 | 9 | 12) {
        8
    } else {
        4
    }
}

fn detect_beats(pcm: &Pcm) -> (Vec<i64>, &'static str) {
    if let Some(beats) = track_beats_onset(pcm) {
        return (beats, "onset");
    }
    if let Some(beats) = track_beats_bandpass(pcm) {
        return (beats, "bandpass-envelope");
    }
    (track_beats_energy(pcm), "energy-peak")
}

const ONSET_WINDOW: usize = 512;
const ONSET_HOP: usize = ONSET_WINDOW / 2;

fn track_beats_onset(pcm: &Pcm) -> Option<Vec<i64>> {
    let mut tempo = Tempo::new(OnsetMode::SpecFlux, ONSET_WINDOW, ONSET_HOP, pcm.sample_rate).ok()?;
    let mut beats = Vec::new();
    for (hop_index, chunk) in pcm.samples.chunks(ONSET_HOP).enumerate() {
        if chunk.len() < ONSET_HOP {
            break;
        }
        if let Ok(is_beat) = tempo.do_result(chunk) {
            if is_beat > 0.0 {
                let sample_pos = (hop_index * ONSET_HOP) as f64;
                beats.push((sample_pos / pcm.sample_rate as f64 * 1000.0).round() as i64);
            }
        }
    }
    if beats.len() < 2 {
        None
    } else {
        Some(beats)
    }
}

const BANDPASS_THRESHOLDS: [f32; 10] = [0.95, 0.90, 0.85, 0.80, 0.75, 0.70, 0.65, 0.60, 0.55, 0.50];

fn track_beats_bandpass(pcm: &Pcm) -> Option<Vec<i64>> {
    let lowpassed = one_pole_lowpass(&pcm.samples, pcm.sample_rate, 200.0);
    let envelope: Vec<f32> = lowpassed.iter().map(|s| s.abs()).collect();
    // don't allow two peaks closer than the fastest plausible beat (220 BPM)
    let min_distance = ((pcm.sample_rate as f64 * 60.0 / 220.0) as usize).max(1);

    let mut best_peaks: Option<Vec<usize>> = None;
    let mut candidates: Vec<(f64, u32)> = Vec::new();

    for &threshold in &BANDPASS_THRESHOLDS {
        let peaks = pick_peaks(&envelope, threshold, min_distance);
        if peaks.len() < 15 {
            continue;
        }
        let intervals: Vec<i64> = peaks.windows(2).map(|w| (w[1] - w[0]) as i64).collect();
        if let Some(bpm) = fold_intervals_to_dominant_tempo(&intervals, pcm.sample_rate) {
            candidates.push((bpm, peaks.len() as u32));
            if best_peaks.as_ref().map_or(true, |p| peaks.len() > p.len()) {
                best_peaks = Some(peaks);
            }
        }
    }

    let peaks = best_peaks?;
    let bpm = disambiguate_tempo(&candidates)?;
    let start_ms = (peaks[0] as f64 / pcm.sample_rate as f64 * 1000.0).round() as i64;
    Some(synthesize_beat_grid(start_ms, bpm, pcm.duration_ms()))
}

fn track_beats_energy(pcm: &Pcm) -> Vec<i64> {
    let window = ((pcm.sample_rate as f64 * 0.05) as usize).max(1);
    let energies: Vec<f32> = pcm
        .samples
        .chunks(window)
        .map(|chunk| chunk.iter().map(|s| s * s).sum())
        .collect();
    if energies.is_empty() {
        return synthesize_beat_grid(0, 120.0, pcm.duration_ms());
    }
    let mean = energies.iter().sum::<f32>() / energies.len() as f32;
    let threshold = mean * 1.5;

    let mut peaks = Vec::new();
    for i in 1..energies.len().saturating_sub(1) {
        if energies[i] > threshold && energies[i] >= energies[i - 1] && energies[i] >= energies[i + 1] {
            peaks.push(i);
        }
    }
    if peaks.len() < 2 {
        return synthesize_beat_grid(0, 120.0, pcm.duration_ms());
    }

    let times_ms: Vec<i64> = peaks
        .iter()
        .map(|&i| ((i * window) as f64 / pcm.sample_rate as f64 * 1000.0).round() as i64)
        .collect();
    let gaps: Vec<i64> = times_ms.windows(2).map(|w| w[1] - w[0]).collect();
    let median_gap = median_i64(&gaps).max(1);
    let bpm = (60_000.0 / median_gap as f64).clamp(40.0, 220.0);
    synthesize_beat_grid(times_ms[0], bpm, pcm.duration_ms())
}

pub(crate) fn one_pole_lowpass(samples: &[f32], sample_rate: u32, cutoff_hz: f32) -> Vec<f32> {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f32;
    let alpha = dt / (rc + dt);
    let mut out = Vec::with_capacity(samples.len());
    let mut prev = 0.0f32;
    for &s in samples {
        prev += alpha * (s - prev);
        out.push(prev);
    }
    out
}

fn pick_peaks(envelope: &[f32], threshold_fraction: f32, min_distance: usize) -> Vec<usize> {
    let peak_max = envelope.iter().cloned().fold(0.0f32, f32::max);
    let cutoff = peak_max * threshold_fraction;
    let mut peaks = Vec::new();
    let mut last_peak: Option<usize> = None;
    for i in 1..envelope.len().saturating_sub(1) {
        if envelope[i] > cutoff && envelope[i] >= envelope[i - 1] && envelope[i] >= envelope[i + 1] {
            if last_peak.is_none_or(|lp| i - lp >= min_distance) {
                peaks.push(i);
                last_peak = Some(i);
            }
        }
    }
    peaks
}

/// Fold inter-peak intervals into the 90-180 BPM band by doubling/halving,
/// then return the modal (most frequent) folded tempo.
fn fold_intervals_to_dominant_tempo(intervals: &[i64], sample_rate: u32) -> Option<f64> {
    let mut folded_counts: HashMap<i64, u32> = HashMap::new();
    for &interval in intervals {
        if interval <= 0 {
            continue;
        }
        let mut bpm = 60.0 * sample_rate as f64 / interval as f64;
        while bpm < 90.0 {
            bpm *= 2.0;
        }
        while bpm > 180.0 {
            bpm /= 2.0;
        }
        *folded_counts.entry(bpm.round() as i64).or_insert(0) += 1;
    }
    folded_counts.into_iter().max_by_key(|(_, count)| *count).map(|(bpm, _)| bpm as f64)
}

/// If the top two tempo candidates are related 2:1, 3:2, or 4:3 within 10%,
/// prefer whichever falls in [80, 140]; prefer the lower if both do.
fn disambiguate_tempo(candidates: &[(f64, u32)]) -> Option<f64> {
    if candidates.is_empty() {
        return None;
    }
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    let top = sorted[0].0;
    if let Some(&(second, _)) = sorted.get(1) {
        let (hi, lo) = if top > second { (top, second) } else { (second, top) };
        let ratio = hi / lo;
        let related = [2.0, 1.5, 4.0 / 3.0]
            .iter()
            .any(|r| ((ratio - r) / r).abs() < 0.10);
        if related {
            let top_in_range = (80.0..=140.0).contains(&top);
            let second_in_range = (80.0..=140.0).contains(&second);
            return Some(match (top_in_range, second_in_range) {
                (true, true) => top.min(second),
                (true, false) => top,
                (false, true) => second,
                (false, false) => top,
            });
        }
    }
    Some(top)
}

fn synthesize_beat_grid(anchor_ms: i64, bpm: f64, duration_ms: i64) -> Vec<i64> {
    let gap = 60_000.0 / bpm;
    let mut t = anchor_ms as f64;
    while t - gap >= -1e-6 {
        t -= gap;
    }
    if t < 0.0 {
        t = 0.0;
    }
    let mut beats = Vec::new();
    while t.round() as i64 <= duration_ms {
        beats.push(t.round() as i64);
        t += gap;
    }
    beats
}

fn bpm_from_beats(beats_ms: &[i64]) -> f64 {
    if beats_ms.len() < 2 {
        return 120.0;
    }
    let gaps: Vec<f64> = beats_ms.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    let median = arr1(&gaps)
        .mapv(n64)
        .quantile_mut(n64(0.5), &Midpoint)
        .map(f64::from)
        .unwrap_or(500.0);
    if median <= 0.0 {
        120.0
    } else {
        60_000.0 / median
    }
}

fn median_i64(values: &[i64]) -> i64 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted[sorted.len() / 2]
}

fn beat_energies(pcm: &Pcm, beats_ms: &[i64]) -> Vec<f64> {
    beats_ms
        .iter()
        .enumerate()
        .map(|(i, &beat_ms)| {
            let start = ms_to_sample(beat_ms, pcm.sample_rate);
            let end = beats_ms
                .get(i + 1)
                .map(|&b| ms_to_sample(b, pcm.sample_rate))
                .unwrap_or(pcm.samples.len())
                .min(pcm.samples.len());
            if start >= end {
                return 0.0;
            }
            let slice = &pcm.samples[start..end];
            slice.iter().map(|s| (*s as f64) * (*s as f64)).sum::<f64>() / slice.len() as f64
        })
        .collect()
}

fn ms_to_sample(ms: i64, sample_rate: u32) -> usize {
    ((ms as f64 / 1000.0) * sample_rate as f64).round().max(0.0) as usize
}

fn infer_meter(energies: &[f64]) -> (u8, usize) {
    if energies.is_empty() {
        return (4, 0);
    }
    let overall_mean = mean(energies);
    let overall_std = std_dev(energies, overall_mean).max(1e-9);
    let weight = |n: u8| match n {
        4 => 3.0,
        3 => 2.0,
        6 => 1.5,
        _ => 1.0,
    };

    // Iterate candidates from most- to least-preferred so that an all-zero
    // (or otherwise tied) z-score leaves the higher-preference meter in
    // place: `best` only changes on a strict improvement, and the
    // highest-preference numerator is considered first.
    let mut preference_order = ALLOWED_NUMERATORS;
    preference_order.sort_by(|a, b| weight(*b).partial_cmp(&weight(*a)).unwrap());

    let mut best = (4u8, 0usize, f64::MIN);
    for &numerator in &preference_order {
        let period = numerator as usize;
        if energies.len() < period {
            continue;
        }
        for offset in 0..period {
            let group: Vec<f64> = energies
                .iter()
                .enumerate()
                .filter(|(i, _)| i % period == offset)
                .map(|(_, &e)| e)
                .collect();
            if group.is_empty() {
                continue;
            }
            let group_mean = mean(&group);
            let z = (group_mean - overall_mean) / overall_std;
            let score = z * weight(numerator);
            if score > best.2 {
                best = (numerator, offset, score);
            }
        }
    }
    (best.0, best.1)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64], mean_value: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f64, duration_ms: i64, sample_rate: u32) -> Pcm {
        let gap_samples = (60.0 / bpm * sample_rate as f64) as usize;
        let total_samples = (duration_ms as f64 / 1000.0 * sample_rate as f64) as usize;
        let mut samples = vec![0.0f32; total_samples];
        let mut i = 0;
        while i < samples.len() {
            samples[i] = 1.0;
            i += gap_samples;
        }
        Pcm { samples, sample_rate }
    }

    #[test]
    fn synthesizes_beat_grid_from_anchor() {
        let beats = synthesize_beat_grid(500, 120.0, 2000);
        assert_eq!(beats[0], 0);
        assert_eq!(beats[1], 500);
        assert_eq!(beats.last(), Some(&2000));
    }

    #[test]
    fn energy_fallback_degrades_gracefully_on_silence() {
        let pcm = Pcm { samples: vec![0.0; 44_100], sample_rate: 44_100 };
        let beats = track_beats_energy(&pcm);
        assert!(beats.len() >= 2);
    }

    #[test]
    fn tempo_disambiguation_prefers_in_range_candidate() {
        // 240 and 120 are related 2:1; 120 is in [80,140], 240 is not.
        let candidates = vec![(240.0, 50), (120.0, 40)];
        assert_eq!(disambiguate_tempo(&candidates), Some(120.0));
    }

    #[test]
    fn meter_infers_four_four_on_strong_downbeat_pattern() {
        // energies with every 4th beat much louder -> should infer numerator 4
        let mut energies = vec![0.1; 32];
        for i in (0..32).step_by(4) {
            energies[i] = 1.0;
        }
        let (numerator, offset) = infer_meter(&energies);
        assert_eq!(numerator, 4);
        assert_eq!(offset, 0);
    }

    #[test]
    fn meter_prefers_four_four_on_flat_energy_tie() {
        // Uniform beat energy (silence, a click track, or a constant-level
        // instrumental) ties every numerator's z-score at zero; the
        // preference order 4 > 3 > 6 > ... must break the tie.
        let energies = vec![1.0; 32];
        let (numerator, _offset) = infer_meter(&energies);
        assert_eq!(numerator, 4);
    }

    #[test]
    fn rhythm_analysis_on_120_bpm_click_track_is_plausible() {
        let pcm = click_track(120.0, 8_000, 44_100);
        let result = analyze(&pcm).unwrap();
        assert!((result.bpm - 120.0).abs() < 5.0);
        assert!(result.beats_ms.len() >= 2);
        assert!(result.beats_ms.windows(2).all(|w| w[1] > w[0]));
    }
}
