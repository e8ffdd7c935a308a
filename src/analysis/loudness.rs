//! Loudness, energy, danceability and mood.
//!
//! `loudness_integrated_dbfs`/`loudness_range_lu` follow an EBU R128-style
//! gated-block measurement (400ms blocks, -70 LUFS absolute gate then a
//! relative gate 10 LU below the ungated mean) rather than pulling in a full
//! ITU-R BS.1770 K-weighting filter bank — close enough for the relative
//! comparisons this engine needs between tracks in the same library.

use crate::decoder::{rms, Pcm};
use crate::types::Mood;

#[derive(Debug, Clone, Copy)]
pub struct LoudnessDescriptor {
    pub energy: f64,
    pub danceability: f64,
    pub mood: Mood,
    pub loudness_integrated_dbfs: f64,
    pub loudness_range_lu: f64,
    pub dynamic_complexity: f64,
}

const BLOCK_MS: i64 = 400;
const ABSOLUTE_GATE_DBFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = 10.0;

pub fn analyze(pcm: &Pcm, bpm: f64) -> LoudnessDescriptor {
    let block_samples = ((BLOCK_MS as f64 / 1000.0) * pcm.sample_rate as f64) as usize;
    let block_dbfs: Vec<f64> = pcm
        .samples
        .chunks(block_samples.max(1))
        .map(|block| dbfs(rms(block) as f64))
        .collect();

    let loudness_integrated_dbfs = gated_mean(&block_dbfs);
    let loudness_range_lu = loudness_range(&block_dbfs, loudness_integrated_dbfs);
    let dynamic_complexity = mean(
        &block_dbfs
            .iter()
            .map(|&d| (d - loudness_integrated_dbfs).abs())
            .collect::<Vec<_>>(),
    );

    let overall_rms = rms(&pcm.samples) as f64;
    let energy = (1.0 - (-4.0 * overall_rms).exp()).min(1.0);
    let danceability = compute_danceability(bpm, energy);
    let mood = classify_mood(energy, bpm, loudness_range_lu);

    LoudnessDescriptor {
        energy,
        danceability,
        mood,
        loudness_integrated_dbfs,
        loudness_range_lu,
        dynamic_complexity,
    }
}

fn dbfs(rms_value: f64) -> f64 {
    if rms_value <= 0.0 {
        ABSOLUTE_GATE_DBFS
    } else {
        20.0 * rms_value.log10()
    }
}

fn gated_mean(block_dbfs: &[f64]) -> f64 {
    let absolute_gated: Vec<f64> = block_dbfs.iter().copied().filter(|&d| d > ABSOLUTE_GATE_DBFS).collect();
    if absolute_gated.is_empty() {
        return ABSOLUTE_GATE_DBFS;
    }
    let ungated_mean = mean(&absolute_gated);
    let relative_gated: Vec<f64> = absolute_gated
        .iter()
        .copied()
        .filter(|&d| d > ungated_mean - RELATIVE_GATE_LU)
        .collect();
    if relative_gated.is_empty() {
        ungated_mean
    } else {
        mean(&relative_gated)
    }
}

fn loudness_range(block_dbfs: &[f64], integrated: f64) -> f64 {
    let mut gated: Vec<f64> = block_dbfs
        .iter()
        .copied()
        .filter(|&d| d > integrated - RELATIVE_GATE_LU)
        .collect();
    if gated.len() < 2 {
        return 0.0;
    }
    gated.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let low = percentile(&gated, 0.10);
    let high = percentile(&gated, 0.95);
    (high - low).max(0.0)
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx]
}

/// BPM distance from 125 (60%) plus raw energy (40%), per the resolved formula.
fn compute_danceability(bpm: f64, energy: f64) -> f64 {
    let bpm_component = (1.0 - ((bpm - 125.0).abs() / 125.0)).clamp(0.0, 1.0);
    (bpm_component * 0.6 + energy * 0.4).clamp(0.0, 1.0)
}

fn classify_mood(energy: f64, bpm: f64, loudness_range_lu: f64) -> Mood {
    if energy > 0.75 && bpm >= 125.0 {
        Mood::Euphoric
    } else if energy > 0.6 && loudness_range_lu < 6.0 {
        Mood::Driving
    } else if energy > 0.55 && bpm < 110.0 {
        Mood::Dark
    } else if energy < 0.25 {
        Mood::Chill
    } else if energy < 0.4 && bpm < 100.0 {
        Mood::Melancholic
    } else {
        Mood::Neutral
    }
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

    fn tone(amplitude: f32, duration_ms: i64, sample_rate: u32) -> Pcm {
        let n = (sample_rate as i64 * duration_ms / 1000) as usize;
        Pcm { samples: vec![amplitude; n], sample_rate }
    }

    #[test]
    fn silence_has_zero_energy() {
        let pcm = tone(0.0, 1000, 44_100);
        let d = analyze(&pcm, 120.0);
        assert_eq!(d.energy, 0.0);
    }

    #[test]
    fn loud_signal_has_high_energy() {
        let pcm = tone(0.9, 1000, 44_100);
        let d = analyze(&pcm, 120.0);
        assert!(d.energy > 0.9);
    }

    #[test]
    fn danceability_peaks_near_125_bpm() {
        let on_target = compute_danceability(125.0, 0.5);
        let off_target = compute_danceability(70.0, 0.5);
        assert!(on_target > off_target);
    }

    #[test]
    fn quiet_signal_classified_chill() {
        let pcm = tone(0.001, 1000, 44_100);
        let d = analyze(&pcm, 90.0);
        assert_eq!(d.mood, Mood::Chill);
    }

    #[test]
    fn loudness_integrated_is_never_above_zero_dbfs() {
        let pcm = tone(1.0, 1000, 44_100);
        let d = analyze(&pcm, 120.0);
        assert!(d.loudness_integrated_dbfs <= 0.1);
    }
}
