//! Structural segmenter and timeline reconciliation.
//!
//! The segmenter itself only ever sees energy, so in core-only mode (no
//! labeler) every non-silent run is provisionally `Instrumental` with
//! `has_vocals = false`; reconciliation against labeler-reported
//! vocal-activity evidence is what upgrades segments and flags vocals when
//! the labeler is in play.

use crate::analysis::rhythm::one_pole_lowpass;
use crate::types::{Segment, SegmentKind};

const FRAME_MS: i64 = 2_000;
const SILENCE_RMS: f32 = 0.01;
const INTENSE_RMS: f32 = 0.1;
const DOWNGRADE_TOLERANCE_MS: i64 = 1_000;
const MIN_VOCAL_BLOCK_MS: i64 = 1_500;
const SNAP_TOLERANCE_BEATS: f64 = 2.0;

/// Vocal formant band used by [`estimate_vocal_evidence`].
const VOCAL_BAND_LOW_HZ: f32 = 300.0;
const VOCAL_BAND_HIGH_HZ: f32 = 3_400.0;
const VOCAL_ENERGY_RATIO_THRESHOLD: f32 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameClass {
    Silence,
    Normal,
    Intense,
}

fn classify(rms: f32) -> FrameClass {
    if rms < SILENCE_RMS {
        FrameClass::Silence
    } else if rms > INTENSE_RMS {
        FrameClass::Intense
    } else {
        FrameClass::Normal
    }
}

/// Partition a track into `[0, duration_ms)` segments from its 2-second RMS profile.
pub fn segment(samples: &[f32], sample_rate: u32, duration_ms: i64) -> Vec<Segment> {
    let frame_samples = ((FRAME_MS as f64 / 1000.0) * sample_rate as f64) as usize;
    let classes: Vec<FrameClass> = samples
        .chunks(frame_samples.max(1))
        .enumerate()
        .map(|(i, chunk)| {
            let sum_sq: f64 = chunk.iter().map(|s| (*s as f64) * (*s as f64)).sum();
            let rms = (sum_sq / chunk.len().max(1) as f64).sqrt() as f32;
            let _ = i;
            classify(rms)
        })
        .collect();

    let runs = group_runs(&classes, duration_ms);
    to_segments(runs)
}

/// Crude, analyzer-only estimate of where lead vocals are plausibly present:
/// the fraction of a frame's energy sitting in the vocal formant band
/// (300-3400 Hz, per a band-pass built from two `one_pole_lowpass` stages,
/// the same filter primitive the rhythm analyzer's band-passed envelope path
/// uses). This is the ground-truth evidence that reconciliation checks the
/// labeler's higher-level, less reliable segment labels against — it is
/// never shown to the user directly.
pub fn estimate_vocal_evidence(samples: &[f32], sample_rate: u32, duration_ms: i64) -> Vec<(i64, i64)> {
    if samples.is_empty() {
        return Vec::new();
    }
    let low = one_pole_lowpass(samples, sample_rate, VOCAL_BAND_LOW_HZ);
    let band = one_pole_lowpass(samples, sample_rate, VOCAL_BAND_HIGH_HZ);
    let band_passed: Vec<f32> = band.iter().zip(low.iter()).map(|(b, l)| b - l).collect();

    let frame_samples = ((FRAME_MS as f64 / 1000.0) * sample_rate as f64) as usize;
    let total_energy: Vec<f32> = samples.chunks(frame_samples.max(1)).map(energy).collect();
    let band_energy: Vec<f32> = band_passed.chunks(frame_samples.max(1)).map(energy).collect();

    let is_vocal: Vec<bool> = total_energy
        .iter()
        .zip(band_energy.iter())
        .map(|(&total, &band)| total > 0.0 && band / total > VOCAL_ENERGY_RATIO_THRESHOLD)
        .collect();

    let mut blocks = Vec::new();
    let mut idx = 0;
    while idx < is_vocal.len() {
        if !is_vocal[idx] {
            idx += 1;
            continue;
        }
        let start = idx;
        while idx < is_vocal.len() && is_vocal[idx] {
            idx += 1;
        }
        let start_ms = start as i64 * FRAME_MS;
        let end_ms = (idx as i64 * FRAME_MS).min(duration_ms);
        blocks.push((start_ms, end_ms));
    }
    blocks
}

fn energy(chunk: &[f32]) -> f32 {
    chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len().max(1) as f32
}

fn group_runs(classes: &[FrameClass], duration_ms: i64) -> Vec<(FrameClass, i64, i64)> {
    let mut runs = Vec::new();
    let mut idx = 0;
    while idx < classes.len() {
        let class = classes[idx];
        let start = idx;
        while idx < classes.len() && classes[idx] == class {
            idx += 1;
        }
        let start_ms = start as i64 * FRAME_MS;
        let end_ms = if idx >= classes.len() { duration_ms } else { idx as i64 * FRAME_MS };
        runs.push((class, start_ms, end_ms.min(duration_ms)));
    }
    if runs.is_empty() {
        runs.push((FrameClass::Silence, 0, duration_ms));
    }
    runs
}

fn to_segments(runs: Vec<(FrameClass, i64, i64)>) -> Vec<Segment> {
    let leading_end = runs.iter().take_while(|(c, _, _)| *c != FrameClass::Intense).count();
    let trailing_start = {
        let mut count = 0;
        for (class, _, _) in runs.iter().rev() {
            if *class == FrameClass::Intense {
                break;
            }
            count += 1;
        }
        runs.len().saturating_sub(count).max(leading_end)
    };

    runs.into_iter()
        .enumerate()
        .map(|(i, (class, start_ms, end_ms))| {
            let kind = if i < leading_end {
                SegmentKind::Intro
            } else if i >= trailing_start {
                SegmentKind::Outro
            } else {
                match class {
                    FrameClass::Silence => SegmentKind::Silence,
                    FrameClass::Normal | FrameClass::Intense => SegmentKind::Instrumental,
                }
            };
            Segment { kind, start_ms, end_ms, has_vocals: false }
        })
        .collect()
}

/// Reconcile the segmenter's output with labeler vocal-activity evidence.
/// `vocal_activity` is a list of `(start_ms, end_ms)` intervals
/// where the labeler or analyzer found active vocals.
pub fn reconcile(
    mut timeline: Vec<Segment>,
    duration_ms: i64,
    vocal_activity: &[(i64, i64)],
    bpm: f64,
) -> Vec<Segment> {
    timeline = fill_gaps(timeline, duration_ms);
    mark_vocal_segments(&mut timeline, vocal_activity);
    downgrade_unsupported_vocal_segments(&mut timeline, vocal_activity);
    snap_to_downbeats(&mut timeline, bpm, duration_ms);
    timeline
}

/// Flag segments overlapping any reconciled vocal-activity interval. Applied
/// before the verse/chorus downgrade so a segment's `has_vocals` reflects
/// evidence at the same moment its kind is being judged against it.
fn mark_vocal_segments(timeline: &mut [Segment], vocal_activity: &[(i64, i64)]) {
    for seg in timeline.iter_mut() {
        seg.has_vocals = vocal_activity.iter().any(|&(vs, ve)| vs < seg.end_ms && ve > seg.start_ms);
    }
}

fn fill_gaps(timeline: Vec<Segment>, duration_ms: i64) -> Vec<Segment> {
    if timeline.is_empty() {
        return vec![Segment { kind: SegmentKind::Instrumental, start_ms: 0, end_ms: duration_ms, has_vocals: false }];
    }
    let mut filled = Vec::with_capacity(timeline.len());
    let mut cursor = 0i64;
    for seg in timeline {
        if seg.start_ms > cursor {
            filled.push(Segment { kind: SegmentKind::Instrumental, start_ms: cursor, end_ms: seg.start_ms, has_vocals: false });
        }
        cursor = seg.end_ms;
        filled.push(seg);
    }
    if let Some(last) = filled.last_mut() {
        last.end_ms = duration_ms;
    }
    if cursor < duration_ms {
        filled.push(Segment { kind: SegmentKind::Instrumental, start_ms: cursor, end_ms: duration_ms, has_vocals: false });
    }
    filled
}

fn downgrade_unsupported_vocal_segments(timeline: &mut [Segment], vocal_activity: &[(i64, i64)]) {
    for seg in timeline.iter_mut() {
        if !matches!(seg.kind, SegmentKind::Verse | SegmentKind::Chorus) {
            continue;
        }
        let overlaps = vocal_activity.iter().any(|&(vs, ve)| {
            vs <= seg.end_ms + DOWNGRADE_TOLERANCE_MS && ve >= seg.start_ms - DOWNGRADE_TOLERANCE_MS
        });
        if !overlaps {
            seg.kind = SegmentKind::Bridge;
        }
    }
}

fn snap_to_downbeats(timeline: &mut [Segment], bpm: f64, duration_ms: i64) {
    if bpm <= 0.0 || timeline.len() < 2 {
        return;
    }
    let beat_ms = 60_000.0 / bpm;
    let tolerance_ms = beat_ms * SNAP_TOLERANCE_BEATS;

    let boundaries: Vec<i64> = timeline.iter().skip(1).map(|s| s.start_ms).collect();
    let snapped: Vec<i64> = boundaries
        .iter()
        .map(|&b| snap_point(b, beat_ms, tolerance_ms, duration_ms))
        .collect();

    for (i, &snapped_boundary) in snapped.iter().enumerate() {
        timeline[i].end_ms = snapped_boundary;
        timeline[i + 1].start_ms = snapped_boundary;
    }
}

fn snap_point(ms: i64, beat_ms: f64, tolerance_ms: f64, duration_ms: i64) -> i64 {
    let nearest_beat_index = (ms as f64 / beat_ms).round();
    let snapped = nearest_beat_index * beat_ms;
    let candidate = if (snapped - ms as f64).abs() <= tolerance_ms {
        snapped.round() as i64
    } else {
        ms
    };
    candidate.clamp(0, duration_ms)
}

/// Discard labeler vocal blocks that are too short or unsupported by analyzer
/// evidence.
pub fn filter_vocal_blocks(blocks: &[(i64, i64)], evidence: &[(i64, i64)]) -> Vec<(i64, i64)> {
    blocks
        .iter()
        .copied()
        .filter(|&(start, end)| {
            end - start >= MIN_VOCAL_BLOCK_MS
                && evidence.iter().any(|&(es, ee)| es < end && ee > start)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_has_no_vocal_evidence() {
        let samples = vec![0.0f32; 44_100 * 4];
        assert!(estimate_vocal_evidence(&samples, 44_100, 4_000).is_empty());
    }

    #[test]
    fn silent_track_is_one_silence_run() {
        let samples = vec![0.0f32; 44_100 * 4];
        let segments = segment(&samples, 44_100, 4_000);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn reconcile_fills_gaps_to_cover_full_duration() {
        let timeline = vec![Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 1_000, has_vocals: false }];
        let reconciled = reconcile(timeline, 5_000, &[], 120.0);
        assert_eq!(reconciled.first().unwrap().start_ms, 0);
        assert_eq!(reconciled.last().unwrap().end_ms, 5_000);
        for pair in reconciled.windows(2) {
            assert_eq!(pair[0].end_ms, pair[1].start_ms);
        }
    }

    #[test]
    fn verse_without_vocal_evidence_downgrades_to_bridge() {
        let timeline = vec![
            Segment { kind: SegmentKind::Verse, start_ms: 0, end_ms: 10_000, has_vocals: true },
            Segment { kind: SegmentKind::Instrumental, start_ms: 10_000, end_ms: 20_000, has_vocals: false },
        ];
        let reconciled = reconcile(timeline, 20_000, &[], 120.0);
        assert_eq!(reconciled[0].kind, SegmentKind::Bridge);
    }

    #[test]
    fn verse_with_vocal_evidence_stays_verse() {
        let timeline = vec![Segment { kind: SegmentKind::Verse, start_ms: 0, end_ms: 10_000, has_vocals: true }];
        let reconciled = reconcile(timeline, 10_000, &[(0, 9_000)], 120.0);
        assert_eq!(reconciled[0].kind, SegmentKind::Verse);
    }

    #[test]
    fn hallucinated_short_vocal_block_is_dropped() {
        let blocks = [(1_000, 1_800)];
        let evidence = [(1_000, 1_800)];
        assert!(filter_vocal_blocks(&blocks, &evidence).is_empty());
    }

    #[test]
    fn unsupported_vocal_block_is_dropped() {
        let blocks = [(1_000, 5_000)];
        assert!(filter_vocal_blocks(&blocks, &[]).is_empty());
    }

    #[test]
    fn supported_vocal_block_survives() {
        let blocks = [(1_000, 5_000)];
        let evidence = [(2_000, 3_000)];
        assert_eq!(filter_vocal_blocks(&blocks, &evidence), vec![(1_000, 5_000)]);
    }
}
