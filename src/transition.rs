//! Transition scorer: score a candidate `(exit cue of A, entry
//! cue of B)` pairing, pick the best of up to 25 such pairings, and derive
//! a transition type and suggested crossfade curve.
//!
//! The weighted-combination shape of the final score — independent
//! sub-scores blended with fixed weights and clipped to a bounded range —
//! mirrors the same extract-weight-clamp idiom `cues.rs` uses for cue
//! scoring; the all-pairs-then-pick-best search is a straightforward
//! pairwise-comparison pattern.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::cues::vocal_type_for;
use crate::types::{Curve, CuePoint, Strategy, TrackDescriptor, Transition, TransitionType, VocalType, TrackHash};

const BPM_VETO_FRACTION: f64 = 0.10;
const MAX_SIM_BLOCKS: i64 = 4;
const BARS_PER_BLOCK: i64 = 4;

pub fn score(exit: &CuePoint, entry: &CuePoint, track_a: &TrackDescriptor, track_b: &TrackDescriptor) -> Transition {
    if exit.vocal_type == VocalType::MelodicVocal && entry.vocal_type == VocalType::MelodicVocal {
        return build(exit, entry, 0.0);
    }
    if (track_a.bpm - track_b.bpm).abs() / track_a.bpm > BPM_VETO_FRACTION {
        return build(exit, entry, 0.0);
    }

    let harmonic = harmonic_score(track_a, track_b);
    let bpm = bpm_score(track_a.bpm, track_b.bpm);
    let energy = energy_score(track_a.energy, track_b.energy);
    let strategy = strategy_score(exit.strategy, entry.strategy);
    let overlap_adj = overlap_adjustment(exit.safe_duration_ms, entry.safe_duration_ms);

    let sim_adj = match timeline_simulation(exit, entry, track_a, track_b) {
        None => return build(exit, entry, 0.0),
        Some(v) => v,
    };

    let strategy_blend = (strategy + overlap_adj + sim_adj).clamp(0.0, 100.0);
    let final_score = (0.35 * harmonic + 0.25 * bpm + 0.15 * energy + 0.25 * strategy_blend).clamp(0.0, 100.0);
    build(exit, entry, final_score)
}

fn harmonic_score(track_a: &TrackDescriptor, track_b: &TrackDescriptor) -> f64 {
    if track_a.key.is_none() || track_b.key.is_none() {
        return 50.0;
    }
    if track_a.camelot_compatible.contains(&track_b.camelot) {
        100.0
    } else if track_a.camelot.letter == track_b.camelot.letter {
        70.0
    } else {
        10.0
    }
}

fn bpm_score(bpm_a: f64, bpm_b: f64) -> f64 {
    (100.0 * (1.0 - (bpm_a - bpm_b).abs() / (BPM_VETO_FRACTION * bpm_a))).max(0.0)
}

fn energy_score(energy_a: f64, energy_b: f64) -> f64 {
    let diff = (energy_a - energy_b).abs();
    if diff < 0.10 {
        100.0
    } else if diff < 0.25 {
        80.0
    } else if energy_b - energy_a > 0.25 {
        65.0
    } else if energy_a - energy_b > 0.25 {
        40.0
    } else {
        50.0
    }
}

fn strategy_score(exit_strategy: Strategy, entry_strategy: Strategy) -> f64 {
    use Strategy::*;
    match (exit_strategy, entry_strategy) {
        (LoopAnchor, DropSwap) => 100.0,
        (LoopAnchor, IntroSimple) => 95.0,
        (DropSwap, DropSwap) => 100.0,
        (OutroFade, IntroSimple) => 90.0,
        (DropSwap, BreakdownEntry) => 80.0,
        (BreakdownEntry, IntroSimple) => 75.0,
        (OutroFade, DropSwap) => 30.0,
        (DropSwap, IntroSimple) => 40.0,
        _ => 50.0,
    }
}

fn overlap_ms(exit: &CuePoint, entry: &CuePoint) -> i64 {
    exit.safe_duration_ms.unwrap_or(i64::MAX).min(entry.safe_duration_ms.unwrap_or(i64::MAX))
}

fn overlap_adjustment(exit_safe_ms: Option<i64>, entry_safe_ms: Option<i64>) -> f64 {
    let overlap = exit_safe_ms.unwrap_or(i64::MAX).min(entry_safe_ms.unwrap_or(i64::MAX));
    if overlap > 16_000 {
        10.0
    } else if overlap < 4_000 {
        -20.0
    } else {
        0.0
    }
}

/// Simulates up to 4 blocks of 4 bars, advancing both cues in lockstep.
/// Returns `None` to signal an abort (a MELODIC x MELODIC clash), otherwise
/// the net deduction/bonus to fold into the strategy blend.
fn timeline_simulation(exit: &CuePoint, entry: &CuePoint, track_a: &TrackDescriptor, track_b: &TrackDescriptor) -> Option<f64> {
    let bar_a_ms = track_a.bar_ms();
    let bar_b_ms = track_b.bar_ms();
    let frozen = exit.strategy == Strategy::LoopAnchor;

    let mut adjustment = 0.0;
    let mut prev_a_vocal = VocalType::None;
    let mut prev_b_vocal = VocalType::None;

    for step in 0..(MAX_SIM_BLOCKS * BARS_PER_BLOCK) {
        let position_a = if frozen { exit.point_ms } else { exit.point_ms + (step as f64 * bar_a_ms).round() as i64 };
        let position_b = entry.point_ms + (step as f64 * bar_b_ms).round() as i64;

        let a_vocal = vocal_type_at(track_a, position_a);
        let b_vocal = vocal_type_at(track_b, position_b);

        if a_vocal == VocalType::MelodicVocal && b_vocal == VocalType::MelodicVocal {
            return None;
        }
        let is_clash = (a_vocal == VocalType::MelodicVocal && b_vocal == VocalType::RhythmicChant)
            || (a_vocal == VocalType::RhythmicChant && b_vocal == VocalType::MelodicVocal);
        if is_clash {
            adjustment -= 25.0;
        }

        let call_and_response = prev_a_vocal != VocalType::None
            && a_vocal == VocalType::None
            && prev_b_vocal == VocalType::None
            && b_vocal != VocalType::None;
        if call_and_response {
            adjustment += 25.0;
        }

        prev_a_vocal = a_vocal;
        prev_b_vocal = b_vocal;
    }

    Some(adjustment)
}

fn vocal_type_at(descriptor: &TrackDescriptor, point_ms: i64) -> VocalType {
    descriptor
        .segment_at(point_ms.clamp(0, descriptor.duration_ms))
        .filter(|s| s.has_vocals)
        .map(|s| vocal_type_for(s.kind))
        .unwrap_or(VocalType::None)
}

fn derive_type(exit_strategy: Strategy, entry_strategy: Strategy) -> TransitionType {
    if exit_strategy == Strategy::DropSwap && entry_strategy == Strategy::DropSwap {
        TransitionType::DoubleDrop
    } else if exit_strategy == Strategy::LoopAnchor {
        TransitionType::LoopMix
    } else if matches!(exit_strategy, Strategy::OutroFade | Strategy::IntroSimple)
        || matches!(entry_strategy, Strategy::OutroFade | Strategy::IntroSimple)
    {
        TransitionType::LongMix
    } else if exit_strategy == Strategy::ImpactEntry || entry_strategy == Strategy::ImpactEntry {
        TransitionType::Cut
    } else {
        TransitionType::QuickMix
    }
}

fn derive_curve(exit: &CuePoint, entry: &CuePoint, transition_type: TransitionType) -> Curve {
    if transition_type == TransitionType::DoubleDrop {
        Curve::BassSwap
    } else if entry.strategy == Strategy::ImpactEntry {
        Curve::Cut
    } else if exit.strategy == Strategy::OutroFade && entry.strategy == Strategy::IntroSimple {
        Curve::Linear
    } else {
        entry.suggested_curve
    }
}

fn build(exit: &CuePoint, entry: &CuePoint, raw_score: f64) -> Transition {
    let transition_type = derive_type(exit.strategy, entry.strategy);
    let suggested_curve = derive_curve(exit, entry, transition_type);
    Transition {
        exit_cue: exit.clone(),
        entry_cue: entry.clone(),
        score: raw_score.clamp(0.0, 100.0).round() as u8,
        transition_type,
        suggested_curve,
    }
}

/// Considers all pairings of up to five exits by five entries and returns
/// the highest-scoring one; ties broken by larger overlap window, then by
/// earlier `exit.point_ms`. If every pairing scores 0, falls back to an
/// "emergency CUT" built from the two highest-scored individual cues.
pub fn best_pairing(exits: &[CuePoint], entries: &[CuePoint], track_a: &TrackDescriptor, track_b: &TrackDescriptor) -> Transition {
    let mut best: Option<Transition> = None;
    for exit in exits {
        for entry in entries {
            let candidate = score(exit, entry, track_a, track_b);
            best = Some(match best {
                None => candidate,
                Some(current) => pick_better(current, candidate),
            });
        }
    }

    match best {
        Some(t) if t.score > 0 => t,
        _ => emergency_cut(exits, entries),
    }
}

fn pick_better(a: Transition, b: Transition) -> Transition {
    if b.score != a.score {
        return if b.score > a.score { b } else { a };
    }
    let overlap_a = overlap_ms(&a.exit_cue, &a.entry_cue);
    let overlap_b = overlap_ms(&b.exit_cue, &b.entry_cue);
    if overlap_b != overlap_a {
        return if overlap_b > overlap_a { b } else { a };
    }
    if b.exit_cue.point_ms < a.exit_cue.point_ms { b } else { a }
}

fn emergency_cut(exits: &[CuePoint], entries: &[CuePoint]) -> Transition {
    let exit = exits.iter().max_by_key(|c| c.score).expect("mix plan always emits at least one exit cue");
    let entry = entries.iter().max_by_key(|c| c.score).expect("mix plan always emits at least one entry cue");
    Transition {
        exit_cue: exit.clone(),
        entry_cue: entry.clone(),
        score: 10,
        transition_type: TransitionType::Cut,
        suggested_curve: Curve::Cut,
    }
}

/// Per-ordered-pair memo for transition scoring: the transition memo is the
/// only shared mutable state, guarded by a fine-grained lock keyed on
/// `(A.hash, B.hash)`. A single `Mutex` around a plain `HashMap` is that
/// fine-grained lock for this workload — the A* search that consults it is
/// itself single-threaded, so there is no contention to design around
/// beyond "don't recompute".
#[derive(Default)]
pub struct TransitionMemo {
    cache: Mutex<HashMap<(TrackHash, TrackHash), Transition>>,
}

impl TransitionMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the best-pairing transition for the ordered pair `(a, b)`,
    /// computing and caching it on first request.
    pub fn get_or_compute(
        &self,
        track_a: &TrackDescriptor,
        track_b: &TrackDescriptor,
        exits_a: &[CuePoint],
        entries_b: &[CuePoint],
    ) -> Transition {
        let key = (track_a.hash.clone(), track_b.hash.clone());
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            return cached.clone();
        }
        let computed = best_pairing(exits_a, entries_b, track_a, track_b);
        self.cache.lock().unwrap().insert(key, computed.clone());
        computed
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BpmRange, Camelot, CamelotLetter, FreqFocus, Key, LoopKind, Meter, Mode, Mood, PitchClass, Segment, SegmentKind, TimelineSource, CueType};

    fn descriptor(bpm: f64, energy: f64, key: Option<Key>, timeline: Vec<Segment>) -> TrackDescriptor {
        let camelot = key.map(crate::analysis::tonal::key_to_camelot).unwrap_or(Camelot::new(8, CamelotLetter::B));
        let duration_ms = timeline.last().map(|s| s.end_ms).unwrap_or(180_000);
        TrackDescriptor {
            hash: "hash".into(),
            duration_ms,
            bpm,
            bpm_range: BpmRange::around(bpm),
            meter: Meter { numerator: 4, denominator: 4 },
            beats_ms: vec![0],
            downbeats_ms: vec![0],
            phrases_ms: vec![0],
            key,
            key_strength: if key.is_some() { 0.8 } else { 0.0 },
            camelot,
            camelot_compatible: camelot.compatible(),
            energy,
            danceability: 0.5,
            mood: Mood::Neutral,
            loudness_integrated_dbfs: -14.0,
            loudness_range_lu: 5.0,
            dynamic_complexity: 2.0,
            beats_loudness: vec![],
            timeline,
            timeline_source: TimelineSource::Analyzer,
            loops: vec![],
            events: vec![],
        }
    }

    fn cue(cue_type: CueType, point_ms: i64, strategy: Strategy, section_kind: SegmentKind) -> CuePoint {
        CuePoint {
            track_hash: "hash".into(),
            point_ms,
            cue_type,
            strategy,
            score: 90,
            safe_duration_ms: Some(20_000),
            has_vocal_overlap: false,
            aligned_to_phrase: true,
            aligned_to_bar: true,
            aligned_to_8bar: false,
            section_kind,
            vocal_type: VocalType::None,
            freq_focus: FreqFocus::Full,
            suggested_curve: Curve::Linear,
            loop_length_ms: None,
            loop_kind: None,
        }
    }

    #[test]
    fn outro_fade_to_intro_simple_is_a_strong_long_mix() {
        let c_major = Some(Key { tonic: PitchClass::C, mode: Mode::Major });
        let a = descriptor(120.0, 0.5, c_major, vec![Segment { kind: SegmentKind::Outro, start_ms: 160_000, end_ms: 180_000, has_vocals: false }]);
        let b = descriptor(122.0, 0.5, c_major, vec![Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 20_000, has_vocals: false }]);
        let exit = cue(CueType::Exit, 165_000, Strategy::OutroFade, SegmentKind::Outro);
        let entry = cue(CueType::Entry, 0, Strategy::IntroSimple, SegmentKind::Intro);

        let transition = score(&exit, &entry, &a, &b);
        assert!(transition.score >= 85, "expected >=85, got {}", transition.score);
        assert_eq!(transition.transition_type, TransitionType::LongMix);
        assert_eq!(transition.suggested_curve, Curve::Linear);
    }

    #[test]
    fn large_bpm_gap_is_vetoed_to_zero() {
        let a = descriptor(120.0, 0.5, None, vec![Segment { kind: SegmentKind::Outro, start_ms: 0, end_ms: 180_000, has_vocals: false }]);
        let b = descriptor(140.0, 0.5, None, vec![Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 20_000, has_vocals: false }]);
        let exit = cue(CueType::Exit, 165_000, Strategy::OutroFade, SegmentKind::Outro);
        let entry = cue(CueType::Entry, 0, Strategy::IntroSimple, SegmentKind::Intro);

        let transition = score(&exit, &entry, &a, &b);
        assert_eq!(transition.score, 0);

        let fallback = best_pairing(&[exit], &[entry], &a, &b);
        assert_eq!(fallback.score, 10);
        assert_eq!(fallback.transition_type, TransitionType::Cut);
    }

    #[test]
    fn double_drop_uses_bass_swap_curve() {
        let a = descriptor(128.0, 0.8, None, vec![Segment { kind: SegmentKind::Drop, start_ms: 0, end_ms: 180_000, has_vocals: false }]);
        let b = descriptor(128.0, 0.8, None, vec![Segment { kind: SegmentKind::Drop, start_ms: 0, end_ms: 180_000, has_vocals: false }]);
        let exit = cue(CueType::Exit, 90_000, Strategy::DropSwap, SegmentKind::Drop);
        let entry = cue(CueType::Entry, 10_000, Strategy::DropSwap, SegmentKind::Drop);

        let transition = score(&exit, &entry, &a, &b);
        assert_eq!(transition.transition_type, TransitionType::DoubleDrop);
        assert_eq!(transition.suggested_curve, Curve::BassSwap);
    }

    #[test]
    fn melodic_vocal_clash_on_both_sides_scores_zero() {
        let a = descriptor(120.0, 0.5, None, vec![Segment { kind: SegmentKind::Outro, start_ms: 0, end_ms: 180_000, has_vocals: false }]);
        let b = descriptor(120.0, 0.5, None, vec![Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 20_000, has_vocals: false }]);
        let mut exit = cue(CueType::Exit, 165_000, Strategy::OutroFade, SegmentKind::Outro);
        exit.vocal_type = VocalType::MelodicVocal;
        let mut entry = cue(CueType::Entry, 0, Strategy::IntroSimple, SegmentKind::Intro);
        entry.vocal_type = VocalType::MelodicVocal;

        let transition = score(&exit, &entry, &a, &b);
        assert_eq!(transition.score, 0);
    }

    #[test]
    fn loop_anchor_exit_produces_loop_mix() {
        let a = descriptor(120.0, 0.5, None, vec![Segment { kind: SegmentKind::Instrumental, start_ms: 0, end_ms: 180_000, has_vocals: false }]);
        let b = descriptor(120.0, 0.5, None, vec![Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 20_000, has_vocals: false }]);
        let mut exit = cue(CueType::Exit, 160_000, Strategy::LoopAnchor, SegmentKind::Instrumental);
        exit.loop_length_ms = Some(8_000);
        exit.loop_kind = Some(LoopKind::FourBar);
        let entry = cue(CueType::Entry, 0, Strategy::DropSwap, SegmentKind::Intro);

        let transition = score(&exit, &entry, &a, &b);
        assert_eq!(transition.transition_type, TransitionType::LoopMix);
    }

    #[test]
    fn memo_caches_by_ordered_hash_pair() {
        let a = descriptor(120.0, 0.5, None, vec![Segment { kind: SegmentKind::Outro, start_ms: 0, end_ms: 180_000, has_vocals: false }]);
        let b = descriptor(122.0, 0.5, None, vec![Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 20_000, has_vocals: false }]);
        let exits = vec![cue(CueType::Exit, 165_000, Strategy::OutroFade, SegmentKind::Outro)];
        let entries = vec![cue(CueType::Entry, 0, Strategy::IntroSimple, SegmentKind::Intro)];

        let memo = TransitionMemo::new();
        assert!(memo.is_empty());
        let first = memo.get_or_compute(&a, &b, &exits, &entries);
        assert_eq!(memo.len(), 1);
        let second = memo.get_or_compute(&a, &b, &exits, &entries);
        assert_eq!(memo.len(), 1);
        assert_eq!(first.score, second.score);
    }
}
