//! Cue-point planner: pure function from a [`TrackDescriptor`]
//! to an ordered [`MixPlanEntry`].
//!
//! The scoring shape throughout — a base score times a chain of sequential
//! multipliers, clamped and rounded at the end — is a plain
//! extract-normalize-weight-clamp idiom applied to cue candidates.

use crate::types::{
    CuePoint, CueType, Curve, FreqFocus, LoopKind, MixPlanEntry, SegmentKind, Segment, Strategy,
    TrackDescriptor, VocalType,
};

const PHRASE_SNAP_TOLERANCE_MS: i64 = 2_000;
const ENTRY_WINDOW_FRACTION: f64 = 0.40;
const EXIT_WINDOW_FRACTION: f64 = 0.55;
const MAX_CUES_PER_LIST: usize = 5;
const SHORT_TRACK_THRESHOLD_MS: i64 = 30_000;

/// Clip a candidate point into the valid track range. Every transformation
/// that can move a cue's `point_ms` calls this immediately afterward, so
/// there is exactly one place the `0 <= point_ms <= duration_ms` invariant
/// can be violated and exactly one place it is enforced.
fn clip_to_track(point_ms: i64, duration_ms: i64) -> i64 {
    point_ms.clamp(0, duration_ms)
}

pub fn plan(descriptor: &TrackDescriptor) -> MixPlanEntry {
    let mut entries = entry_candidates(descriptor);
    let mut exits = exit_candidates(descriptor);

    entries.sort_by(|a, b| b.score.cmp(&a.score).then(a.point_ms.cmp(&b.point_ms)));
    exits.sort_by(|a, b| b.score.cmp(&a.score).then(b.point_ms.cmp(&a.point_ms)));

    let cap = if descriptor.duration_ms < SHORT_TRACK_THRESHOLD_MS { 1 } else { MAX_CUES_PER_LIST };
    entries.truncate(cap);
    exits.truncate(cap);

    MixPlanEntry {
        track_hash: descriptor.hash.clone(),
        duration_ms: descriptor.duration_ms,
        best_entries: entries,
        best_exits: exits,
    }
}

fn nearest_phrase(point_ms: i64, phrases_ms: &[i64], tolerance_ms: i64) -> Option<i64> {
    phrases_ms
        .iter()
        .copied()
        .min_by_key(|&p| (p - point_ms).abs())
        .filter(|&p| (p - point_ms).abs() <= tolerance_ms)
}

fn is_phrase_aligned(point_ms: i64, phrases_ms: &[i64]) -> bool {
    nearest_phrase(point_ms, phrases_ms, PHRASE_SNAP_TOLERANCE_MS).is_some()
}

struct GridAlignment {
    point_ms: i64,
    aligned_to_bar: bool,
    aligned_to_8bar: bool,
}

/// 8-bar grid snap ("alignment helper"): project `point_ms -
/// downbeats[0]` onto multiples of `8 * bar_ms`; snap if within two beats,
/// else try a plain bar snap, else leave the point untouched.
fn align_to_grid(point_ms: i64, descriptor: &TrackDescriptor) -> GridAlignment {
    let bar_ms = descriptor.bar_ms();
    let beat_ms = 60_000.0 / descriptor.bpm;
    let tolerance_ms = 2.0 * beat_ms;
    let downbeat0 = descriptor.downbeats_ms.first().copied().unwrap_or(0);
    let delta = (point_ms - downbeat0) as f64;

    let grid8 = 8.0 * bar_ms;
    let nearest8 = (delta / grid8).round() * grid8;
    if (delta - nearest8).abs() <= tolerance_ms {
        let snapped = clip_to_track(downbeat0 + nearest8.round() as i64, descriptor.duration_ms);
        return GridAlignment { point_ms: snapped, aligned_to_bar: true, aligned_to_8bar: true };
    }

    let nearest_bar = (delta / bar_ms).round() * bar_ms;
    if (delta - nearest_bar).abs() <= tolerance_ms {
        let snapped = clip_to_track(downbeat0 + nearest_bar.round() as i64, descriptor.duration_ms);
        return GridAlignment { point_ms: snapped, aligned_to_bar: true, aligned_to_8bar: false };
    }

    GridAlignment { point_ms: clip_to_track(point_ms, descriptor.duration_ms), aligned_to_bar: false, aligned_to_8bar: false }
}

pub(crate) fn vocal_type_for(kind: SegmentKind) -> VocalType {
    match kind {
        SegmentKind::Verse | SegmentKind::Bridge => VocalType::MelodicVocal,
        SegmentKind::Chorus | SegmentKind::Outro => VocalType::RhythmicChant,
        _ => VocalType::None,
    }
}

fn freq_focus_for(strategy: Strategy) -> FreqFocus {
    match strategy {
        Strategy::DropSwap | Strategy::ImpactEntry => FreqFocus::Low,
        Strategy::LoopAnchor => FreqFocus::Mid,
        Strategy::BreakdownEntry => FreqFocus::High,
        Strategy::IntroSimple | Strategy::OutroFade | Strategy::EventSync => FreqFocus::Full,
    }
}

fn default_curve_for(strategy: Strategy) -> Curve {
    match strategy {
        Strategy::DropSwap => Curve::BassSwap,
        Strategy::ImpactEntry => Curve::Cut,
        Strategy::LoopAnchor => Curve::PowerMix,
        Strategy::IntroSimple | Strategy::OutroFade | Strategy::BreakdownEntry | Strategy::EventSync => Curve::Linear,
    }
}

fn has_vocal_overlap(descriptor: &TrackDescriptor, point_ms: i64) -> bool {
    descriptor.segment_at(point_ms).map(|s| s.has_vocals).unwrap_or(false)
}

fn no_vocals_near(descriptor: &TrackDescriptor, point_ms: i64, radius_ms: i64) -> bool {
    !descriptor
        .timeline
        .iter()
        .any(|s| s.has_vocals && s.start_ms < point_ms + radius_ms && s.end_ms > point_ms - radius_ms)
}

#[allow(clippy::too_many_arguments)]
fn make_cue(
    descriptor: &TrackDescriptor,
    cue_type: CueType,
    point_ms: i64,
    strategy: Strategy,
    raw_score: f64,
    aligned_to_phrase: bool,
    aligned_to_bar: bool,
    aligned_to_8bar: bool,
    section_kind: SegmentKind,
    loop_length_ms: Option<i64>,
    loop_kind: Option<LoopKind>,
    curve_override: Option<Curve>,
) -> CuePoint {
    let point_ms = clip_to_track(point_ms, descriptor.duration_ms);
    let score = raw_score.clamp(0.0, 100.0).round() as u8;
    CuePoint {
        track_hash: descriptor.hash.clone(),
        point_ms,
        cue_type,
        strategy,
        score,
        safe_duration_ms: if matches!(strategy, Strategy::LoopAnchor) { None } else { Some((descriptor.duration_ms - point_ms).max(0)) },
        has_vocal_overlap: has_vocal_overlap(descriptor, point_ms),
        aligned_to_phrase,
        aligned_to_bar,
        aligned_to_8bar,
        section_kind,
        vocal_type: vocal_type_for(section_kind),
        freq_focus: freq_focus_for(strategy),
        suggested_curve: curve_override.unwrap_or_else(|| default_curve_for(strategy)),
        loop_length_ms,
        loop_kind,
    }
}

fn entry_candidates(descriptor: &TrackDescriptor) -> Vec<CuePoint> {
    let window_end = (descriptor.duration_ms as f64 * ENTRY_WINDOW_FRACTION) as i64;
    let mut candidates = Vec::new();

    // Rule 1: non-vocal segments of at least 4s, snapped to the nearest phrase.
    for segment in &descriptor.timeline {
        if segment.has_vocals || segment.duration_ms() < 4_000 || segment.start_ms > window_end {
            continue;
        }
        let snapped = nearest_phrase(segment.start_ms, &descriptor.phrases_ms, PHRASE_SNAP_TOLERANCE_MS)
            .unwrap_or(segment.start_ms);
        let aligned = is_phrase_aligned(snapped, &descriptor.phrases_ms);

        let mut mult = 1.0;
        if segment.kind == SegmentKind::Instrumental {
            mult *= 1.5;
        }
        if aligned {
            mult *= 1.2;
        }
        if segment.kind == SegmentKind::Intro {
            mult *= 1.4;
        }
        if segment.kind == SegmentKind::Break {
            mult *= 1.3;
        }
        let strategy = if segment.kind == SegmentKind::Intro || snapped < 10_000 {
            Strategy::IntroSimple
        } else {
            Strategy::BreakdownEntry
        };

        candidates.push(make_cue(
            descriptor, CueType::Entry, snapped, strategy, 75.0 * mult,
            aligned, false, false, segment.kind, None, None, None,
        ));
    }

    // Rule 2: first verse-type vocal segment whose predecessor is instrumental.
    if let Some(idx) = descriptor.timeline.iter().position(|s| {
        s.kind == SegmentKind::Verse && s.has_vocals && s.start_ms <= window_end
    }) {
        if idx > 0 && !descriptor.timeline[idx - 1].has_vocals {
            let segment = &descriptor.timeline[idx];
            let aligned = is_phrase_aligned(segment.start_ms, &descriptor.phrases_ms);
            let mult = if aligned { 1.2 } else { 1.0 };
            candidates.push(make_cue(
                descriptor, CueType::Entry, segment.start_ms, Strategy::BreakdownEntry, 55.0 * mult,
                aligned, false, false, segment.kind, None, None, None,
            ));
        }
    }

    // Rule 3: drop events within the window.
    for segment in &descriptor.timeline {
        if segment.kind != SegmentKind::Drop || segment.start_ms > window_end {
            continue;
        }
        let pre_drop = segment.start_ms - 16_000;
        let aligned = align_to_grid(pre_drop, descriptor);
        let clash = has_vocal_overlap(descriptor, aligned.point_ms);
        let mut mult = 2.0;
        if clash {
            mult *= 0.1;
        }
        if aligned.aligned_to_8bar {
            mult *= 1.15;
        }
        candidates.push(make_cue(
            descriptor, CueType::Entry, aligned.point_ms, Strategy::DropSwap, 90.0 * mult,
            is_phrase_aligned(aligned.point_ms, &descriptor.phrases_ms), aligned.aligned_to_bar, aligned.aligned_to_8bar,
            segment.kind, None, None, None,
        ));

        if segment.start_ms <= 5_000 {
            let bonus = if no_vocals_near(descriptor, segment.start_ms, 2_000) { 15.0 } else { 0.0 };
            candidates.push(make_cue(
                descriptor, CueType::Entry, segment.start_ms, Strategy::ImpactEntry, 65.0 + bonus,
                is_phrase_aligned(segment.start_ms, &descriptor.phrases_ms), false, false,
                segment.kind, None, None, None,
            ));
        }
    }

    // Rule 4: labeler-supplied DJ events within the window, grid-snapped.
    for event in &descriptor.events {
        if event.at_ms > window_end {
            continue;
        }
        let aligned = align_to_grid(event.at_ms, descriptor);
        let clash = has_vocal_overlap(descriptor, aligned.point_ms);
        let mut mult = 1.0;
        if clash {
            mult *= 0.1;
        }
        if aligned.aligned_to_8bar {
            mult *= 1.15;
        }
        let kind = descriptor.segment_at(aligned.point_ms).map(|s| s.kind).unwrap_or(SegmentKind::Intro);
        candidates.push(make_cue(
            descriptor, CueType::Entry, aligned.point_ms, Strategy::EventSync, 70.0 * mult,
            is_phrase_aligned(aligned.point_ms, &descriptor.phrases_ms), aligned.aligned_to_bar, aligned.aligned_to_8bar,
            kind, None, None, None,
        ));
    }

    // Rule 5: fallback.
    if candidates.is_empty() {
        let point = descriptor.phrases_ms.iter().copied().find(|&p| p >= 0).unwrap_or(0);
        let kind = descriptor.segment_at(point).map(|s| s.kind).unwrap_or(SegmentKind::Intro);
        candidates.push(make_cue(
            descriptor, CueType::Entry, point, Strategy::IntroSimple, 50.0,
            true, false, false, kind, None, None, None,
        ));
    }

    candidates
}

fn instrumental_tail_segments(descriptor: &TrackDescriptor, window_start: i64) -> impl Iterator<Item = &Segment> {
    descriptor
        .timeline
        .iter()
        .filter(move |s| !s.has_vocals && s.duration_ms() >= 4_000 && s.start_ms >= window_start)
}

fn exit_candidates(descriptor: &TrackDescriptor) -> Vec<CuePoint> {
    let window_start = (descriptor.duration_ms as f64 * EXIT_WINDOW_FRACTION) as i64;
    let bar_ms = descriptor.bar_ms();
    let mut candidates = Vec::new();

    // Rule A: tail instrumental segments.
    for segment in instrumental_tail_segments(descriptor, window_start) {
        let point = segment.start_ms;
        let aligned = is_phrase_aligned(point, &descriptor.phrases_ms);
        let mut mult = 1.0;
        if segment.kind == SegmentKind::Instrumental {
            mult *= 1.5;
        }
        if aligned {
            mult *= 1.2;
        }
        if segment.kind == SegmentKind::Intro {
            mult *= 1.4;
        }
        if segment.kind == SegmentKind::Break {
            mult *= 1.3;
        }
        let proximity_bonus = 10.0 * (point as f64 / descriptor.duration_ms.max(1) as f64);
        let strategy = if segment.kind == SegmentKind::Outro { Strategy::OutroFade } else { Strategy::BreakdownEntry };

        candidates.push(make_cue(
            descriptor, CueType::Exit, point, strategy, 75.0 * mult + proximity_bonus,
            aligned, false, false, segment.kind, None, None, None,
        ));
    }

    // Rule B: chorus followed by an instrumental segment.
    for window in descriptor.timeline.windows(2) {
        let (chorus, next) = (&window[0], &window[1]);
        if chorus.kind != SegmentKind::Chorus || next.has_vocals || chorus.end_ms < window_start {
            continue;
        }
        let aligned = is_phrase_aligned(chorus.end_ms, &descriptor.phrases_ms);
        let mult = if aligned { 1.2 } else { 1.0 };
        candidates.push(make_cue(
            descriptor, CueType::Exit, chorus.end_ms, Strategy::DropSwap, 80.0 * mult,
            aligned, false, false, chorus.kind, None, None, Some(Curve::BassSwap),
        ));
    }

    // Rule C: loop-anchor-worthy instrumental segments.
    for segment in &descriptor.timeline {
        if segment.kind != SegmentKind::Instrumental || segment.start_ms < window_start {
            continue;
        }
        let duration = segment.duration_ms() as f64;
        let (loop_bars, base, loop_kind) = if duration >= bar_ms * 4.0 {
            (4, 95.0, LoopKind::FourBar)
        } else if duration >= bar_ms {
            (1, 85.0, LoopKind::OneBar)
        } else {
            continue;
        };
        let aligned = align_to_grid(segment.start_ms, descriptor);
        candidates.push(make_cue(
            descriptor, CueType::Exit, aligned.point_ms, Strategy::LoopAnchor, base,
            is_phrase_aligned(aligned.point_ms, &descriptor.phrases_ms), aligned.aligned_to_bar, aligned.aligned_to_8bar,
            segment.kind, Some((bar_ms * loop_bars as f64).round() as i64), Some(loop_kind), None,
        ));
    }

    // Rule D: labeler-supplied DJ events within the window, grid-snapped.
    for event in &descriptor.events {
        if event.at_ms < window_start {
            continue;
        }
        let aligned = align_to_grid(event.at_ms, descriptor);
        let clash = has_vocal_overlap(descriptor, aligned.point_ms);
        let mut mult = 1.0;
        if clash {
            mult *= 0.1;
        }
        if aligned.aligned_to_8bar {
            mult *= 1.15;
        }
        let kind = descriptor.segment_at(aligned.point_ms).map(|s| s.kind).unwrap_or(SegmentKind::Outro);
        candidates.push(make_cue(
            descriptor, CueType::Exit, aligned.point_ms, Strategy::EventSync, 70.0 * mult,
            is_phrase_aligned(aligned.point_ms, &descriptor.phrases_ms), aligned.aligned_to_bar, aligned.aligned_to_8bar,
            kind, None, None, None,
        ));
    }

    // Rule E: fallback.
    if candidates.is_empty() {
        let point = descriptor.duration_ms - 15_000;
        candidates.push(make_cue(
            descriptor, CueType::Exit, point, Strategy::OutroFade, 75.0,
            false, false, false,
            descriptor.segment_at(point).map(|s| s.kind).unwrap_or(SegmentKind::Outro),
            None, None, None,
        ));
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BpmRange, Camelot, CamelotLetter, DjEvent, Meter, Mood, TimelineSource};

    fn descriptor_with_timeline(duration_ms: i64, timeline: Vec<Segment>, bpm: f64) -> TrackDescriptor {
        TrackDescriptor {
            hash: "abc123".into(),
            duration_ms,
            bpm,
            bpm_range: BpmRange::around(bpm),
            meter: Meter { numerator: 4, denominator: 4 },
            beats_ms: (0..duration_ms).step_by((60_000.0 / bpm) as usize).collect(),
            downbeats_ms: vec![0],
            phrases_ms: vec![0, 16_000],
            key: None,
            key_strength: 0.0,
            camelot: Camelot::new(8, CamelotLetter::B),
            camelot_compatible: Camelot::new(8, CamelotLetter::B).compatible(),
            energy: 0.5,
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

    #[test]
    fn single_intro_segment_produces_entry_and_fallback_exit() {
        let timeline = vec![Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 180_000, has_vocals: false }];
        let descriptor = descriptor_with_timeline(180_000, timeline, 120.0);
        let plan = plan(&descriptor);

        assert_eq!(plan.best_entries[0].strategy, Strategy::IntroSimple);
        assert_eq!(plan.best_entries[0].point_ms, 0);
        assert_eq!(plan.best_entries[0].score, 100);

        assert_eq!(plan.best_exits[0].strategy, Strategy::OutroFade);
        assert_eq!(plan.best_exits[0].point_ms, 165_000);
        assert!(plan.best_exits[0].score >= 75);
    }

    #[test]
    fn cue_points_never_exceed_track_bounds() {
        let timeline = vec![Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 30_000, has_vocals: false }];
        let descriptor = descriptor_with_timeline(30_000, timeline, 128.0);
        let plan = plan(&descriptor);
        for cue in plan.best_entries.iter().chain(plan.best_exits.iter()) {
            assert!(cue.point_ms >= 0 && cue.point_ms <= descriptor.duration_ms);
        }
    }

    #[test]
    fn entries_are_sorted_descending_by_score() {
        let timeline = vec![
            Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 20_000, has_vocals: false },
            Segment { kind: SegmentKind::Verse, start_ms: 20_000, end_ms: 60_000, has_vocals: true },
        ];
        let descriptor = descriptor_with_timeline(200_000, timeline, 120.0);
        let plan = plan(&descriptor);
        for pair in plan.best_entries.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn loop_anchor_cue_has_unbounded_safe_duration() {
        let timeline = vec![
            Segment { kind: SegmentKind::Verse, start_ms: 0, end_ms: 140_000, has_vocals: true },
            Segment { kind: SegmentKind::Instrumental, start_ms: 140_000, end_ms: 160_000, has_vocals: false },
        ];
        let descriptor = descriptor_with_timeline(200_000, timeline, 120.0);
        let plan = plan(&descriptor);
        let loop_cue = plan.best_exits.iter().find(|c| c.strategy == Strategy::LoopAnchor);
        if let Some(cue) = loop_cue {
            assert!(cue.safe_duration_ms.is_none());
            assert!(cue.loop_length_ms.is_some());
        }
    }

    #[test]
    fn tracks_under_thirty_seconds_get_one_entry_and_one_exit() {
        let timeline = vec![
            Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 5_000, has_vocals: false },
            Segment { kind: SegmentKind::Drop, start_ms: 5_000, end_ms: 20_000, has_vocals: false },
            Segment { kind: SegmentKind::Outro, start_ms: 20_000, end_ms: 25_000, has_vocals: false },
        ];
        let mut descriptor = descriptor_with_timeline(25_000, timeline, 120.0);
        descriptor.events = vec![DjEvent { kind: "riser".into(), at_ms: 4_000 }];
        let plan = plan(&descriptor);

        assert_eq!(plan.best_entries.len(), 1);
        assert_eq!(plan.best_exits.len(), 1);
    }

    #[test]
    fn labeler_events_produce_reachable_event_sync_cues() {
        let timeline = vec![
            Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 20_000, has_vocals: false },
            Segment { kind: SegmentKind::Verse, start_ms: 20_000, end_ms: 160_000, has_vocals: true },
            Segment { kind: SegmentKind::Outro, start_ms: 160_000, end_ms: 200_000, has_vocals: false },
        ];
        let mut descriptor = descriptor_with_timeline(200_000, timeline, 120.0);
        descriptor.events = vec![
            DjEvent { kind: "riser".into(), at_ms: 10_000 },
            DjEvent { kind: "vocal_adlib".into(), at_ms: 180_000 },
        ];
        let plan = plan(&descriptor);

        assert!(plan.best_entries.iter().any(|c| c.strategy == Strategy::EventSync));
        assert!(plan.best_exits.iter().any(|c| c.strategy == Strategy::EventSync));
    }
}
