//! Sequence planner: A* search over track orderings.
//!
//! States are `(current_track, used_set)`; the priority queue is the
//! standard library's documented `BinaryHeap`-based shortest-path idiom (a
//! `Reverse`-ordered max-heap used as a min-heap). `noisy_float::N64` gives
//! total ordering on the `f = g + h` priority without a hand-rolled `Ord`
//! wrapper on `f64`.

use noisy_float::prelude::*;
use std::collections::{BTreeSet, BinaryHeap};
use std::time::{Duration, Instant};

use crate::transition::TransitionMemo;
use crate::types::{MixPlanEntry, SequencedSession, SequencedTrack, TrackDescriptor, TrackHash};

const EXPANSION_CAP: usize = 10_000;
const HEURISTIC_WEIGHT_PER_REMAINING_TRACK: f64 = 5.0;

/// Parameters for a single planning run.
pub struct PlanRequest<'a> {
    pub descriptors: &'a [TrackDescriptor],
    pub plans: &'a [MixPlanEntry],
    pub start: Option<&'a TrackHash>,
    /// Target session length; `None` means "all tracks".
    pub target_len: Option<usize>,
    pub deadline: Option<Instant>,
}

#[derive(Clone)]
struct Path {
    order: Vec<TrackHash>,
    g_score: f64,
}

#[derive(Clone)]
struct QueueEntry {
    f_score: f64,
    depth: usize,
    path: Path,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f_score == other.f_score && self.depth == other.depth
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// `BinaryHeap` is a max-heap; we want the *lowest* `f` popped first, with
    /// ties broken toward *deeper* (more complete) paths, so we invert `f`
    /// and keep depth as-is before comparing.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        n64(-self.f_score)
            .cmp(&n64(-other.f_score))
            .then(self.depth.cmp(&other.depth))
    }
}

fn edge_cost(
    memo: &TransitionMemo,
    a: &TrackHash,
    b: &TrackHash,
    descriptors: &std::collections::HashMap<&TrackHash, &TrackDescriptor>,
    plans: &std::collections::HashMap<&TrackHash, &MixPlanEntry>,
) -> Option<f64> {
    let track_a = descriptors.get(a)?;
    let track_b = descriptors.get(b)?;
    let plan_a = plans.get(a)?;
    let plan_b = plans.get(b)?;
    let transition = memo.get_or_compute(track_a, track_b, &plan_a.best_exits, &plan_b.best_entries);
    if transition.score == 0 {
        return None;
    }
    Some(100.0 - transition.score as f64)
}

/// Run an A* search and return the best complete (or
/// best partial, if the deadline/cap is hit first) [`SequencedSession`].
///
/// Returns `None` when fewer than two tracks are usable (the
/// `PLAN_INFEASIBLE` condition) — the caller maps that to the error kind.
pub fn plan(request: &PlanRequest) -> Option<SequencedSession> {
    if request.descriptors.len() < 2 {
        return None;
    }

    let descriptors: std::collections::HashMap<&TrackHash, &TrackDescriptor> =
        request.descriptors.iter().map(|d| (&d.hash, d)).collect();
    let plans: std::collections::HashMap<&TrackHash, &MixPlanEntry> =
        request.plans.iter().map(|p| (&p.track_hash, p)).collect();

    let all_hashes: BTreeSet<&TrackHash> = descriptors.keys().copied().collect();
    let target_len = request.target_len.unwrap_or(all_hashes.len()).min(all_hashes.len());
    if target_len < 2 {
        return None;
    }

    let start = request
        .start
        .filter(|h| descriptors.contains_key(h))
        .cloned()
        .unwrap_or_else(|| request.descriptors[0].hash.clone());

    let memo = TransitionMemo::new();
    let mut heap = BinaryHeap::new();
    let initial = Path { order: vec![start], g_score: 0.0 };
    heap.push(QueueEntry {
        f_score: heuristic(1, target_len),
        depth: 1,
        path: initial,
    });

    let mut best_complete: Option<Path> = None;
    let mut best_partial: Option<Path> = None;
    let mut pops = 0usize;

    while let Some(QueueEntry { path, .. }) = heap.pop() {
        pops += 1;
        if best_partial.as_ref().map(|p| p.order.len() < path.order.len()).unwrap_or(true) {
            best_partial = Some(path.clone());
        }

        if path.order.len() == target_len {
            best_complete = Some(match best_complete {
                Some(current) if current.g_score <= path.g_score => current,
                _ => path,
            });
            continue;
        }

        if pops >= EXPANSION_CAP {
            break;
        }
        if let Some(deadline) = request.deadline {
            if Instant::now() >= deadline {
                break;
            }
        }

        let used: BTreeSet<&TrackHash> = path.order.iter().collect();
        let current = path.order.last().unwrap();

        for candidate in &all_hashes {
            if used.contains(*candidate) {
                continue;
            }
            let Some(cost) = edge_cost(&memo, current, candidate, &descriptors, &plans) else {
                continue;
            };
            let mut order = path.order.clone();
            order.push((*candidate).clone());
            let g_score = path.g_score + cost;
            let depth = order.len();
            heap.push(QueueEntry {
                f_score: g_score + heuristic(depth, target_len),
                depth,
                path: Path { order, g_score },
            });
        }
    }

    let chosen = best_complete.or_else(|| {
        best_partial.map(|partial| extend_greedily(partial, target_len, &all_hashes, &memo, &descriptors, &plans))
    })?;

    Some(assemble(chosen, &descriptors, &plans, &memo))
}

fn heuristic(used_count: usize, target_len: usize) -> f64 {
    (target_len.saturating_sub(used_count)) as f64 * HEURISTIC_WEIGHT_PER_REMAINING_TRACK
}

/// When the search exhausts its cap or the open set empties without a
/// complete path, extend the best partial path greedily by repeatedly
/// choosing the lowest-cost unvisited successor.
fn extend_greedily(
    mut path: Path,
    target_len: usize,
    all_hashes: &BTreeSet<&TrackHash>,
    memo: &TransitionMemo,
    descriptors: &std::collections::HashMap<&TrackHash, &TrackDescriptor>,
    plans: &std::collections::HashMap<&TrackHash, &MixPlanEntry>,
) -> Path {
    while path.order.len() < target_len {
        let used: BTreeSet<&TrackHash> = path.order.iter().collect();
        let current = path.order.last().unwrap().clone();
        let best = all_hashes
            .iter()
            .filter(|h| !used.contains(*h))
            .filter_map(|h| edge_cost(memo, &current, h, descriptors, plans).map(|c| (c, (*h).clone())))
            .min_by(|(cost_a, hash_a), (cost_b, hash_b)| {
                cost_a.partial_cmp(cost_b).unwrap_or(std::cmp::Ordering::Equal).then(hash_a.cmp(hash_b))
            });

        match best {
            Some((cost, hash)) => {
                path.g_score += cost;
                path.order.push(hash);
            }
            None => break,
        }
    }
    path
}

fn assemble(
    path: Path,
    descriptors: &std::collections::HashMap<&TrackHash, &TrackDescriptor>,
    plans: &std::collections::HashMap<&TrackHash, &MixPlanEntry>,
    memo: &TransitionMemo,
) -> SequencedSession {
    let mut tracks = Vec::with_capacity(path.order.len());
    for (i, hash) in path.order.iter().enumerate() {
        let transition_from_previous = if i == 0 {
            None
        } else {
            let prev = &path.order[i - 1];
            let track_a = descriptors[prev];
            let track_b = descriptors[hash];
            let plan_a = plans[prev];
            let plan_b = plans[hash];
            Some(memo.get_or_compute(track_a, track_b, &plan_a.best_exits, &plan_b.best_entries))
        };
        tracks.push(SequencedTrack { track_hash: hash.clone(), transition_from_previous });
    }

    let n = path.order.len();
    let avg_transition_score = if n > 1 { 100.0 - path.g_score / (n - 1) as f64 } else { 100.0 };

    SequencedSession { tracks, avg_transition_score }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BpmRange, Camelot, CamelotLetter, Meter, Mood, Segment, SegmentKind, TimelineSource};

    fn descriptor(hash: &str, bpm: f64, camelot: Camelot) -> TrackDescriptor {
        let timeline = vec![
            Segment { kind: SegmentKind::Intro, start_ms: 0, end_ms: 20_000, has_vocals: false },
            Segment { kind: SegmentKind::Outro, start_ms: 160_000, end_ms: 180_000, has_vocals: false },
        ];
        TrackDescriptor {
            hash: hash.into(),
            duration_ms: 180_000,
            bpm,
            bpm_range: BpmRange::around(bpm),
            meter: Meter { numerator: 4, denominator: 4 },
            beats_ms: (0..180_000).step_by((60_000.0 / bpm) as usize).collect(),
            downbeats_ms: vec![0],
            phrases_ms: vec![0, 16_000, 32_000],
            key: None,
            key_strength: 0.0,
            camelot,
            camelot_compatible: camelot.compatible(),
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
    fn single_track_session_has_no_transitions() {
        let descriptors = vec![descriptor("a", 120.0, Camelot::new(8, CamelotLetter::B))];
        let plans: Vec<MixPlanEntry> = descriptors.iter().map(crate::cues::plan).collect();
        let request = PlanRequest { descriptors: &descriptors, plans: &plans, start: None, target_len: None, deadline: None };
        assert!(plan(&request).is_none());
    }

    #[test]
    fn two_compatible_tracks_produce_a_two_track_session() {
        let descriptors = vec![
            descriptor("a", 120.0, Camelot::new(8, CamelotLetter::B)),
            descriptor("b", 122.0, Camelot::new(8, CamelotLetter::B)),
        ];
        let plans: Vec<MixPlanEntry> = descriptors.iter().map(crate::cues::plan).collect();
        let request = PlanRequest { descriptors: &descriptors, plans: &plans, start: None, target_len: None, deadline: None };
        let session = plan(&request).expect("two usable tracks should plan");
        assert_eq!(session.tracks.len(), 2);
        assert!(session.tracks[0].transition_from_previous.is_none());
        assert!(session.tracks[1].transition_from_previous.is_some());
    }

    #[test]
    fn each_track_hash_appears_at_most_once() {
        let descriptors = vec![
            descriptor("a", 120.0, Camelot::new(8, CamelotLetter::B)),
            descriptor("b", 121.0, Camelot::new(9, CamelotLetter::B)),
            descriptor("c", 119.0, Camelot::new(7, CamelotLetter::B)),
        ];
        let plans: Vec<MixPlanEntry> = descriptors.iter().map(crate::cues::plan).collect();
        let request = PlanRequest { descriptors: &descriptors, plans: &plans, start: None, target_len: None, deadline: None };
        let session = plan(&request).expect("three compatible tracks should plan");
        let mut seen = BTreeSet::new();
        for t in &session.tracks {
            assert!(seen.insert(t.track_hash.clone()), "duplicate hash in session");
        }
    }

    #[test]
    fn incompatible_bpm_pair_still_plans_via_emergency_cut() {
        let descriptors = vec![descriptor("a", 120.0, Camelot::new(8, CamelotLetter::B)), descriptor("b", 140.0, Camelot::new(8, CamelotLetter::B))];
        let plans: Vec<MixPlanEntry> = descriptors.iter().map(crate::cues::plan).collect();
        let request = PlanRequest { descriptors: &descriptors, plans: &plans, start: None, target_len: None, deadline: None };
        let session = plan(&request).expect("emergency cut keeps the session feasible");
        assert_eq!(session.tracks.len(), 2);
    }
}
