//! LLM labeler adapter: optional, stateless enrichment of the
//! structural timeline with `has_vocals`, loop candidates, and DJ events.
//!
//! An explicit `LabelerAdapter` value owns its HTTP client configuration and
//! token bucket, constructed once at program start and passed by reference —
//! never a process-wide mutable cache. It
//! speaks plain JSON over HTTP via `ureq`, with a token-bucket rate limit
//! guarding outbound requests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::LabelerError;
use crate::types::SegmentKind;

const MAX_VOCAL_BLOCKS: usize = 10;
const MAX_LOOPS: usize = 10;
const MAX_EVENTS: usize = 10;

/// The analyzer-derived timing skeleton presented to the labeler: just
/// enough context for it to propose structure, never raw audio.
#[derive(Debug, Clone, Serialize)]
pub struct LabelRequest {
    pub duration_ms: i64,
    pub bpm: f64,
    /// Analyzer's own crude vocal-presence estimate, offered as a hint; the
    /// labeler is free to disagree.
    pub vocal_activity_hint: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLabelResponse {
    #[serde(default)]
    segments: Vec<RawSegment>,
    #[serde(default)]
    vocal_blocks: Vec<(i64, i64)>,
    #[serde(default)]
    loop_candidates: Vec<RawLoop>,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSegment {
    kind: String,
    start_ms: i64,
    end_ms: i64,
    has_vocals: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLoop {
    start_ms: i64,
    end_ms: i64,
    score: u8,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEvent {
    kind: String,
    at_ms: i64,
}

/// A labeler's proposed enrichment, already bounded to fixed per-field
/// caps. Still advisory: the caller reconciles it against analyzer evidence
/// before folding it into a [`crate::types::TrackDescriptor`].
#[derive(Debug, Clone)]
pub struct LabelerOutcome {
    pub segments: Vec<(SegmentKind, i64, i64, bool)>,
    pub vocal_blocks: Vec<(i64, i64)>,
    pub loops: Vec<(i64, i64, u8)>,
    pub events: Vec<(String, i64)>,
}

fn parse_segment_kind(s: &str) -> Option<SegmentKind> {
    match s {
        "intro" => Some(SegmentKind::Intro),
        "verse" => Some(SegmentKind::Verse),
        "chorus" => Some(SegmentKind::Chorus),
        "bridge" => Some(SegmentKind::Bridge),
        "instrumental" => Some(SegmentKind::Instrumental),
        "break" => Some(SegmentKind::Break),
        "build_up" => Some(SegmentKind::BuildUp),
        "drop" => Some(SegmentKind::Drop),
        "outro" => Some(SegmentKind::Outro),
        "silence" => Some(SegmentKind::Silence),
        _ => None,
    }
}

/// A simple token bucket: `capacity` tokens refilled at `refill_per_sec`,
/// guarding the labeler's own rate limit.
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self { capacity, refill_per_sec, tokens: capacity, last_refill: Instant::now() }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Owns the labeler's HTTP endpoint and rate-limit state. Construct once,
/// pass by reference to every analysis worker that wants enrichment.
pub struct LabelerAdapter {
    endpoint: Option<String>,
    timeout: Duration,
    bucket: Mutex<TokenBucket>,
}

impl LabelerAdapter {
    /// A labeler that always returns "unavailable" without attempting I/O —
    /// the core's zero-instance / core-only mode, by construction rather
    /// than by special-casing `Option<LabelerAdapter>` at every call site.
    pub fn disabled() -> Self {
        Self { endpoint: None, timeout: Duration::from_secs(10), bucket: Mutex::new(TokenBucket::new(1.0, 1.0)) }
    }

    pub fn enabled(endpoint: impl Into<String>, requests_per_sec: f64, burst: f64) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            timeout: Duration::from_secs(10),
            bucket: Mutex::new(TokenBucket::new(burst, requests_per_sec)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Request enrichment for one track. Returns `Ok(None)` in core-only
    /// mode; never fails the caller's job, but does surface a typed error
    /// so the caller can decide how to log it.
    pub fn label(&self, request: &LabelRequest) -> Result<Option<LabelerOutcome>, LabelerError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(None);
        };

        if !self.bucket.lock().unwrap().try_take() {
            return Err(LabelerError::RateLimited);
        }

        let response: RawLabelResponse = ureq::post(endpoint)
            .config()
            .timeout_global(Some(self.timeout))
            .build()
            .send_json(request)
            .map_err(|_| LabelerError::Timeout)?
            .body_mut()
            .read_json()
            .map_err(|e| LabelerError::Rejected(e.to_string()))?;

        Ok(Some(bound_and_validate(response)))
    }
}

/// Clamp the labeler's response to fixed per-field caps and drop segments
/// whose `kind` fails to parse, rejecting unknown variants at the parsing
/// boundary.
fn bound_and_validate(raw: RawLabelResponse) -> LabelerOutcome {
    let segments = raw
        .segments
        .into_iter()
        .filter_map(|s| parse_segment_kind(&s.kind).map(|kind| (kind, s.start_ms, s.end_ms, s.has_vocals)))
        .collect();

    let mut vocal_blocks = raw.vocal_blocks;
    vocal_blocks.truncate(MAX_VOCAL_BLOCKS);

    let mut loops: Vec<(i64, i64, u8)> = raw.loop_candidates.into_iter().map(|l| (l.start_ms, l.end_ms, l.score.clamp(1, 10))).collect();
    loops.truncate(MAX_LOOPS);

    let mut events: Vec<(String, i64)> = raw.events.into_iter().map(|e| (e.kind, e.at_ms)).collect();
    events.truncate(MAX_EVENTS);

    LabelerOutcome { segments, vocal_blocks, loops, events }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_adapter_never_attempts_io() {
        let adapter = LabelerAdapter::disabled();
        assert!(!adapter.is_enabled());
        let request = LabelRequest { duration_ms: 180_000, bpm: 120.0, vocal_activity_hint: vec![] };
        let outcome = adapter.label(&request).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn bound_and_validate_drops_unknown_segment_kinds_and_caps_lists() {
        let raw = RawLabelResponse {
            segments: vec![
                RawSegment { kind: "verse".into(), start_ms: 0, end_ms: 10_000, has_vocals: true },
                RawSegment { kind: "nonsense".into(), start_ms: 10_000, end_ms: 20_000, has_vocals: false },
            ],
            vocal_blocks: (0..20).map(|i| (i * 1_000, i * 1_000 + 500)).collect(),
            loop_candidates: (0..20).map(|i| RawLoop { start_ms: i * 1_000, end_ms: i * 1_000 + 500, score: 15 }).collect(),
            events: (0..20).map(|i| RawEvent { kind: "drop".into(), at_ms: i * 1_000 }).collect(),
        };
        let outcome = bound_and_validate(raw);
        assert_eq!(outcome.segments.len(), 1);
        assert_eq!(outcome.segments[0].0, SegmentKind::Verse);
        assert_eq!(outcome.vocal_blocks.len(), MAX_VOCAL_BLOCKS);
        assert_eq!(outcome.loops.len(), MAX_LOOPS);
        assert_eq!(outcome.events.len(), MAX_EVENTS);
        assert!(outcome.loops.iter().all(|&(_, _, score)| score <= 10));
    }

    #[test]
    fn bound_and_validate_clamps_loop_score_to_the_declared_range() {
        let raw = RawLabelResponse {
            segments: vec![],
            vocal_blocks: vec![],
            loop_candidates: vec![
                RawLoop { start_ms: 0, end_ms: 500, score: 0 },
                RawLoop { start_ms: 1_000, end_ms: 1_500, score: 255 },
            ],
            events: vec![],
        };
        let outcome = bound_and_validate(raw);
        assert_eq!(outcome.loops[0].2, 1);
        assert_eq!(outcome.loops[1].2, 10);
    }

    #[test]
    fn token_bucket_refuses_once_exhausted() {
        let mut bucket = TokenBucket::new(1.0, 0.0);
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }
}
