//! The core data model: track descriptors, cue points, transitions, sessions.
//!
//! Cues and transitions own only a `track_hash`; callers dereference through
//! a hash -> descriptor map rather than carrying duplicated track fields.

use serde::{Deserialize, Serialize};

/// Stable content-derived identifier for a track. See `scanner::hash_file`.
pub type TrackHash = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|p| *p == self).unwrap()
    }

    pub fn from_index(i: usize) -> Self {
        Self::ALL[i % 12]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Major,
    Minor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub tonic: PitchClass,
    pub mode: Mode,
}

/// One of the 24 cells of the Camelot wheel: a number 1..=12 and a letter A (minor) or B (major).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Camelot {
    pub number: u8,
    pub letter: CamelotLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CamelotLetter {
    A,
    B,
}

impl Camelot {
    pub fn new(number: u8, letter: CamelotLetter) -> Self {
        debug_assert!((1..=12).contains(&number));
        Self { number, letter }
    }

    /// The wheel's three neighbours: one step anticlockwise, one step clockwise,
    /// and the relative major/minor (same number, other letter). Combined with the
    /// cell itself this is `camelot_compatible` (four cells total, per the glossary).
    pub fn compatible(self) -> [Camelot; 4] {
        let anticlockwise = Camelot::new(wheel_step(self.number, -1), self.letter);
        let clockwise = Camelot::new(wheel_step(self.number, 1), self.letter);
        let relative = Camelot::new(self.number, self.letter.other());
        [self, anticlockwise, clockwise, relative]
    }

    pub fn to_code(self) -> String {
        format!("{}{}", self.number, self.letter.as_str())
    }
}

impl CamelotLetter {
    fn other(self) -> Self {
        match self {
            CamelotLetter::A => CamelotLetter::B,
            CamelotLetter::B => CamelotLetter::A,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            CamelotLetter::A => "A",
            CamelotLetter::B => "B",
        }
    }
}

fn wheel_step(number: u8, delta: i8) -> u8 {
    let zero_based = (number as i16 - 1 + delta as i16).rem_euclid(12);
    (zero_based + 1) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mood {
    Euphoric,
    Driving,
    Dark,
    Chill,
    Melancholic,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    Intro,
    Verse,
    Chorus,
    Bridge,
    Instrumental,
    Break,
    BuildUp,
    Drop,
    Outro,
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start_ms: i64,
    pub end_ms: i64,
    pub has_vocals: bool,
}

impl Segment {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Marker: where did the final timeline come from. Segregates the labeler's
/// non-deterministic contribution so a re-run with the labeler disabled is
/// reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimelineSource {
    Analyzer,
    Labeler,
}

/// A stage of the per-job progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    Decoding,
    Rhythm,
    Tonal,
    Structure,
    Cues,
    Done,
    Failed,
}

impl JobPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Decoding => "DECODING",
            JobPhase::Rhythm => "RHYTHM",
            JobPhase::Tonal => "TONAL",
            JobPhase::Structure => "STRUCTURE",
            JobPhase::Cues => "CUES",
            JobPhase::Done => "DONE",
            JobPhase::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub start_ms: i64,
    pub end_ms: i64,
    /// Ordinal 1..=10 desirability score.
    pub score: u8,
}

/// A labeler-supplied point of interest (e.g. a vocal ad-lib, an FX riser) that
/// doesn't fit the structural segment model but is still worth cueing against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DjEvent {
    pub kind: String,
    pub at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub numerator: u8,
    pub denominator: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BpmRange {
    pub low: f64,
    pub high: f64,
}

impl BpmRange {
    /// Default +/-3% window around a detected BPM.
    pub fn around(bpm: f64) -> Self {
        Self {
            low: bpm * 0.97,
            high: bpm * 1.03,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub hash: TrackHash,
    pub duration_ms: i64,
    pub bpm: f64,
    pub bpm_range: BpmRange,
    pub meter: Meter,
    pub beats_ms: Vec<i64>,
    pub downbeats_ms: Vec<i64>,
    pub phrases_ms: Vec<i64>,
    pub key: Option<Key>,
    pub key_strength: f64,
    pub camelot: Camelot,
    pub camelot_compatible: [Camelot; 4],
    pub energy: f64,
    pub danceability: f64,
    pub mood: Mood,
    pub loudness_integrated_dbfs: f64,
    pub loudness_range_lu: f64,
    pub dynamic_complexity: f64,
    pub beats_loudness: Vec<f64>,
    pub timeline: Vec<Segment>,
    pub timeline_source: TimelineSource,
    pub loops: Vec<Loop>,
    pub events: Vec<DjEvent>,
}

impl TrackDescriptor {
    /// Find the segment containing `point_ms`, clamping to the last segment if
    /// `point_ms == duration_ms` exactly.
    pub fn segment_at(&self, point_ms: i64) -> Option<&Segment> {
        self.timeline
            .iter()
            .find(|s| point_ms >= s.start_ms && point_ms < s.end_ms)
            .or_else(|| self.timeline.last().filter(|_| point_ms == self.duration_ms))
    }

    pub fn bar_ms(&self) -> f64 {
        (60_000.0 / self.bpm) * 4.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    IntroSimple,
    DropSwap,
    ImpactEntry,
    OutroFade,
    BreakdownEntry,
    LoopAnchor,
    EventSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CueType {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VocalType {
    None,
    MelodicVocal,
    RhythmicChant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreqFocus {
    Low,
    Mid,
    High,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    Linear,
    BassSwap,
    Cut,
    PowerMix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopKind {
    OneBar,
    FourBar,
    EightBar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuePoint {
    pub track_hash: TrackHash,
    pub point_ms: i64,
    pub cue_type: CueType,
    pub strategy: Strategy,
    pub score: u8,
    pub safe_duration_ms: Option<i64>,
    pub has_vocal_overlap: bool,
    pub aligned_to_phrase: bool,
    pub aligned_to_bar: bool,
    pub aligned_to_8bar: bool,
    pub section_kind: SegmentKind,
    pub vocal_type: VocalType,
    pub freq_focus: FreqFocus,
    pub suggested_curve: Curve,
    pub loop_length_ms: Option<i64>,
    pub loop_kind: Option<LoopKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixPlanEntry {
    pub track_hash: TrackHash,
    pub duration_ms: i64,
    pub best_entries: Vec<CuePoint>,
    pub best_exits: Vec<CuePoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionType {
    LongMix,
    QuickMix,
    DoubleDrop,
    LoopMix,
    Cut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub exit_cue: CuePoint,
    pub entry_cue: CuePoint,
    pub score: u8,
    pub transition_type: TransitionType,
    pub suggested_curve: Curve,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedTrack {
    pub track_hash: TrackHash,
    pub transition_from_previous: Option<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedSession {
    pub tracks: Vec<SequencedTrack>,
    pub avg_transition_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camelot_compatible_wraps_around_wheel() {
        let c = Camelot::new(1, CamelotLetter::A);
        let compatible = c.compatible();
        assert_eq!(compatible[0], c);
        // anticlockwise from 1 wraps to 12
        assert_eq!(compatible[1], Camelot::new(12, CamelotLetter::A));
        assert_eq!(compatible[2], Camelot::new(2, CamelotLetter::A));
        assert_eq!(compatible[3], Camelot::new(1, CamelotLetter::B));
    }

    #[test]
    fn camelot_code_formats_number_and_letter() {
        assert_eq!(Camelot::new(8, CamelotLetter::B).to_code(), "8B");
    }

    #[test]
    fn pitch_class_round_trips_through_index() {
        for (i, pc) in PitchClass::ALL.iter().enumerate() {
            assert_eq!(PitchClass::from_index(i), *pc);
            assert_eq!(pc.index(), i);
        }
    }
}
