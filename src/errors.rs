//! Top-level error type, composed from stage-local `thiserror` enums.
//!
//! Each concern gets its own enum (decode, analysis, cue planning, scoring,
//! sequencing, labeler, db, config); `EngineError` unifies them via `#[from]`
//! so the CLI can match on one type while stage modules stay decoupled.

use thiserror::Error;

use crate::types::TrackHash;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported or truncated audio stream: {0}")]
    Failed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("rhythm analysis failed: {0}")]
    Rhythm(String),
    #[error("tonal analysis failed: {0}")]
    Tonal(String),
}

#[derive(Error, Debug)]
pub enum LabelerError {
    #[error("labeler request timed out")]
    Timeout,
    #[error("labeler rate limit exhausted, retry later")]
    RateLimited,
    #[error("labeler response failed schema validation: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("no feasible sequence: fewer than two usable tracks")]
    Infeasible,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error kind taxonomy, independent of the Rust type that produced them —
/// used to populate the `{kind, message, track_hash?, phase?}` job failure record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DecodeFailed,
    AnalysisFailed,
    LabelerTimeout,
    LabelerRateLimited,
    LabelerRejected,
    PlanInfeasible,
    Cancelled,
    ConfigInvalid,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DecodeFailed => "DECODE_FAILED",
            Self::AnalysisFailed => "ANALYSIS_FAILED",
            Self::LabelerTimeout => "LABELER_TIMEOUT",
            Self::LabelerRateLimited => "LABELER_RATE_LIMITED",
            Self::LabelerRejected => "LABELER_REJECTED",
            Self::PlanInfeasible => "PLAN_INFEASIBLE",
            Self::Cancelled => "CANCELLED",
            Self::ConfigInvalid => "CONFIG_INVALID",
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("{0}")]
    Analysis(#[from] AnalysisError),
    #[error("{0}")]
    Labeler(#[from] LabelerError),
    #[error("{0}")]
    Plan(#[from] PlanError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Db(#[from] crate::db::DbError),
    #[error("job cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) => ErrorKind::DecodeFailed,
            Self::Analysis(_) => ErrorKind::AnalysisFailed,
            Self::Labeler(LabelerError::Timeout) => ErrorKind::LabelerTimeout,
            Self::Labeler(LabelerError::RateLimited) => ErrorKind::LabelerRateLimited,
            Self::Labeler(LabelerError::Rejected(_)) => ErrorKind::LabelerRejected,
            Self::Plan(_) => ErrorKind::PlanInfeasible,
            Self::Config(_) => ErrorKind::ConfigInvalid,
            Self::Db(_) => ErrorKind::AnalysisFailed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// The user-visible failure record attached to a job.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub track_hash: Option<TrackHash>,
    pub phase: Option<&'static str>,
}

impl FailureRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            track_hash: None,
            phase: None,
        }
    }

    pub fn with_track(mut self, hash: TrackHash) -> Self {
        self.track_hash = Some(hash);
        self
    }

    pub fn with_phase(mut self, phase: &'static str) -> Self {
        self.phase = Some(phase);
        self
    }
}
