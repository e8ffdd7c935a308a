//! Row types for the `jobs` table. Descriptors themselves are stored as JSON
//! blobs keyed by hash (see `db::queries`) since [`crate::types::TrackDescriptor`]
//! is already the `serde` shape wanted on the wire.

use crate::types::TrackHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

/// A `job` record: `{id, hash, status, progress, current_step,
/// error?, result_hash?, created_at, updated_at, completed_at?}`. The
/// `(hash)` unique constraint (enforced in the schema) collapses duplicate
/// submissions of the same content onto one row.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub hash: TrackHash,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub error: Option<String>,
    pub result_hash: Option<TrackHash>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}
