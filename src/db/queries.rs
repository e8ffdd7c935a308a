//! Prepared-statement queries over the `descriptors`, `mix_plans` and
//! `jobs` tables, in a plain upsert/query-map style.

use rusqlite::{params, OptionalExtension};

use super::models::{JobRecord, JobStatus};
use super::{Database, DbError, Result};
use crate::types::{MixPlanEntry, TrackDescriptor, TrackHash};

/// Upsert an immutable descriptor keyed by content hash. Re-analyzing the
/// same hash simply overwrites with an identical document, since analysis
/// is deterministic for a given set of inputs.
pub fn upsert_descriptor(db: &Database, descriptor: &TrackDescriptor) -> Result<()> {
    let json = serde_json::to_string(descriptor)?;
    db.conn.execute(
        "INSERT INTO descriptors (hash, descriptor) VALUES (?1, ?2)
         ON CONFLICT(hash) DO UPDATE SET descriptor = excluded.descriptor",
        params![descriptor.hash, json],
    )?;
    Ok(())
}

pub fn get_descriptor(db: &Database, hash: &str) -> Result<Option<TrackDescriptor>> {
    let json: Option<String> = db
        .conn
        .query_row("SELECT descriptor FROM descriptors WHERE hash = ?1", params![hash], |row| row.get(0))
        .optional()?;
    match json {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn list_descriptors(db: &Database) -> Result<Vec<TrackDescriptor>> {
    let mut stmt = db.conn.prepare("SELECT descriptor FROM descriptors ORDER BY hash")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut descriptors = Vec::new();
    for row in rows {
        descriptors.push(serde_json::from_str(&row?)?);
    }
    Ok(descriptors)
}

/// Cues are a pure function of a descriptor, so `mix_plans` is
/// keyed off the same hash and overwritten whenever its descriptor is.
pub fn upsert_mix_plan(db: &Database, plan: &MixPlanEntry) -> Result<()> {
    let json = serde_json::to_string(plan)?;
    db.conn.execute(
        "INSERT INTO mix_plans (hash, plan) VALUES (?1, ?2)
         ON CONFLICT(hash) DO UPDATE SET plan = excluded.plan",
        params![plan.track_hash, json],
    )?;
    Ok(())
}

pub fn get_mix_plan(db: &Database, hash: &str) -> Result<Option<MixPlanEntry>> {
    let json: Option<String> = db
        .conn
        .query_row("SELECT plan FROM mix_plans WHERE hash = ?1", params![hash], |row| row.get(0))
        .optional()?;
    match json {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
    let status: String = row.get("status")?;
    Ok(JobRecord {
        id: row.get("id")?,
        hash: row.get("hash")?,
        status: JobStatus::parse(&status),
        progress: row.get("progress")?,
        current_step: row.get("current_step")?,
        error: row.get("error")?,
        result_hash: row.get("result_hash")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

/// Insert a pending job for `hash`, or return the id of the existing one —
/// a `(hash)` unique constraint collapses duplicate submissions. Returns
/// the job id either way.
pub fn upsert_pending_job(db: &Database, hash: &str) -> Result<i64> {
    db.conn.execute(
        "INSERT INTO jobs (hash) VALUES (?1)
         ON CONFLICT(hash) DO UPDATE SET updated_at = datetime('now')",
        params![hash],
    )?;
    db.conn
        .query_row("SELECT id FROM jobs WHERE hash = ?1", params![hash], |row| row.get(0))
        .map_err(DbError::from)
}

pub fn get_job(db: &Database, id: i64) -> Result<Option<JobRecord>> {
    db.conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], row_to_job)
        .optional()
        .map_err(DbError::from)
}

pub fn get_job_by_hash(db: &Database, hash: &TrackHash) -> Result<Option<JobRecord>> {
    db.conn
        .query_row("SELECT * FROM jobs WHERE hash = ?1", params![hash], row_to_job)
        .optional()
        .map_err(DbError::from)
}

pub fn list_jobs(db: &Database) -> Result<Vec<JobRecord>> {
    let mut stmt = db.conn.prepare("SELECT * FROM jobs ORDER BY id")?;
    let rows = stmt.query_map([], row_to_job)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(DbError::from)
}

/// Advance a job into `processing` with a progress/step update —
/// a `{phase, progress}` pair, persisted alongside the in-memory stream.
pub fn mark_processing(db: &Database, id: i64, progress: u8, current_step: &str) -> Result<()> {
    db.conn.execute(
        "UPDATE jobs SET status = 'processing', progress = ?2, current_step = ?3, updated_at = datetime('now')
         WHERE id = ?1",
        params![id, progress, current_step],
    )?;
    Ok(())
}

pub fn mark_completed(db: &Database, id: i64, result_hash: &TrackHash) -> Result<()> {
    db.conn.execute(
        "UPDATE jobs SET status = 'completed', progress = 100, current_step = 'DONE', result_hash = ?2,
         updated_at = datetime('now'), completed_at = datetime('now') WHERE id = ?1",
        params![id, result_hash],
    )?;
    Ok(())
}

pub fn mark_failed(db: &Database, id: i64, error: &str) -> Result<()> {
    db.conn.execute(
        "UPDATE jobs SET status = 'failed', error = ?2, updated_at = datetime('now'), completed_at = datetime('now')
         WHERE id = ?1",
        params![id, error],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BpmRange, Camelot, CamelotLetter, Meter, Mood, TimelineSource};

    fn sample_descriptor(hash: &str) -> TrackDescriptor {
        TrackDescriptor {
            hash: hash.into(),
            duration_ms: 180_000,
            bpm: 120.0,
            bpm_range: BpmRange::around(120.0),
            meter: Meter { numerator: 4, denominator: 4 },
            beats_ms: vec![0, 500],
            downbeats_ms: vec![0],
            phrases_ms: vec![0],
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
            timeline: vec![],
            timeline_source: TimelineSource::Analyzer,
            loops: vec![],
            events: vec![],
        }
    }

    #[test]
    fn descriptor_round_trips_through_json_column() {
        let db = Database::open_in_memory().unwrap();
        let descriptor = sample_descriptor("abc123");
        upsert_descriptor(&db, &descriptor).unwrap();
        let fetched = get_descriptor(&db, "abc123").unwrap().unwrap();
        assert_eq!(fetched.hash, descriptor.hash);
        assert_eq!(fetched.bpm, descriptor.bpm);
    }

    #[test]
    fn upsert_descriptor_overwrites_same_hash() {
        let db = Database::open_in_memory().unwrap();
        let mut descriptor = sample_descriptor("abc123");
        upsert_descriptor(&db, &descriptor).unwrap();
        descriptor.bpm = 128.0;
        upsert_descriptor(&db, &descriptor).unwrap();
        assert_eq!(list_descriptors(&db).unwrap().len(), 1);
        assert_eq!(get_descriptor(&db, "abc123").unwrap().unwrap().bpm, 128.0);
    }

    #[test]
    fn duplicate_job_submissions_collapse_to_one_row() {
        let db = Database::open_in_memory().unwrap();
        let id1 = upsert_pending_job(&db, "abc123").unwrap();
        let id2 = upsert_pending_job(&db, "abc123").unwrap();
        assert_eq!(id1, id2);
        assert_eq!(list_jobs(&db).unwrap().len(), 1);
    }

    #[test]
    fn job_lifecycle_transitions_are_persisted() {
        let db = Database::open_in_memory().unwrap();
        let id = upsert_pending_job(&db, "abc123").unwrap();
        mark_processing(&db, id, 40, "RHYTHM").unwrap();
        let job = get_job(&db, id).unwrap().unwrap();
        assert_eq!(job.status.as_str(), "processing");
        assert_eq!(job.progress, 40);

        mark_completed(&db, id, &"abc123".to_string()).unwrap();
        let job = get_job(&db, id).unwrap().unwrap();
        assert_eq!(job.status.as_str(), "completed");
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn failed_job_records_error_message() {
        let db = Database::open_in_memory().unwrap();
        let id = upsert_pending_job(&db, "abc123").unwrap();
        mark_failed(&db, id, "decode failed: truncated stream").unwrap();
        let job = get_job(&db, id).unwrap().unwrap();
        assert_eq!(job.status.as_str(), "failed");
        assert_eq!(job.error.as_deref(), Some("decode failed: truncated stream"));
    }
}
