//! Job orchestration: ties the scanner, analyzer, cue planner and sequencer
//! together into one lifecycle — scan → analyze → cue →
//! (optionally) sequence — persisting a `job` row and emitting a
//! structured progress stream as it goes.
//!
//! This module owns the only database writes that happen mid-analysis; the
//! analysis pool itself only ever sends phase notifications over a channel
//! (see [`crate::analysis::analyze_batch`]), since `rusqlite::Connection`
//! is not `Sync` and cannot be touched from multiple worker threads at once.

use std::path::Path;
use std::sync::mpsc;

use crate::analysis::{self, AnalysisJob};
use crate::config::EngineConfig;
use crate::cues;
use crate::db::{self, Database};
use crate::errors::{ErrorKind, FailureRecord};
use crate::labeler::LabelerAdapter;
use crate::sequence::{self, PlanRequest};
use crate::types::{JobPhase, MixPlanEntry, SequencedSession, TrackDescriptor, TrackHash};

/// One update in the structured progress stream.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub job_id: i64,
    pub phase: JobPhase,
    pub progress: u8,
    pub message: String,
}

/// Coarse progress floor for each phase, used both for the in-memory stream
/// and the `jobs.progress` column. Cue planning and sequencing are cheap
/// relative to decode/DSP, so they get the tail of the range.
fn progress_floor(phase: JobPhase) -> u8 {
    match phase {
        JobPhase::Decoding => 5,
        JobPhase::Rhythm => 25,
        JobPhase::Tonal => 45,
        JobPhase::Structure => 65,
        JobPhase::Cues => 85,
        JobPhase::Done => 100,
        JobPhase::Failed => 100,
    }
}

/// The outcome of running one track through the full pipeline (minus
/// sequencing, which operates over a whole batch at once).
pub struct TrackResult {
    pub hash: TrackHash,
    pub job_id: i64,
    pub descriptor: Option<TrackDescriptor>,
    pub plan: Option<MixPlanEntry>,
    pub failure: Option<FailureRecord>,
}

/// Discover, analyze and plan cues for every audio file under `paths`,
/// persisting descriptors/plans/job status to `db` and reporting progress
/// through `on_progress`. This is the `scan`+`analyze`+`plan` pipeline spec
/// §2's OVERVIEW describes end to end; sequencing a session from the
/// resulting descriptors is a separate, explicit step ([`sequence_session`])
/// since it needs the whole batch rather than one track at a time.
pub fn process_library(
    db: &Database,
    paths: &[String],
    config: &EngineConfig,
    labeler: &LabelerAdapter,
    mut on_progress: impl FnMut(ProgressEvent),
) -> Result<Vec<TrackResult>, db::DbError> {
    let scan = crate::scanner::scan(db, paths).map_err(|e| db::DbError::Migration(e.to_string()))?;

    let jobs: Vec<AnalysisJob> = scan
        .tracks
        .iter()
        .map(|t| AnalysisJob { path: t.path.clone(), hash: t.hash.clone() })
        .collect();
    let job_ids: std::collections::HashMap<TrackHash, i64> =
        scan.tracks.iter().map(|t| (t.hash.clone(), t.job_id)).collect();

    for (hash, job_id) in &job_ids {
        db::queries::mark_processing(db, *job_id, progress_floor(JobPhase::Decoding), JobPhase::Decoding.as_str())?;
        on_progress(ProgressEvent {
            job_id: *job_id,
            phase: JobPhase::Decoding,
            progress: progress_floor(JobPhase::Decoding),
            message: format!("queued {}", hash),
        });
    }

    let (phase_tx, phase_rx) = mpsc::channel();
    let results =
        analysis::analyze_batch(&jobs, config, labeler, Some(phase_tx), |_done, _total| {});

    // Drain phase notifications emitted while the pool ran; best-effort,
    // since the receiver only reflects whatever arrived before the pool
    // finished (the pool itself has already joined by this point).
    while let Ok((hash, phase)) = phase_rx.try_recv() {
        if let Some(&job_id) = job_ids.get(&hash) {
            db::queries::mark_processing(db, job_id, progress_floor(phase), phase.as_str()).ok();
            on_progress(ProgressEvent { job_id, phase, progress: progress_floor(phase), message: hash.clone() });
        }
    }

    let mut track_results = Vec::with_capacity(results.len());
    for (hash, outcome) in results {
        let job_id = *job_ids.get(&hash).expect("every analyzed hash has a job row");
        match outcome {
            Ok(descriptor) => {
                on_progress(ProgressEvent {
                    job_id,
                    phase: JobPhase::Cues,
                    progress: progress_floor(JobPhase::Cues),
                    message: format!("planning cues for {}", hash),
                });
                let plan = cues::plan(&descriptor);

                db::queries::upsert_descriptor(db, &descriptor)?;
                db::queries::upsert_mix_plan(db, &plan)?;
                db::queries::mark_completed(db, job_id, &hash)?;

                on_progress(ProgressEvent {
                    job_id,
                    phase: JobPhase::Done,
                    progress: progress_floor(JobPhase::Done),
                    message: format!("done: {}", hash),
                });

                track_results.push(TrackResult {
                    hash,
                    job_id,
                    descriptor: Some(descriptor),
                    plan: Some(plan),
                    failure: None,
                });
            }
            Err(e) => {
                let failure = FailureRecord::new(ErrorKind::AnalysisFailed, e.to_string())
                    .with_track(hash.clone())
                    .with_phase("ANALYSIS");
                db::queries::mark_failed(db, job_id, &failure.message)?;

                on_progress(ProgressEvent {
                    job_id,
                    phase: JobPhase::Failed,
                    progress: progress_floor(JobPhase::Failed),
                    message: failure.message.clone(),
                });

                track_results.push(TrackResult { hash, job_id, descriptor: None, plan: None, failure: Some(failure) });
            }
        }
    }

    Ok(track_results)
}

/// Plan a DJ session over every descriptor already persisted in `db` (spec
/// §4.8). Returns `None` if fewer than two tracks have usable descriptors.
pub fn sequence_session(
    db: &Database,
    start: Option<&TrackHash>,
    target_len: Option<usize>,
) -> Result<Option<SequencedSession>, db::DbError> {
    let descriptors = db::queries::list_descriptors(db)?;
    let mut plans = Vec::with_capacity(descriptors.len());
    for d in &descriptors {
        match db::queries::get_mix_plan(db, &d.hash)? {
            Some(plan) => plans.push(plan),
            None => plans.push(cues::plan(d)),
        }
    }

    let request = PlanRequest { descriptors: &descriptors, plans: &plans, start, target_len, deadline: None };
    Ok(sequence::plan(&request))
}

/// Analyze a single already-discovered file path without touching the
/// scanner (used by the CLI's one-shot `analyze` subcommand).
pub fn analyze_one(
    db: &Database,
    path: &Path,
    config: &EngineConfig,
    labeler: &LabelerAdapter,
    mut on_progress: impl FnMut(ProgressEvent),
) -> Result<TrackDescriptor, crate::errors::EngineError> {
    let hash = crate::scanner::hash_file(path).map_err(|e| {
        crate::errors::EngineError::Decode(crate::errors::DecodeError::Io(e))
    })?;
    let job_id = db::queries::upsert_pending_job(db, &hash)?;

    let descriptor = analysis::analyze(path, hash.clone(), config, labeler, |phase| {
        db::queries::mark_processing(db, job_id, progress_floor(phase), phase.as_str()).ok();
        on_progress(ProgressEvent { job_id, phase, progress: progress_floor(phase), message: hash.clone() });
    })?;

    let plan = cues::plan(&descriptor);
    db::queries::upsert_descriptor(db, &descriptor)?;
    db::queries::upsert_mix_plan(db, &plan)?;
    db::queries::mark_completed(db, job_id, &hash)?;
    on_progress(ProgressEvent { job_id, phase: JobPhase::Done, progress: 100, message: format!("done: {}", hash) });

    Ok(descriptor)
}
