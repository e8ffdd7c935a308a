//! Per-track analysis orchestration: decode, then rhythm, tonal, loudness
//! and structural analysis in a fixed order, producing
//! one [`TrackDescriptor`]. Dispatch over a dedicated `rayon` thread pool
//! sized from [`EngineConfig::effective_jobs`].

pub mod loudness;
pub mod rhythm;
pub mod structure;
pub mod tonal;

use rayon::{ThreadPoolBuilder, prelude::*};
use std::path::Path;

use crate::config::EngineConfig;
use crate::errors::AnalysisError;
use crate::labeler::{LabelRequest, LabelerAdapter};
use crate::types::{
    BpmRange, Camelot, CamelotLetter, DjEvent, JobPhase, Loop, Segment, TimelineSource, TrackDescriptor, TrackHash,
};
use crate::{decoder, errors::DecodeError};

/// Analyze one track's decoded PCM into a complete [`TrackDescriptor`].
///
/// `labeler` is consulted after the analyzer's own structural pass; a
/// disabled adapter ([`LabelerAdapter::disabled`]) makes this equivalent to
/// core-only analysis. Labeler I/O failures are logged and otherwise ignored;
/// they never fail the job. `on_phase` fires once per
/// stage, feeding the job's progress stream.
pub fn analyze(
    path: &Path,
    hash: TrackHash,
    config: &EngineConfig,
    labeler: &LabelerAdapter,
    mut on_phase: impl FnMut(JobPhase),
) -> Result<TrackDescriptor, AnalysisError> {
    on_phase(JobPhase::Decoding);
    let mut pcm = decoder::decode(path, config.sample_rate)?;
    if config.normalize.is_enabled() {
        pcm.normalize_to(config.normalize.target_dbfs());
    }

    let duration_ms = pcm.duration_ms();
    if duration_ms <= 0 {
        return Err(AnalysisError::Decode(DecodeError::Failed("zero-length audio".into())));
    }

    on_phase(JobPhase::Rhythm);
    let rhythm = if config.disable.bpm {
        rhythm::RhythmDescriptor {
            bpm: 120.0,
            beats_ms: vec![0],
            downbeats_ms: vec![0],
            meter: crate::types::Meter { numerator: 4, denominator: 4 },
            phrases_ms: vec![0],
            beats_loudness: vec![0.0],
        }
    } else {
        rhythm::analyze(&pcm)?
    };

    on_phase(JobPhase::Tonal);
    let tonal = if config.disable.tonal {
        let camelot = Camelot::new(8, CamelotLetter::B);
        tonal::TonalDescriptor { key: None, key_strength: 0.0, camelot_compatible: camelot.compatible(), camelot }
    } else {
        tonal::analyze(&pcm)
    };

    let loudness = loudness::analyze(&pcm, rhythm.bpm);

    on_phase(JobPhase::Structure);
    let vocal_evidence = structure::estimate_vocal_evidence(&pcm.samples, pcm.sample_rate, duration_ms);
    let mut raw_timeline = structure::segment(&pcm.samples, pcm.sample_rate, duration_ms);
    let mut vocal_activity = vocal_evidence.clone();
    let mut loops: Vec<Loop> = Vec::new();
    let mut events: Vec<DjEvent> = Vec::new();
    let mut timeline_source = TimelineSource::Analyzer;

    if labeler.is_enabled() {
        let request = LabelRequest { duration_ms, bpm: rhythm.bpm, vocal_activity_hint: vocal_evidence.clone() };
        match labeler.label(&request) {
            Ok(Some(outcome)) => {
                if !outcome.segments.is_empty() {
                    raw_timeline = outcome
                        .segments
                        .iter()
                        .map(|&(kind, start_ms, end_ms, has_vocals)| Segment { kind, start_ms, end_ms, has_vocals })
                        .collect();
                    timeline_source = TimelineSource::Labeler;
                }
                let accepted_blocks = structure::filter_vocal_blocks(&outcome.vocal_blocks, &vocal_evidence);
                vocal_activity.extend(accepted_blocks);
                loops = outcome
                    .loops
                    .into_iter()
                    .map(|(start_ms, end_ms, score)| Loop { start_ms, end_ms, score })
                    .collect();
                events = outcome.events.into_iter().map(|(kind, at_ms)| DjEvent { kind, at_ms }).collect();
            }
            Ok(None) => {}
            Err(e) => log::warn!("labeler request failed for {}: {}", hash, e),
        }
    }

    let timeline = structure::reconcile(raw_timeline, duration_ms, &vocal_activity, rhythm.bpm);

    Ok(TrackDescriptor {
        hash,
        duration_ms,
        bpm: rhythm.bpm,
        bpm_range: BpmRange::around(rhythm.bpm),
        meter: rhythm.meter,
        beats_ms: rhythm.beats_ms,
        downbeats_ms: rhythm.downbeats_ms,
        phrases_ms: rhythm.phrases_ms,
        key: tonal.key,
        key_strength: tonal.key_strength,
        camelot: tonal.camelot,
        camelot_compatible: tonal.camelot_compatible,
        energy: loudness.energy,
        danceability: loudness.danceability,
        mood: loudness.mood,
        loudness_integrated_dbfs: loudness.loudness_integrated_dbfs,
        loudness_range_lu: loudness.loudness_range_lu,
        dynamic_complexity: loudness.dynamic_complexity,
        beats_loudness: rhythm.beats_loudness,
        timeline,
        timeline_source,
        loops,
        events,
    })
}

/// One unit of work: a file to decode plus its precomputed content hash.
pub struct AnalysisJob {
    pub path: std::path::PathBuf,
    pub hash: TrackHash,
}

/// Analyze a batch of tracks across a bounded worker pool, one descriptor
/// (or error) per job, in input order. Each track is independent; a failure
/// on one does not stop the others: analysis errors are per-track.
///
/// `phase_tx`, if given, receives a `(hash, phase)` message from whichever
/// worker thread reaches that stage; the channel lets a single consumer
/// (e.g. the pipeline's job-row writer) observe per-track phase transitions
/// without the analysis pool itself touching shared, non-`Sync` state like a
/// database connection.
pub fn analyze_batch(
    jobs: &[AnalysisJob],
    config: &EngineConfig,
    labeler: &LabelerAdapter,
    phase_tx: Option<std::sync::mpsc::Sender<(TrackHash, crate::types::JobPhase)>>,
    mut on_progress: impl FnMut(usize, usize) + Send,
) -> Vec<(TrackHash, Result<TrackDescriptor, AnalysisError>)> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(config.effective_jobs())
        .build()
        .expect("failed to build analysis thread pool");

    let total = jobs.len();
    let completed = std::sync::atomic::AtomicUsize::new(0);
    // One cloned sender per job, consumed by value in the parallel iterator:
    // `mpsc::Sender` is `Send` but not `Sync`, so each worker needs its own
    // owned handle rather than a shared reference into a common `Vec`.
    let senders: Vec<_> = jobs.iter().map(|_| phase_tx.clone()).collect();

    pool.install(|| {
        jobs.par_iter()
            .zip(senders.into_par_iter())
            .map(|(job, tx)| {
                let result = analyze(&job.path, job.hash.clone(), config, labeler, |phase| {
                    if let Some(tx) = &tx {
                        tx.send((job.hash.clone(), phase)).ok();
                    }
                });
                let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                (job.hash.clone(), result, done)
            })
            .collect::<Vec<_>>()
    })
    .into_iter()
    .map(|(hash, result, done)| {
        on_progress(done, total);
        (hash, result)
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_batch_reports_progress_for_every_job() {
        let config = EngineConfig::default();
        let jobs: Vec<AnalysisJob> = Vec::new();
        let labeler = LabelerAdapter::disabled();
        let mut calls = 0;
        let results = analyze_batch(&jobs, &config, &labeler, None, |_, _| calls += 1);
        assert!(results.is_empty());
        assert_eq!(calls, 0);
    }
}
