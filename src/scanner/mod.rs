//! File discovery and content hashing: the engine derives its own stable
//! content hash rather than trusting a caller-supplied id.
//!
//! Walks the given paths for supported audio files, hashes each one's bytes
//! with BLAKE3, and upserts a `job` record per file so duplicate submissions
//! of the same bytes collapse onto one job via a `(hash)` unique constraint.

pub mod metadata;

use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::db::Database;
use crate::types::TrackHash;
use crate::SUPPORTED_EXTENSIONS;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Db(#[from] crate::db::DbError),
}

/// A discovered file paired with its content hash and enqueued job id.
pub struct DiscoveredTrack {
    pub path: PathBuf,
    pub hash: TrackHash,
    pub job_id: i64,
    pub title: Option<String>,
}

pub struct ScanResult {
    pub tracks: Vec<DiscoveredTrack>,
    pub scanned: u64,
    pub errors: u64,
}

/// Walk `paths` for supported audio files, hash each by content, and upsert
/// a pending job per hash. Returns one [`DiscoveredTrack`] per file that
/// hashed successfully, in discovery order.
pub fn scan(db: &Database, paths: &[String]) -> Result<ScanResult, ScanError> {
    let mut audio_files: Vec<walkdir::DirEntry> = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
            if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                audio_files.push(entry);
            }
        }
    }

    let pb = ProgressBar::new(audio_files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message("hashing...");

    let mut result = ScanResult { tracks: Vec::new(), scanned: 0, errors: 0 };

    for entry in &audio_files {
        result.scanned += 1;
        match hash_file(entry.path()) {
            Ok(hash) => {
                let tags = metadata::read_tags(entry.path());
                let job_id = crate::db::queries::upsert_pending_job(db, &hash)?;
                result.tracks.push(DiscoveredTrack {
                    path: entry.path().to_path_buf(),
                    hash,
                    job_id,
                    title: tags.title,
                });
            }
            Err(e) => {
                log::warn!("could not hash {}: {}", entry.path().display(), e);
                result.errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!("{} tracks discovered, {} errors", result.tracks.len(), result.errors));
    Ok(result)
}

/// Stable content hash for a file, used as the [`TrackHash`] everywhere
/// downstream: descriptor cache key, job unique constraint, transition memo.
pub fn hash_file(path: &Path) -> std::io::Result<TrackHash> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_file_is_stable_for_identical_bytes() {
        let dir = std::env::temp_dir().join(format!("autodj-scan-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.wav");
        std::fs::write(&path, b"identical content").unwrap();
        let h1 = hash_file(&path).unwrap();
        let h2 = hash_file(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn hash_file_differs_for_different_bytes() {
        let dir = std::env::temp_dir().join(format!("autodj-scan-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.wav");
        let b = dir.join("b.wav");
        std::fs::write(&a, b"content a").unwrap();
        std::fs::write(&b, b"content b").unwrap();
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }
}
