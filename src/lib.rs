pub mod analysis;
pub mod config;
pub mod cues;
pub mod db;
pub mod decoder;
pub mod errors;
pub mod labeler;
pub mod pipeline;
pub mod scanner;
pub mod sequence;
pub mod transition;
pub mod types;

/// Audio file extensions we support, bounded by the `symphonia` features
/// actually enabled in Cargo.toml (wav, pcm, adpcm, flac, mp3, ogg, vorbis).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "wav"];

/// Application name for XDG paths
pub const APP_NAME: &str = "autodj";
