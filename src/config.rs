//! Layered configuration: defaults, overridden by a TOML file on disk,
//! overridden again by CLI flags. Covers sample rate, loudness
//! normalization, and per-stage disable flags.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

/// Resolve the default database path using the XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("autodj.db")
    } else {
        PathBuf::from("autodj.db")
    }
}

/// Resolve the default config file path (`<xdg-config>/autodj/config.toml`).
pub fn default_config_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("autodj.toml")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Normalize {
    Bool(bool),
    TargetLufs { target_lufs: f64 },
}

impl Default for Normalize {
    fn default() -> Self {
        Normalize::Bool(false)
    }
}

impl Normalize {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Normalize::Bool(false))
    }

    pub fn target_dbfs(&self) -> f64 {
        match self {
            Normalize::Bool(_) => -14.0,
            Normalize::TargetLufs { target_lufs } => *target_lufs,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DisableFlags {
    #[serde(default)]
    pub bpm: bool,
    #[serde(default)]
    pub tonal: bool,
    #[serde(default)]
    pub cues: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub normalize: Normalize,
    pub disable: DisableFlags,
    /// Worker pool size for per-track analysis; 0 means "hardware parallelism".
    pub jobs: usize,
    pub labeler_endpoint: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            normalize: Normalize::default(),
            disable: DisableFlags::default(),
            jobs: 0,
            labeler_endpoint: None,
        }
    }
}

impl EngineConfig {
    /// Load from `path` if it exists, falling back to defaults; the caller
    /// applies CLI-flag overrides on top of the returned value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            self.jobs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_sane_sample_rate() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.sample_rate, 44_100);
        assert!(!cfg.normalize.is_enabled());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = EngineConfig::load(Path::new("/nonexistent/autodj.toml")).unwrap();
        assert_eq!(cfg.sample_rate, 44_100);
    }

    #[test]
    fn invalid_toml_is_config_invalid() {
        let dir = std::env::temp_dir().join(format!("autodj-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "sample_rate = [not valid").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = EngineConfig {
            sample_rate: 48_000,
            normalize: Normalize::TargetLufs { target_lufs: -16.0 },
            disable: DisableFlags { bpm: true, tonal: false, cues: false },
            jobs: 4,
            labeler_endpoint: Some("https://example.invalid/label".into()),
        };
        let text = toml::to_string(&cfg).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.sample_rate, 48_000);
        assert!(parsed.disable.bpm);
        assert_eq!(parsed.jobs, 4);
    }
}
