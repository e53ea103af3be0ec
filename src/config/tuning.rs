//! Runtime tuning
//!
//! Microphone gain and the stage timeout are persisted to the settings file
//! whenever they change. Confidence thresholds, gap acceptance, dynamic gain
//! and the filter toggle are session-only and reset on restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::Config;
use crate::audio::{DynamicGainConfig, software_gain};
use crate::{Error, Result};

/// Default minimum confidence for category and subcategory phrases
pub const DEFAULT_CATEGORY_THRESHOLD: f32 = 0.15;

/// Default minimum confidence for target phrases
pub const DEFAULT_COMMAND_THRESHOLD: f32 = 0.12;

/// Shortest accepted stage timeout
pub const MIN_COMMAND_TIMEOUT_MS: u64 = 1_000;

/// Longest accepted stage timeout
pub const MAX_COMMAND_TIMEOUT_MS: u64 = 30_000;

/// Tuning shared between the command surface and the pipeline
pub type SharedTuning = Arc<RwLock<Tuning>>;

/// Target-stage acceptance by margin over the runner-up
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapAccept {
    pub enabled: bool,
    /// Lowest top confidence that can be gap-accepted
    pub floor: f32,
    /// Required lead over the second hypothesis
    pub gap: f32,
    /// Skip target-stage detection until speech is heard
    pub require_speech: bool,
}

impl Default for GapAccept {
    fn default() -> Self {
        Self {
            enabled: true,
            floor: 0.12,
            gap: 0.08,
            require_speech: false,
        }
    }
}

/// Live tuning parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Tuning {
    pub category_threshold: f32,
    pub command_threshold: f32,
    pub gap_accept: GapAccept,
    pub dynamic_gain: DynamicGainConfig,
    pub command_timeout: Duration,
    pub filters: bool,
    pub mic_gain_percent: u8,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            category_threshold: DEFAULT_CATEGORY_THRESHOLD,
            command_threshold: DEFAULT_COMMAND_THRESHOLD,
            gap_accept: GapAccept::default(),
            dynamic_gain: DynamicGainConfig::default(),
            command_timeout: Duration::from_millis(super::DEFAULT_COMMAND_TIMEOUT_MS),
            filters: true,
            mic_gain_percent: crate::audio::DEFAULT_GAIN_PERCENT,
        }
    }
}

impl Tuning {
    /// Start from configuration, then apply persisted settings
    #[must_use]
    pub fn from_config(config: &Config, persisted: &PersistedSettings) -> Self {
        let mut tuning = Self {
            category_threshold: config.voice.category_threshold,
            command_threshold: config.voice.command_threshold,
            command_timeout: Duration::from_millis(config.voice.command_timeout_ms),
            filters: config.audio.filters,
            mic_gain_percent: config.audio.mic_gain_percent,
            ..Self::default()
        };

        if let Some(percent) = persisted.mic_gain_percent {
            tuning.mic_gain_percent = percent.min(100);
        }
        if let Some(ms) = persisted.command_timeout_ms {
            if let Err(e) = tuning.set_command_timeout_ms(ms) {
                tracing::warn!(error = %e, "ignoring persisted command timeout");
            }
        }
        tuning
    }

    /// Software gain multiplier for the current microphone gain
    #[must_use]
    pub fn software_gain(&self) -> f32 {
        software_gain(self.mic_gain_percent)
    }

    /// # Errors
    ///
    /// Returns error if `ms` is outside 1000-30000
    pub fn set_command_timeout_ms(&mut self, ms: u64) -> Result<()> {
        if !(MIN_COMMAND_TIMEOUT_MS..=MAX_COMMAND_TIMEOUT_MS).contains(&ms) {
            return Err(Error::InvalidArgument(format!(
                "timeout must be {MIN_COMMAND_TIMEOUT_MS}-{MAX_COMMAND_TIMEOUT_MS} ms"
            )));
        }
        self.command_timeout = Duration::from_millis(ms);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns error if `percent` is above 100
    pub fn set_mic_gain_percent(&mut self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(Error::InvalidArgument("gain must be 0-100".to_string()));
        }
        self.mic_gain_percent = percent;
        Ok(())
    }

    /// Settings that survive a restart
    #[must_use]
    pub fn persisted(&self) -> PersistedSettings {
        PersistedSettings {
            mic_gain_percent: Some(self.mic_gain_percent),
            command_timeout_ms: u64::try_from(self.command_timeout.as_millis()).ok(),
        }
    }
}

/// Parse a confidence value in 0.0-1.0
///
/// # Errors
///
/// Returns error if the value is not a number in range
pub fn parse_unit(value: &str) -> Result<f32> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|v| (0.0..=1.0).contains(v))
        .ok_or_else(|| Error::InvalidArgument(format!("expected 0.0-1.0, got '{}'", value.trim())))
}

/// On-disk tuning that persists across restarts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic_gain_percent: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,
}

/// Reads and writes [`PersistedSettings`]
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted settings; a missing or corrupt file yields defaults
    #[must_use]
    pub fn load(&self) -> PersistedSettings {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return PersistedSettings::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read settings");
                return PersistedSettings::default();
            }
        };

        toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to parse settings, using defaults"
            );
            PersistedSettings::default()
        })
    }

    /// Write the persistent subset of `tuning`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, tuning: &Tuning) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string(&tuning.persisted())?;
        std::fs::write(&self.path, content)?;
        tracing::debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}
