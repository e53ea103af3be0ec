//! Voice snippet capture
//!
//! While enabled, a short pre-roll of raw microphone audio is kept so a
//! snippet can start slightly before the wake word. A snippet grows until
//! the dialogue ends or it hits its length cap, then lands in the snippet
//! directory as `<reason>_<id>_<label>.wav`.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::frame::SAMPLE_RATE;
use super::recorder::WavSink;
use crate::{Error, Result};

pub const DEFAULT_PRE_ROLL_MS: u64 = 800;
pub const MIN_PRE_ROLL_MS: u64 = 100;
pub const MAX_PRE_ROLL_MS: u64 = 5_000;

pub const DEFAULT_SNIP_MAX_MS: u64 = 6_000;
pub const MIN_SNIP_MAX_MS: u64 = 1_000;
pub const MAX_SNIP_MAX_MS: u64 = 30_000;

/// Longest label kept in a snippet file name
const MAX_LABEL_LEN: usize = 32;

/// Snippet capture shared by the recognition pipeline and the command surface
pub type SharedSnip = Arc<Mutex<SnipCapture>>;

/// What opened a snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnipReason {
    Wake,
    Manual,
}

impl SnipReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wake => "wake",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for SnipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snippet settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnipConfig {
    pub pre_roll_ms: u64,
    pub max_ms: u64,
    pub dir: PathBuf,
}

impl SnipConfig {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            pre_roll_ms: DEFAULT_PRE_ROLL_MS,
            max_ms: DEFAULT_SNIP_MAX_MS,
            dir: dir.into(),
        }
    }

    const fn pre_roll_samples(&self) -> usize {
        ms_to_samples(self.pre_roll_ms)
    }

    const fn max_samples(&self) -> usize {
        ms_to_samples(self.max_ms)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn ms_to_samples(ms: u64) -> usize {
    (ms * SAMPLE_RATE as u64 / 1_000) as usize
}

struct ActiveSnip {
    id: u64,
    reason: SnipReason,
    samples: Vec<i16>,
}

/// Pre-roll ring plus at most one snippet in progress
pub struct SnipCapture {
    enabled: bool,
    config: SnipConfig,
    pre_roll: VecDeque<i16>,
    active: Option<ActiveSnip>,
    next_id: u64,
    saved: u64,
    last_saved: Option<PathBuf>,
}

impl SnipCapture {
    #[must_use]
    pub fn new(config: SnipConfig) -> Self {
        Self {
            enabled: false,
            pre_roll: VecDeque::with_capacity(config.pre_roll_samples()),
            config,
            active: None,
            next_id: 1,
            saved: 0,
            last_saved: None,
        }
    }

    /// Shareable capture writing to `dir`
    #[must_use]
    pub fn shared(dir: impl Into<PathBuf>) -> SharedSnip {
        Arc::new(Mutex::new(Self::new(SnipConfig::new(dir))))
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn wake-triggered capture on or off; turning off drops any snippet
    /// in progress
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.reset();
        }
        tracing::info!(enabled, "snippet capture toggled");
    }

    #[must_use]
    pub const fn config(&self) -> &SnipConfig {
        &self.config
    }

    /// # Errors
    ///
    /// Returns error if `ms` is outside 100-5000
    pub fn set_pre_roll_ms(&mut self, ms: u64) -> Result<()> {
        if !(MIN_PRE_ROLL_MS..=MAX_PRE_ROLL_MS).contains(&ms) {
            return Err(Error::InvalidArgument(format!(
                "pre_ms must be {MIN_PRE_ROLL_MS}-{MAX_PRE_ROLL_MS}"
            )));
        }
        self.config.pre_roll_ms = ms;
        let excess = self.pre_roll.len().saturating_sub(self.config.pre_roll_samples());
        self.pre_roll.drain(..excess);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns error if `ms` is outside 1000-30000
    pub fn set_max_ms(&mut self, ms: u64) -> Result<()> {
        if !(MIN_SNIP_MAX_MS..=MAX_SNIP_MAX_MS).contains(&ms) {
            return Err(Error::InvalidArgument(format!(
                "max_ms must be {MIN_SNIP_MAX_MS}-{MAX_SNIP_MAX_MS}"
            )));
        }
        self.config.max_ms = ms;
        Ok(())
    }

    pub fn set_dir(&mut self, dir: impl Into<PathBuf>) {
        self.config.dir = dir.into();
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub const fn saved(&self) -> u64 {
        self.saved
    }

    #[must_use]
    pub fn last_saved(&self) -> Option<&Path> {
        self.last_saved.as_deref()
    }

    /// Take one chunk of raw audio
    ///
    /// Returns the file written if the snippet in progress hit its cap.
    ///
    /// # Errors
    ///
    /// Returns error if a capped snippet cannot be written
    pub fn feed(&mut self, samples: &[i16]) -> Result<Option<PathBuf>> {
        if self.enabled {
            let cap = self.config.pre_roll_samples();
            self.pre_roll.extend(samples.iter().copied());
            let excess = self.pre_roll.len().saturating_sub(cap);
            self.pre_roll.drain(..excess);
        }

        let max = self.config.max_samples();
        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };
        let room = max.saturating_sub(active.samples.len());
        active
            .samples
            .extend_from_slice(&samples[..samples.len().min(room)]);
        if active.samples.len() >= max {
            tracing::debug!(id = active.id, "snippet reached length cap");
            return self.finish("max");
        }
        Ok(None)
    }

    /// Open a snippet seeded with the pre-roll
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if a snippet is already in progress
    pub fn begin(&mut self, reason: SnipReason) -> Result<u64> {
        if let Some(active) = &self.active {
            return Err(Error::InvalidState(format!(
                "snippet {} already in progress",
                active.id
            )));
        }
        let id = self.next_id;
        self.next_id += 1;

        let mut samples = Vec::with_capacity(self.config.max_samples());
        samples.extend(self.pre_roll.iter().copied());
        samples.truncate(self.config.max_samples());
        tracing::debug!(id, reason = %reason, pre_roll = samples.len(), "snippet started");

        self.active = Some(ActiveSnip {
            id,
            reason,
            samples,
        });
        Ok(id)
    }

    /// Write the snippet in progress, labelled with how it ended
    ///
    /// Returns `None` if no snippet was in progress.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be written; the
    /// snippet is dropped either way
    pub fn finish(&mut self, label: &str) -> Result<Option<PathBuf>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };

        std::fs::create_dir_all(&self.config.dir)?;
        let name = format!(
            "{}_{}_{}.wav",
            active.reason,
            active.id,
            sanitize_label(label)
        );
        let path = self.config.dir.join(name);

        let mut sink = WavSink::create(&path)?;
        sink.write(&active.samples)?;
        let samples = sink.finalize()?;

        tracing::info!(path = %path.display(), samples, "snippet saved");
        self.saved += 1;
        self.last_saved = Some(path.clone());
        Ok(Some(path))
    }

    /// Drop the snippet in progress and the pre-roll without writing
    pub fn reset(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!(id = active.id, "snippet discarded");
        }
        self.pre_roll.clear();
    }

    /// Multi-line summary for text transports
    #[must_use]
    pub fn render(&self) -> String {
        let active = self.active.as_ref().map_or_else(
            || "none".to_string(),
            |a| {
                format!(
                    "{} ({}, {} ms)",
                    a.id,
                    a.reason,
                    a.samples.len() as u64 * 1_000 / u64::from(SAMPLE_RATE)
                )
            },
        );
        format!(
            "snip: {}\nactive: {active}\npre_ms={} max_ms={}\ndest: {}\nsaved: {}{}",
            if self.enabled { "on" } else { "off" },
            self.config.pre_roll_ms,
            self.config.max_ms,
            self.config.dir.display(),
            self.saved,
            self.last_saved
                .as_deref()
                .map(|p| format!(" (last {})", p.display()))
                .unwrap_or_default()
        )
    }
}

fn sanitize_label(label: &str) -> String {
    let mut out: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_LEN)
        .collect();
    if out.is_empty() {
        out.push_str("none");
    }
    out
}
