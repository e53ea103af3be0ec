//! Dynamic gain for recognizer input
//!
//! Pulls each chunk's peak toward a target level with a slow one-pole
//! smoother, so quiet speakers are boosted and loud ones are tamed before the
//! command recognizer sees the audio.

use serde::{Deserialize, Serialize};

use super::preprocess::clamp_i16;

/// Dynamic gain parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicGainConfig {
    pub enabled: bool,
    pub min: f32,
    pub max: f32,
    pub target_peak: f32,
    pub alpha: f32,
}

impl Default for DynamicGainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min: 0.70,
            max: 2.50,
            target_peak: 12_000.0,
            alpha: 0.06,
        }
    }
}

/// Adaptive gain state and counters
#[derive(Debug, Clone)]
pub struct DynamicGain {
    current: f32,
    applied: u64,
    bypassed: u64,
}

impl Default for DynamicGain {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicGain {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: 1.0,
            applied: 0,
            bypassed: 0,
        }
    }

    /// Apply gain to `samples` when enabled and speech is active
    ///
    /// Returns `true` if the samples were modified.
    pub fn process(&mut self, config: &DynamicGainConfig, samples: &mut [i16], speech: bool) -> bool {
        if !config.enabled || !speech || samples.is_empty() {
            self.bypassed += 1;
            return false;
        }

        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        if peak == 0 {
            self.bypassed += 1;
            return false;
        }

        let (lo, hi) = bounds(config);
        let desired = (config.target_peak / f32::from(peak)).clamp(lo, hi);
        self.current = (self.current + (desired - self.current) * config.alpha).clamp(lo, hi);

        for sample in samples.iter_mut() {
            *sample = clamp_i16(f32::from(*sample) * self.current);
        }

        self.applied += 1;
        true
    }

    /// Return the smoother to unity gain and clear counters
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    pub const fn current(&self) -> f32 {
        self.current
    }

    #[must_use]
    pub const fn applied(&self) -> u64 {
        self.applied
    }

    #[must_use]
    pub const fn bypassed(&self) -> u64 {
        self.bypassed
    }
}

fn bounds(config: &DynamicGainConfig) -> (f32, f32) {
    if config.min <= config.max {
        (config.min, config.max)
    } else {
        (config.max, config.min)
    }
}
