//! Owned audio frames

/// Sample rate for all capture paths (16kHz mono for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per processing chunk (32ms at 16kHz)
pub const CHUNK_SAMPLES: usize = 512;

/// Samples read for a single level measurement
pub const LEVEL_SAMPLES: usize = 256;

/// Average absolute amplitude that maps to a full-scale level of 100
const LEVEL_FULL_SCALE: i64 = 16_384;

/// Floor reported by [`AudioFrame::volume_db`] for digital silence
pub const SILENCE_DB: f32 = -96.0;

/// A buffer of 16-bit mono PCM samples
///
/// Frames are moved between pipeline stages by value; no stage keeps a
/// reference to a frame another stage is working on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Wrap an owned sample buffer
    #[must_use]
    pub const fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// A zeroed frame of `len` samples
    #[must_use]
    pub fn silent(len: usize) -> Self {
        Self {
            samples: vec![0; len],
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Shrink the frame to the first `len` samples (used after short reads)
    pub fn truncate(&mut self, len: usize) {
        self.samples.truncate(len);
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<i16> {
        self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the frame at [`SAMPLE_RATE`]
    #[must_use]
    pub fn duration(&self) -> std::time::Duration {
        let micros = self.samples.len() as u64 * 1_000_000 / u64::from(SAMPLE_RATE);
        std::time::Duration::from_micros(micros)
    }

    /// Largest absolute sample value
    #[must_use]
    pub fn peak(&self) -> u16 {
        self.samples
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    /// Level meter reading in 0..=100
    #[must_use]
    pub fn level_percent(&self) -> u8 {
        level_percent(&self.samples)
    }

    /// RMS level in dBFS, floored at [`SILENCE_DB`]
    #[must_use]
    pub fn volume_db(&self) -> f32 {
        if self.samples.is_empty() {
            return SILENCE_DB;
        }

        #[allow(clippy::cast_precision_loss)]
        let mean_square = self
            .samples
            .iter()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum::<f64>()
            / self.samples.len() as f64;

        let rms = mean_square.sqrt() / 32_768.0;
        if rms <= 0.0 {
            return SILENCE_DB;
        }

        #[allow(clippy::cast_possible_truncation)]
        let db = (20.0 * rms.log10()) as f32;
        db.max(SILENCE_DB)
    }
}

impl From<Vec<i16>> for AudioFrame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

/// Map mean absolute amplitude onto 0..=100
///
/// Uses integer arithmetic so repeated readings of the same buffer agree.
#[must_use]
pub fn level_percent(samples: &[i16]) -> u8 {
    if samples.is_empty() {
        return 0;
    }

    let sum: i64 = samples.iter().map(|&s| i64::from(s).abs()).sum();
    #[allow(clippy::cast_possible_wrap)]
    let avg = sum / samples.len() as i64;
    let level = (avg * 100 / LEVEL_FULL_SCALE).clamp(0, 100);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        level as u8
    }
}
