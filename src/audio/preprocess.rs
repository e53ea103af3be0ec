//! Audio preprocessing: DC removal, high-pass, pre-emphasis, gain, clamp
//!
//! Every stage runs in `f32` so identical input and state always produce
//! identical output, independent of which consumer owns the state.

/// High-pass filter coefficient (~50Hz corner at 16kHz)
pub const HIGH_PASS_ALPHA: f32 = 0.9806;

/// Pre-emphasis coefficient
pub const PRE_EMPHASIS: f32 = 0.97;

/// Smoothing divisor for the running DC estimate
const DC_SMOOTHING: f32 = 10.0;

/// Software gain at the default microphone gain percent
pub const BASE_SOFTWARE_GAIN: f32 = 24.0;

/// Default microphone gain percent
pub const DEFAULT_GAIN_PERCENT: u8 = 50;

/// Software gain multiplier derived from a 0-100 microphone gain setting
#[must_use]
pub fn software_gain(percent: u8) -> f32 {
    BASE_SOFTWARE_GAIN * f32::from(percent) / 50.0
}

/// Microphone gain percent that produces the given software gain
#[must_use]
pub fn percent_for_gain(gain: f32) -> u8 {
    let percent = (gain / BASE_SOFTWARE_GAIN * 50.0).round().clamp(0.0, 100.0);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        percent as u8
    }
}

/// Filter memory carried across chunks
///
/// Each consumer (recording, recognition) owns its own instance; reset it
/// whenever that consumer restarts so stale memory never leaks into a new
/// session.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingState {
    dc: Option<f32>,
    hp_prev_in: f32,
    hp_prev_out: f32,
    /// Previous high-pass output, not the previous raw sample
    pre_prev: f32,
    gain_percent: u8,
}

impl Default for PreprocessingState {
    fn default() -> Self {
        Self::new(DEFAULT_GAIN_PERCENT)
    }
}

impl PreprocessingState {
    #[must_use]
    pub const fn new(gain_percent: u8) -> Self {
        Self {
            dc: None,
            hp_prev_in: 0.0,
            hp_prev_out: 0.0,
            pre_prev: 0.0,
            gain_percent,
        }
    }

    /// Clear filter memory, keeping the gain setting
    pub fn reset(&mut self) {
        *self = Self::new(self.gain_percent);
    }

    #[must_use]
    pub const fn gain_percent(&self) -> u8 {
        self.gain_percent
    }

    pub fn set_gain_percent(&mut self, percent: u8) {
        self.gain_percent = percent.min(100);
    }

    /// Current DC estimate, if a chunk has been processed
    #[must_use]
    pub const fn dc_offset(&self) -> Option<f32> {
        self.dc
    }

    /// Transform `samples` in place
    ///
    /// A non-positive `gain` means "derive from the gain percent". With
    /// `filters` off only DC removal and gain are applied.
    pub fn process(&mut self, samples: &mut [i16], gain: f32, filters: bool) {
        if samples.is_empty() {
            return;
        }

        let gain = if gain > 0.0 {
            gain
        } else {
            software_gain(self.gain_percent)
        };

        self.update_dc(samples);
        let dc = self.dc.unwrap_or(0.0);

        if gain <= 0.0 {
            samples.fill(0);
            return;
        }

        for sample in samples.iter_mut() {
            let mut x = f32::from(*sample) - dc;

            if filters {
                let hp = HIGH_PASS_ALPHA * (self.hp_prev_out + x - self.hp_prev_in);
                self.hp_prev_in = x;
                self.hp_prev_out = hp;

                // Pre-emphasis runs on the high-pass output stream
                let pre = hp - PRE_EMPHASIS * self.pre_prev;
                self.pre_prev = hp;
                x = pre;
            }

            *sample = clamp_i16(x * gain);
        }
    }

    fn update_dc(&mut self, samples: &[i16]) {
        let sum: i64 = samples.iter().map(|&s| i64::from(s)).sum();

        #[allow(clippy::cast_precision_loss)]
        let mean = sum as f32 / samples.len() as f32;

        self.dc = Some(match self.dc {
            None => mean,
            Some(dc) => dc + (mean - dc) / DC_SMOOTHING,
        });
    }
}

/// Round toward zero and saturate to the `i16` range
#[must_use]
pub fn clamp_i16(value: f32) -> i16 {
    #[allow(clippy::cast_possible_truncation)]
    {
        value.clamp(-32_768.0, 32_767.0) as i16
    }
}
