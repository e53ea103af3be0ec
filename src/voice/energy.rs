//! Energy-based front end
//!
//! Voice activity comes from chunk RMS energy. A voiced burst of at least
//! [`MIN_SPEECH_SAMPLES`] followed by [`SILENCE_SAMPLES`] of quiet counts as
//! the wake word. After waking, each further burst is one utterance; with no
//! acoustic phrase model the matcher cannot decode it and reports a timeout.

use std::path::{Path, PathBuf};

use super::recognizer::{DetectState, FrontEndOutput, Recognizer, check_model_file};
use crate::Result;
use crate::audio::AudioFrame;

/// Minimum audio energy threshold to consider speech
pub const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum voiced audio to count as a burst (0.3 seconds at 16kHz)
pub const MIN_SPEECH_SAMPLES: usize = 4_800;

/// Quiet that ends a burst (0.5 seconds)
pub const SILENCE_SAMPLES: usize = 8_000;

/// State of the energy front end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Voiced burst in progress, may become the wake word
    Listening,
    /// Woken; bursts are utterances for the phrase matcher
    Activated,
}

/// Voiced and trailing-silence sample counts for one burst
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Burst {
    voiced: usize,
    silence: usize,
}

impl Burst {
    fn add(&mut self, len: usize, speech: bool) {
        if speech {
            self.voiced += len;
            self.silence = 0;
        } else {
            self.silence += len;
        }
    }

    const fn complete(&self) -> bool {
        self.voiced > MIN_SPEECH_SAMPLES && self.silence > SILENCE_SAMPLES
    }

    const fn abandoned(&self) -> bool {
        self.voiced <= MIN_SPEECH_SAMPLES && self.silence > SILENCE_SAMPLES * 2
    }
}

/// Recognizer driven by signal energy alone
#[derive(Debug)]
pub struct EnergyRecognizer {
    threshold: f32,
    state: DetectorState,
    burst: Burst,
    pending: Option<DetectState>,
    polled: bool,
    phrases: usize,
    wake_model: Option<PathBuf>,
}

impl Default for EnergyRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl EnergyRecognizer {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_threshold(ENERGY_THRESHOLD)
    }

    /// Use a custom RMS threshold (0.0-1.0 of full scale)
    #[must_use]
    pub const fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            state: DetectorState::Idle,
            burst: Burst {
                voiced: 0,
                silence: 0,
            },
            pending: None,
            polled: false,
            phrases: 0,
            wake_model: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    #[must_use]
    pub fn wake_model(&self) -> Option<&Path> {
        self.wake_model.as_deref()
    }

    fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.burst = Burst::default();
        self.pending = None;
    }
}

impl Recognizer for EnergyRecognizer {
    fn name(&self) -> &str {
        "energy"
    }

    fn feed(&mut self, samples: &[i16]) -> FrontEndOutput {
        let energy = calculate_energy(samples);
        let speech = energy > self.threshold;
        let mut out = FrontEndOutput {
            wake: false,
            speech,
            volume_db: AudioFrame::new(samples.to_vec()).volume_db(),
        };

        // Nobody asked for a phrase last chunk, so the dialogue is over
        if self.state == DetectorState::Activated && !std::mem::take(&mut self.polled) {
            tracing::trace!("dialogue closed, back to idle");
            self.reset();
        }

        match self.state {
            DetectorState::Idle => {
                if speech {
                    self.state = DetectorState::Listening;
                    self.burst = Burst::default();
                    self.burst.add(samples.len(), true);
                    tracing::trace!(energy, "speech detected, listening");
                }
            }
            DetectorState::Listening => {
                self.burst.add(samples.len(), speech);
                if self.burst.complete() {
                    tracing::debug!(voiced = self.burst.voiced, "wake burst complete");
                    self.state = DetectorState::Activated;
                    self.burst = Burst::default();
                    out.wake = true;
                } else if self.burst.abandoned() {
                    tracing::trace!("burst too short, resetting");
                    self.reset();
                }
            }
            DetectorState::Activated => {
                self.burst.add(samples.len(), speech);
                if self.burst.complete() {
                    tracing::debug!(
                        voiced = self.burst.voiced,
                        phrases = self.phrases,
                        "utterance complete without a phrase model"
                    );
                    self.burst = Burst::default();
                    self.pending = Some(DetectState::Timeout);
                }
            }
        }
        out
    }

    fn detect(&mut self, _samples: &[i16]) -> DetectState {
        self.polled = true;
        self.pending.take().unwrap_or(DetectState::Detecting)
    }

    fn set_phrases(&mut self, phrases: &[String]) -> Result<()> {
        self.phrases = phrases.len();
        Ok(())
    }

    fn load_wake_model(&mut self, path: &Path) -> Result<()> {
        check_model_file(path)?;
        tracing::info!(
            path = %path.display(),
            "energy front end keeps triggering on voiced bursts"
        );
        self.wake_model = Some(path.to_path_buf());
        Ok(())
    }

    fn clean(&mut self) {
        self.pending = None;
        if self.state == DetectorState::Activated {
            self.burst = Burst::default();
        }
    }
}

/// Calculate RMS energy of samples, normalized to full scale
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let s = f32::from(s) / 32_768.0;
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
