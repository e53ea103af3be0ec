//! Recognizer backend abstraction
//!
//! The pipeline drives a wake-word front end and a closed-vocabulary phrase
//! matcher through [`Recognizer`]. Acoustic models are opaque to this crate.
//! The daemon runs the energy front end in [`super::energy`];
//! [`ScriptedRecognizer`] replays a queue of detection steps for tests and
//! scripted runs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::audio::SILENCE_DB;
use crate::{Error, Result};

/// Front-end result for one chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrontEndOutput {
    /// The wake word was heard in this chunk
    pub wake: bool,
    /// Voice activity detected
    pub speech: bool,
    /// Chunk level in dBFS
    pub volume_db: f32,
}

impl Default for FrontEndOutput {
    fn default() -> Self {
        Self {
            wake: false,
            speech: false,
            volume_db: SILENCE_DB,
        }
    }
}

/// A candidate phrase and its confidence
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub phrase: String,
    pub confidence: f32,
}

impl Hypothesis {
    #[must_use]
    pub fn new(phrase: impl Into<String>, confidence: f32) -> Self {
        Self {
            phrase: phrase.into(),
            confidence,
        }
    }
}

/// Phrase matcher result for one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum DetectState {
    /// Still listening
    Detecting,
    /// Utterance complete; hypotheses sorted by descending confidence
    Detected(Vec<Hypothesis>),
    /// The matcher gave up waiting for an utterance
    Timeout,
}

/// Wake-word front end plus closed-vocabulary phrase matcher
pub trait Recognizer: Send {
    /// Backend name for logs and status
    fn name(&self) -> &str;

    /// Run the front end over one preprocessed chunk
    fn feed(&mut self, samples: &[i16]) -> FrontEndOutput;

    /// Run the phrase matcher over one chunk
    fn detect(&mut self, samples: &[i16]) -> DetectState;

    /// Replace the active phrase set
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the phrase set
    fn set_phrases(&mut self, phrases: &[String]) -> Result<()>;

    /// Swap in a new wake-word model
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelLoad` if the model cannot be loaded; the previous
    /// model must remain active in that case
    fn load_wake_model(&mut self, path: &Path) -> Result<()>;

    /// Discard partial matcher state
    fn clean(&mut self);
}

/// Reject missing, empty or non-regular model files
pub(crate) fn check_model_file(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)
        .map_err(|e| Error::ModelLoad(format!("{}: {e}", path.display())))?;
    if !meta.is_file() || meta.len() == 0 {
        return Err(Error::ModelLoad(format!(
            "{}: not a usable model file",
            path.display()
        )));
    }
    Ok(())
}

/// One scripted recognizer event
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
pub enum ScriptStep {
    /// Wake word heard
    Wake,
    /// Voice activity, no result yet
    Speech,
    /// Nothing heard
    Silence,
    /// Utterance recognized
    Phrase {
        text: String,
        confidence: f32,
        #[serde(default)]
        runner_up: Option<f32>,
    },
    /// Matcher timeout
    Timeout,
}

impl ScriptStep {
    #[must_use]
    pub fn phrase(text: impl Into<String>, confidence: f32) -> Self {
        Self::Phrase {
            text: text.into(),
            confidence,
            runner_up: None,
        }
    }

    #[must_use]
    pub fn phrase_with_runner_up(text: impl Into<String>, confidence: f32, runner_up: f32) -> Self {
        Self::Phrase {
            text: text.into(),
            confidence,
            runner_up: Some(runner_up),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    steps: Vec<ScriptStep>,
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: VecDeque<ScriptStep>,
    phrase_sets: Vec<Vec<String>>,
    wake_model: Option<PathBuf>,
    cleans: usize,
}

/// Shared handle for feeding and inspecting a [`ScriptedRecognizer`]
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    /// Queue steps, one consumed per chunk
    pub fn push(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        self.state.lock().steps.extend(steps);
    }

    /// Steps not yet consumed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().steps.len()
    }

    /// Every phrase set pushed by the pipeline, oldest first
    #[must_use]
    pub fn phrase_sets(&self) -> Vec<Vec<String>> {
        self.state.lock().phrase_sets.clone()
    }

    /// Most recently pushed phrase set
    #[must_use]
    pub fn active_phrases(&self) -> Vec<String> {
        self.state.lock().phrase_sets.last().cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn wake_model(&self) -> Option<PathBuf> {
        self.state.lock().wake_model.clone()
    }

    #[must_use]
    pub fn cleans(&self) -> usize {
        self.state.lock().cleans
    }
}

/// Recognizer that replays queued [`ScriptStep`]s
#[derive(Debug, Default)]
pub struct ScriptedRecognizer {
    handle: ScriptHandle,
    pending: Option<DetectState>,
}

impl ScriptedRecognizer {
    #[must_use]
    pub fn new() -> (Self, ScriptHandle) {
        let recognizer = Self::default();
        let handle = recognizer.handle.clone();
        (recognizer, handle)
    }

    /// Load steps from a TOML script (`[[steps]] step = "wake"` ...)
    ///
    /// # Errors
    ///
    /// Returns error if the script cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<(Self, ScriptHandle)> {
        let text = std::fs::read_to_string(path)?;
        let script: ScriptFile = toml::from_str(&text)?;
        let (recognizer, handle) = Self::new();
        tracing::debug!(path = %path.display(), steps = script.steps.len(), "recognizer script loaded");
        handle.push(script.steps);
        Ok((recognizer, handle))
    }
}

impl Recognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn feed(&mut self, samples: &[i16]) -> FrontEndOutput {
        let volume_db = crate::audio::AudioFrame::new(samples.to_vec()).volume_db();
        let step = self.handle.state.lock().steps.pop_front();

        let mut out = FrontEndOutput {
            volume_db,
            ..FrontEndOutput::default()
        };
        match step {
            Some(ScriptStep::Wake) => out.wake = true,
            Some(ScriptStep::Speech) => out.speech = true,
            Some(ScriptStep::Phrase {
                text,
                confidence,
                runner_up,
            }) => {
                out.speech = true;
                let mut hypotheses = vec![Hypothesis::new(text, confidence)];
                if let Some(second) = runner_up {
                    hypotheses.push(Hypothesis::new("", second));
                }
                self.pending = Some(DetectState::Detected(hypotheses));
            }
            Some(ScriptStep::Timeout) => self.pending = Some(DetectState::Timeout),
            Some(ScriptStep::Silence) | None => {}
        }
        out
    }

    fn detect(&mut self, _samples: &[i16]) -> DetectState {
        self.pending.take().unwrap_or(DetectState::Detecting)
    }

    fn set_phrases(&mut self, phrases: &[String]) -> Result<()> {
        self.handle.state.lock().phrase_sets.push(phrases.to_vec());
        Ok(())
    }

    fn load_wake_model(&mut self, path: &Path) -> Result<()> {
        check_model_file(path)?;
        self.handle.state.lock().wake_model = Some(path.to_path_buf());
        Ok(())
    }

    fn clean(&mut self) {
        self.pending = None;
        self.handle.state.lock().cleans += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_steps_in_order() {
        let (mut rec, handle) = ScriptedRecognizer::new();
        handle.push([
            ScriptStep::Wake,
            ScriptStep::Silence,
            ScriptStep::phrase_with_runner_up("lights", 0.4, 0.1),
        ]);
        let chunk = [0i16; 16];

        assert!(rec.feed(&chunk).wake);
        assert_eq!(rec.detect(&chunk), DetectState::Detecting);

        let out = rec.feed(&chunk);
        assert!(!out.wake && !out.speech);

        assert!(rec.feed(&chunk).speech);
        let DetectState::Detected(hyps) = rec.detect(&chunk) else {
            panic!("expected detection");
        };
        assert_eq!(hyps[0].phrase, "lights");
        assert!((hyps[1].confidence - 0.1).abs() < f32::EPSILON);
        assert_eq!(rec.detect(&chunk), DetectState::Detecting);
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn clean_discards_pending_result() {
        let (mut rec, handle) = ScriptedRecognizer::new();
        handle.push([ScriptStep::Timeout]);
        rec.feed(&[]);
        rec.clean();
        assert_eq!(rec.detect(&[]), DetectState::Detecting);
        assert_eq!(handle.cleans(), 1);
    }

    #[test]
    fn wake_model_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rec, handle) = ScriptedRecognizer::new();

        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(rec.load_wake_model(&empty), Err(Error::ModelLoad(_))));
        assert!(rec.load_wake_model(&dir.path().join("missing.bin")).is_err());
        assert!(handle.wake_model().is_none());

        let good = dir.path().join("wn9_hiesp.bin");
        std::fs::write(&good, b"model").unwrap();
        rec.load_wake_model(&good).unwrap();
        assert_eq!(handle.wake_model(), Some(good));
    }

    #[test]
    fn loads_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.toml");
        std::fs::write(
            &path,
            r#"
            [[steps]]
            step = "wake"

            [[steps]]
            step = "phrase"
            text = "battery"
            confidence = 0.8
            "#,
        )
        .unwrap();
        let (_rec, handle) = ScriptedRecognizer::from_file(&path).unwrap();
        assert_eq!(handle.pending(), 2);
    }
}
