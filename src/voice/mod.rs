//! Voice recognition module
//!
//! Grammar, recognizer abstraction, the staged dialogue session and the
//! engine that runs them against the microphone.

mod energy;
mod engine;
mod grammar;
mod recognizer;
mod session;
mod status;

pub use energy::{DetectorState, ENERGY_THRESHOLD, EnergyRecognizer};
pub use engine::{RecognitionEngine, SharedGrammar, VoicePipeline};
pub use grammar::{GLOBAL_CATEGORY, Grammar, GrammarEntry, normalize_phrase};
pub use recognizer::{
    DetectState, FrontEndOutput, Hypothesis, Recognizer, ScriptHandle, ScriptStep,
    ScriptedRecognizer,
};
pub use session::{RecognitionSession, SessionEvent, VoiceState};
pub use status::{SharedTelemetry, StatusSnapshot, Telemetry};
