//! Audio module
//!
//! Microphone input, arbitration between consumers, preprocessing, WAV
//! recording and voice snippets.

mod agc;
pub mod arbiter;
mod frame;
mod input;
mod preprocess;
mod recorder;
mod snip;

pub use agc::{DynamicGain, DynamicGainConfig};
pub use arbiter::{ReadStats, SessionGuard, SessionKind, SourceArbiter, SourceLease};
pub use frame::{AudioFrame, CHUNK_SAMPLES, LEVEL_SAMPLES, SAMPLE_RATE, SILENCE_DB, level_percent};
pub use input::{AudioInput, CpalInput, MemoryFeed, MemoryInput, WavInput};
pub use preprocess::{
    BASE_SOFTWARE_GAIN, DEFAULT_GAIN_PERCENT, HIGH_PASS_ALPHA, PRE_EMPHASIS, PreprocessingState,
    clamp_i16, percent_for_gain, software_gain,
};
pub use recorder::{Recorder, RecordingInfo, RecordingSummary, WavSink, wav_spec};
pub use snip::{SharedSnip, SnipCapture, SnipConfig, SnipReason};
