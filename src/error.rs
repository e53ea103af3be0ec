//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for voice pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio hardware or driver error
    #[error("audio error: {0}")]
    Audio(String),

    /// Shared resource is held by someone else
    #[error("busy: {0}")]
    Busy(String),

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No identity is armed for voice control
    #[error("Voice not armed")]
    NotArmed,

    /// Caller lacks the required identity or privilege
    #[error("{0}")]
    Unauthorized(String),

    /// Model or grammar file could not be loaded
    #[error("load failed: {0}")]
    ModelLoad(String),

    /// Invalid grammar definition
    #[error("grammar error: {0}")]
    Grammar(String),

    /// Command text did not match any registered command
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Command arguments were rejected
    #[error("{0}")]
    InvalidArgument(String),

    /// Worker did not acknowledge a stop request in time
    #[error("timed out waiting for {0} to stop")]
    StopTimeout(&'static str),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV encoding or decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML encoding error
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

/// Caller-facing outcome of an operation
///
/// Every error collapses onto one of these so transports can report
/// results uniformly without inspecting driver details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Busy,
    NotArmed,
    InvalidState,
    HardwareError,
    Unauthorized,
    LoadFailed,
    Rejected,
}

impl Outcome {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Busy => "busy",
            Self::NotArmed => "not_armed",
            Self::InvalidState => "invalid_state",
            Self::HardwareError => "hardware_error",
            Self::Unauthorized => "unauthorized",
            Self::LoadFailed => "load_failed",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Map this error to its caller-facing outcome
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        match self {
            Self::Busy(_) => Outcome::Busy,
            Self::NotArmed => Outcome::NotArmed,
            Self::InvalidState(_) | Self::StopTimeout(_) => Outcome::InvalidState,
            Self::Audio(_) | Self::Io(_) | Self::Wav(_) => Outcome::HardwareError,
            Self::Unauthorized(_) => Outcome::Unauthorized,
            Self::ModelLoad(_) | Self::Grammar(_) | Self::Toml(_) => Outcome::LoadFailed,
            Self::Config(_)
            | Self::UnknownCommand(_)
            | Self::InvalidArgument(_)
            | Self::Serialization(_)
            | Self::TomlEncode(_) => Outcome::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_armed_message_is_stable() {
        assert_eq!(Error::NotArmed.to_string(), "Voice not armed");
        assert_eq!(Error::NotArmed.outcome(), Outcome::NotArmed);
    }

    #[test]
    fn driver_errors_are_hardware_errors() {
        let io = Error::from(std::io::Error::other("i2s read failed"));
        assert_eq!(io.outcome(), Outcome::HardwareError);
        assert_eq!(Error::Audio("dma".into()).outcome(), Outcome::HardwareError);
    }

    #[test]
    fn outcome_names() {
        assert_eq!(Outcome::Busy.to_string(), "busy");
        assert_eq!(Error::StopTimeout("recognition").outcome().as_str(), "invalid_state");
    }
}
