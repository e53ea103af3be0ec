//! TOML configuration file loading
//!
//! Supports `~/.config/hwone/voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfigFile {
    /// Directory for settings and recordings
    #[serde(default)]
    pub data_dir: Option<String>,

    /// User that console input runs as
    #[serde(default)]
    pub console_user: Option<String>,

    /// Recognition settings
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Microphone settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// HTTP API settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Known users
    #[serde(default)]
    pub users: Vec<UserFileConfig>,
}

/// Recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Wake word model file
    pub wake_model: Option<String>,

    /// Command grammar file (replaces the registry-derived grammar)
    pub grammar: Option<String>,

    /// Minimum confidence for category and subcategory phrases
    pub category_threshold: Option<f32>,

    /// Minimum confidence for target phrases
    pub command_threshold: Option<f32>,

    /// Stage timeout in milliseconds
    pub command_timeout_ms: Option<u64>,

    /// Disarm voice after this many idle seconds
    pub arm_idle_timeout_secs: Option<u64>,

    /// Start recognition when the daemon starts
    pub autostart: Option<bool>,
}

/// Microphone configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Microphone gain, 0-100
    pub mic_gain: Option<u8>,

    /// High-pass and pre-emphasis filters
    pub filters: Option<bool>,

    /// Recording length cap in seconds
    pub max_recording_secs: Option<u64>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Serve the HTTP API
    pub enabled: Option<bool>,
}

/// A user entry
#[derive(Debug, Default, Deserialize)]
pub struct UserFileConfig {
    pub name: String,

    #[serde(default)]
    pub admin: bool,

    /// Bearer token for the HTTP transport
    pub token: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    config_file_path().map_or_else(VoiceConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> VoiceConfigFile {
    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/hwone/voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("hwone")
            .join("voice")
            .join("config.toml")
    })
}
