//! Configuration management
//!
//! Precedence is env > TOML file > built-in defaults. Runtime tuning that
//! survives restarts lives separately in [`tuning::SettingsStore`].

pub mod file;
pub mod tuning;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::Result;
use crate::audio::DEFAULT_GAIN_PERCENT;

pub use tuning::{GapAccept, SettingsStore, SharedTuning, Tuning};

/// Default HTTP API port
pub const DEFAULT_API_PORT: u16 = 18_790;

/// Default stage timeout
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 6_000;

/// Longest recording accepted
pub const DEFAULT_MAX_RECORDING: Duration = Duration::from_secs(60);

/// Device configuration
#[derive(Debug)]
pub struct Config {
    /// Path to data directory (settings, recordings)
    pub data_dir: PathBuf,

    /// Persisted tuning file
    pub settings_path: PathBuf,

    /// Where recordings are written
    pub recordings_dir: PathBuf,

    /// User that console input is attributed to
    pub console_user: Option<String>,

    /// Recognition configuration
    pub voice: VoiceConfig,

    /// Microphone configuration
    pub audio: AudioConfig,

    /// HTTP API server configuration
    pub api: ApiConfig,

    /// Known users
    pub users: Vec<UserConfig>,
}

/// Recognition configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Wake word model loaded at startup
    pub wake_model: Option<PathBuf>,

    /// Grammar file replacing the registry-derived grammar
    pub grammar_path: Option<PathBuf>,

    /// Minimum confidence for category and subcategory phrases
    pub category_threshold: f32,

    /// Minimum confidence for target phrases
    pub command_threshold: f32,

    /// Stage timeout in milliseconds
    pub command_timeout_ms: u64,

    /// Expire an armed identity after this much inactivity
    pub arm_idle_timeout: Option<Duration>,

    /// Start recognition with the daemon
    pub autostart: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_model: None,
            grammar_path: None,
            category_threshold: tuning::DEFAULT_CATEGORY_THRESHOLD,
            command_threshold: tuning::DEFAULT_COMMAND_THRESHOLD,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            arm_idle_timeout: None,
            autostart: false,
        }
    }
}

/// Microphone configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Microphone gain, 0-100
    pub mic_gain_percent: u8,

    /// High-pass and pre-emphasis filters
    pub filters: bool,

    /// Recording length cap
    pub max_recording: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mic_gain_percent: DEFAULT_GAIN_PERCENT,
            filters: true,
            max_recording: DEFAULT_MAX_RECORDING,
        }
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Port to listen on
    pub port: u16,

    /// Serve the API at all
    pub enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_API_PORT,
            enabled: true,
        }
    }
}

/// A configured user
#[derive(Debug)]
pub struct UserConfig {
    pub name: String,
    pub admin: bool,
    pub token: Option<SecretString>,
}

impl UserConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, admin: bool) -> Self {
        Self {
            name: name.into(),
            admin,
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }
}

impl Config {
    /// Defaults rooted at `data_dir`, ignoring env and config files
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            settings_path: data_dir.join("settings.toml"),
            recordings_dir: data_dir.join("recordings"),
            data_dir,
            console_user: None,
            voice: VoiceConfig::default(),
            audio: AudioConfig::default(),
            api: ApiConfig::default(),
            users: Vec::new(),
        }
    }

    /// Grammar file edited by `sr cmds save`; the configured path, else
    /// `grammar.toml` in the data directory
    #[must_use]
    pub fn grammar_file(&self) -> PathBuf {
        self.voice
            .grammar_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("grammar.toml"))
    }

    /// Load configuration from the standard config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Load configuration from an explicit config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_file(file::load_from(path))
    }

    fn from_file(fc: file::VoiceConfigFile) -> Result<Self> {
        // Determine data directory (~/.local/share/hwone/voice on Linux)
        let data_dir = std::env::var("HWONE_DATA_DIR")
            .ok()
            .or(fc.data_dir)
            .map_or_else(
                || {
                    directories::BaseDirs::new().map_or_else(
                        || PathBuf::from("."),
                        |d| d.data_dir().join("hwone").join("voice"),
                    )
                },
                PathBuf::from,
            );
        std::fs::create_dir_all(&data_dir)?;

        let mut config = Self::with_data_dir(data_dir);

        config.console_user = std::env::var("HWONE_CONSOLE_USER").ok().or(fc.console_user);

        let defaults = VoiceConfig::default();
        config.voice = VoiceConfig {
            wake_model: std::env::var("HWONE_WAKE_MODEL")
                .ok()
                .or(fc.voice.wake_model)
                .map(PathBuf::from),
            grammar_path: std::env::var("HWONE_GRAMMAR")
                .ok()
                .or(fc.voice.grammar)
                .map(PathBuf::from),
            category_threshold: fc
                .voice
                .category_threshold
                .unwrap_or(defaults.category_threshold)
                .clamp(0.0, 1.0),
            command_threshold: fc
                .voice
                .command_threshold
                .unwrap_or(defaults.command_threshold)
                .clamp(0.0, 1.0),
            command_timeout_ms: fc
                .voice
                .command_timeout_ms
                .unwrap_or(defaults.command_timeout_ms)
                .clamp(tuning::MIN_COMMAND_TIMEOUT_MS, tuning::MAX_COMMAND_TIMEOUT_MS),
            arm_idle_timeout: std::env::var("HWONE_ARM_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(fc.voice.arm_idle_timeout_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            autostart: std::env::var("HWONE_SR_AUTOSTART")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .ok()
                .or(fc.voice.autostart)
                .unwrap_or(false),
        };

        config.audio = AudioConfig {
            mic_gain_percent: fc.audio.mic_gain.unwrap_or(DEFAULT_GAIN_PERCENT).min(100),
            filters: fc.audio.filters.unwrap_or(true),
            max_recording: fc
                .audio
                .max_recording_secs
                .map_or(DEFAULT_MAX_RECORDING, Duration::from_secs)
                .min(DEFAULT_MAX_RECORDING),
        };

        config.api = ApiConfig {
            port: std::env::var("HWONE_API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_API_PORT),
            enabled: fc.server.enabled.unwrap_or(true),
        };

        config.users = fc
            .users
            .into_iter()
            .filter(|u| !u.name.trim().is_empty())
            .map(|u| UserConfig {
                name: u.name.trim().to_string(),
                admin: u.admin,
                token: u.token.map(SecretString::from),
            })
            .collect();

        tracing::debug!(
            data_dir = %config.data_dir.display(),
            users = config.users.len(),
            port = config.api.port,
            "configuration loaded"
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_layout() {
        let config = Config::with_data_dir("/var/lib/hwone");
        assert_eq!(config.settings_path, PathBuf::from("/var/lib/hwone/settings.toml"));
        assert_eq!(config.recordings_dir, PathBuf::from("/var/lib/hwone/recordings"));
        assert_eq!(config.voice.command_timeout_ms, DEFAULT_COMMAND_TIMEOUT_MS);
        assert!(config.voice.arm_idle_timeout.is_none());
        assert_eq!(config.audio.mic_gain_percent, 50);
        assert_eq!(config.grammar_file(), PathBuf::from("/var/lib/hwone/grammar.toml"));
    }

    #[test]
    fn configured_grammar_file_wins() {
        let mut config = Config::with_data_dir("/var/lib/hwone");
        config.voice.grammar_path = Some(PathBuf::from("/etc/hwone/grammar.toml"));
        assert_eq!(config.grammar_file(), PathBuf::from("/etc/hwone/grammar.toml"));
    }

    #[test]
    fn file_values_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let fc: file::VoiceConfigFile = toml::from_str(&format!(
            r#"
            data_dir = "{}"

            [voice]
            category_threshold = 3.0
            command_timeout_ms = 100
            arm_idle_timeout_secs = 0

            [audio]
            mic_gain = 250
            max_recording_secs = 600

            [[users]]
            name = "  bob "

            [[users]]
            name = ""
            "#,
            dir.path().display()
        ))
        .unwrap();

        let config = Config::from_file(fc).unwrap();
        assert!((config.voice.category_threshold - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.voice.command_timeout_ms, tuning::MIN_COMMAND_TIMEOUT_MS);
        assert!(config.voice.arm_idle_timeout.is_none());
        assert_eq!(config.audio.mic_gain_percent, 100);
        assert_eq!(config.audio.max_recording, DEFAULT_MAX_RECORDING);
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].name, "bob");
    }
}
