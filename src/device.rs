//! Device service object
//!
//! Owns and wires every component: users, dispatcher, voice bridge, audio
//! arbiter, recognition engine, recorder and tuning. Transports hold an
//! `Arc<Device>` and talk to it through [`Device::execute`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::audio::{AudioInput, Recorder, RecordingSummary, SharedSnip, SnipCapture, SourceArbiter};
use crate::commands::{CommandFacade, CommandRegistry, Dispatcher, register_device_commands};
use crate::config::{ApiConfig, Config, SettingsStore, SharedTuning, Tuning};
use crate::events::{EventBus, VoiceEvent};
use crate::security::{AuthContext, UserDirectory, VoiceAuthBridge};
use crate::voice::{Grammar, RecognitionEngine, Recognizer, StatusSnapshot};
use crate::Result;

/// The voice command device
pub struct Device {
    users: Arc<UserDirectory>,
    dispatcher: Arc<Dispatcher>,
    bridge: Arc<VoiceAuthBridge>,
    arbiter: Arc<SourceArbiter>,
    engine: RecognitionEngine,
    recorder: Recorder,
    snip: SharedSnip,
    grammar_path: PathBuf,
    tuning: SharedTuning,
    settings: SettingsStore,
    events: EventBus,
    console_user: Option<String>,
    api: ApiConfig,
    autostart: bool,
    data_dir: PathBuf,
}

impl Device {
    /// Build the device from configuration and the given audio and
    /// recognizer backends
    ///
    /// # Errors
    ///
    /// Returns error if the registered commands describe an invalid grammar
    pub fn new(
        mut config: Config,
        input: Box<dyn AudioInput>,
        recognizer: Box<dyn Recognizer>,
    ) -> Result<Arc<Self>> {
        let users = Arc::new(UserDirectory::new(std::mem::take(&mut config.users)));
        let settings = SettingsStore::new(&config.settings_path);
        let tuning: SharedTuning = Arc::new(RwLock::new(Tuning::from_config(
            &config,
            &settings.load(),
        )));
        let events = EventBus::new();

        let dispatcher = Arc::new(Dispatcher::new(CommandRegistry::new(), Arc::clone(&users)));
        let facade: Arc<dyn CommandFacade> = dispatcher.clone();
        let bridge = Arc::new(VoiceAuthBridge::new(
            facade,
            config.voice.arm_idle_timeout,
            events.clone(),
        ));

        tracing::info!(source = input.name(), recognizer = recognizer.name(), "audio backends");
        let arbiter = Arc::new(SourceArbiter::new(input));
        let snip = SnipCapture::shared(config.data_dir.join("snips"));
        let engine = RecognitionEngine::new(
            recognizer,
            Grammar::default(),
            Arc::clone(&tuning),
            Arc::clone(&bridge),
            Arc::clone(&arbiter),
            Arc::clone(&snip),
            events.clone(),
        );
        let grammar_path = config.grammar_file();
        let recorder = Recorder::new(
            Arc::clone(&arbiter),
            Arc::clone(&tuning),
            &config.recordings_dir,
            config.audio.max_recording,
        );

        let device = Arc::new_cyclic(|weak| {
            register_device_commands(&dispatcher, weak);
            Self {
                users,
                dispatcher: Arc::clone(&dispatcher),
                bridge,
                arbiter,
                engine,
                recorder,
                snip,
                grammar_path: grammar_path.clone(),
                tuning,
                settings,
                events,
                console_user: config.console_user.take(),
                api: config.api.clone(),
                autostart: config.voice.autostart,
                data_dir: config.data_dir.clone(),
            }
        });

        device.engine.set_grammar(dispatcher.grammar()?);

        if config.voice.grammar_path.is_some() || grammar_path.exists() {
            if let Err(e) = device.engine.load_grammar(&grammar_path) {
                tracing::warn!(error = %e, "keeping registry grammar");
            }
        }
        if let Some(path) = &config.voice.wake_model {
            if let Err(e) = device.engine.load_wake_model(path) {
                tracing::warn!(error = %e, "continuing without wake model");
            }
        }

        tracing::info!(
            commands = dispatcher.help_text().lines().count(),
            grammar_entries = device.engine.grammar().len(),
            users = device.users.len(),
            "device ready"
        );
        Ok(device)
    }

    /// Run a text command as `ctx`
    ///
    /// # Errors
    ///
    /// Returns error if the caller is not authorized, the command is
    /// unknown, or the command fails
    pub fn execute(&self, ctx: &AuthContext, text: &str) -> Result<String> {
        self.dispatcher.execute(ctx, text)
    }

    /// Current status of the voice subsystem
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        let mut status = StatusSnapshot::from_telemetry(&self.engine.telemetry());
        status.mic_gain_percent = self.tuning.read().mic_gain_percent;
        if let Some(token) = self.bridge.armed() {
            status.voice_armed = true;
            status.voice_armed_user = Some(token.user);
            status.voice_armed_by = Some(token.transport.to_string());
        }
        status.grammar_entries = self.engine.grammar().len();
        status.recording = self.recorder.is_recording();
        status
    }

    /// Start recognition and bind voice to the caller
    ///
    /// Returns whether voice could be armed for the caller.
    ///
    /// # Errors
    ///
    /// Returns error if recognition cannot start
    pub fn start_recognition(&self, ctx: &AuthContext) -> Result<bool> {
        if !self.engine.is_running() {
            self.engine.start()?;
        }
        match self.bridge.arm(ctx) {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::info!(error = %e, "recognition started without arming voice");
                Ok(false)
            }
        }
    }

    /// Stop recognition and release the voice binding
    ///
    /// # Errors
    ///
    /// Returns error if the worker does not stop in time
    pub fn stop_recognition(&self) -> Result<()> {
        let stopped = if self.engine.is_running() {
            self.engine.stop()
        } else {
            Ok(())
        };
        self.bridge.disarm();
        stopped
    }

    /// Start a recording in the recordings directory
    ///
    /// # Errors
    ///
    /// Returns error if the microphone is in use or the file cannot be
    /// created
    pub fn start_recording(&self) -> Result<PathBuf> {
        let path = self.recorder.start()?;
        self.events.publish(VoiceEvent::RecordingStarted {
            path: path.display().to_string(),
        });
        Ok(path)
    }

    /// Finish the current recording
    ///
    /// # Errors
    ///
    /// Returns error if nothing is recording or the file cannot be finalized
    pub fn stop_recording(&self) -> Result<RecordingSummary> {
        let summary = self.recorder.stop()?;
        self.events.publish(VoiceEvent::RecordingStopped {
            path: summary.path.display().to_string(),
            samples: summary.samples,
        });
        Ok(summary)
    }

    /// Write the persistent subset of the current tuning
    ///
    /// # Errors
    ///
    /// Returns error if the settings file cannot be written
    pub fn persist_tuning(&self) -> Result<()> {
        let tuning = self.tuning.read().clone();
        self.settings.save(&tuning)
    }

    /// Replace the active grammar with the one the command registry
    /// describes
    ///
    /// # Errors
    ///
    /// Returns error if the registry describes an invalid grammar
    pub fn sync_grammar(&self) -> Result<usize> {
        let grammar = self.dispatcher.grammar()?;
        let entries = grammar.len();
        self.engine.set_grammar(grammar);
        Ok(entries)
    }

    /// Write the active grammar to the grammar file
    ///
    /// # Errors
    ///
    /// Returns error if the grammar is empty or the file cannot be written
    pub fn save_grammar(&self) -> Result<usize> {
        let grammar = self.engine.grammar();
        grammar.save(&self.grammar_path)?;
        Ok(grammar.len())
    }

    /// Reload the grammar file; on failure the active grammar stays
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn reload_grammar(&self) -> Result<usize> {
        self.engine.load_grammar(&self.grammar_path)
    }

    /// Zero recognition and microphone read counters
    ///
    /// # Errors
    ///
    /// Returns error if the running worker does not respond
    pub fn reset_debug_stats(&self) -> Result<()> {
        self.engine.reset_stats()?;
        self.arbiter.reset_read_stats();
        Ok(())
    }

    /// Stop background work before exit
    pub fn shutdown(&self) {
        if self.recorder.is_recording() {
            if let Err(e) = self.stop_recording() {
                tracing::warn!(error = %e, "recording did not finish cleanly");
            }
        }
        if let Err(e) = self.stop_recognition() {
            tracing::warn!(error = %e, "recognition did not stop cleanly");
        }
    }

    #[must_use]
    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn bridge(&self) -> &VoiceAuthBridge {
        &self.bridge
    }

    #[must_use]
    pub fn arbiter(&self) -> &SourceArbiter {
        &self.arbiter
    }

    #[must_use]
    pub const fn engine(&self) -> &RecognitionEngine {
        &self.engine
    }

    #[must_use]
    pub const fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    #[must_use]
    pub const fn snip(&self) -> &SharedSnip {
        &self.snip
    }

    #[must_use]
    pub fn grammar_path(&self) -> &Path {
        &self.grammar_path
    }

    #[must_use]
    pub const fn tuning(&self) -> &SharedTuning {
        &self.tuning
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn console_user(&self) -> Option<&str> {
        self.console_user.as_deref()
    }

    #[must_use]
    pub const fn api_config(&self) -> &ApiConfig {
        &self.api
    }

    #[must_use]
    pub const fn autostart(&self) -> bool {
        self.autostart
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("dispatcher", &self.dispatcher)
            .field("bridge", &self.bridge)
            .field("recognizer", &self.engine.recognizer_name())
            .field("recording", &self.recorder.is_recording())
            .finish_non_exhaustive()
    }
}
