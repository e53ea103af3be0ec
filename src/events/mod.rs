//! Voice event channel
//!
//! Lifecycle and recognition events are published on a broadcast channel.
//! Publishing is best-effort: with no subscribers events are dropped, and
//! lagging subscribers lose the oldest events. Events are delivered in
//! publication order.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::security::Transport;
use crate::voice::VoiceState;

/// Buffered events per subscriber
const CHANNEL_CAPACITY: usize = 256;

/// Something observable happened in the voice subsystem
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// Recognition worker started
    Started,
    /// Recognition worker stopped
    Stopped,
    /// Wake word heard
    Wake { wake_count: u64 },
    /// Dialogue moved to a new stage
    Stage {
        state: VoiceState,
        options: Vec<String>,
    },
    /// A recognized command was dispatched
    Command {
        command: String,
        phrase: String,
        confidence: f32,
        user: Option<String>,
        ok: bool,
        response: String,
    },
    /// Phrase rejected for low confidence
    Rejected { phrase: String, confidence: f32 },
    /// Help requested
    Help { options: Vec<String> },
    /// Dialogue cancelled by the speaker
    Cancelled,
    /// Dialogue expired
    TimedOut,
    /// Accepted phrase had no meaning at its stage
    Unknown { phrase: String },
    /// Voice bound to a user
    Armed { user: String, transport: Transport },
    /// Voice binding released
    Disarmed,
    /// Recording started
    RecordingStarted { path: String },
    /// Recording finished
    RecordingStopped { path: String, samples: u64 },
    /// Voice snippet written
    SnippetSaved { path: String },
}

/// Fan-out of [`VoiceEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VoiceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: VoiceEvent) {
        tracing::trace!(?event, "voice event");
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
