//! hwone-voice - on-device voice command pipeline
//!
//! A wake word opens a short spoken dialogue (category, optional
//! subcategory, target) that resolves to a text command. Voice has no
//! credentials of its own: a user authenticated on another transport arms
//! voice, and recognized commands then run as that user through the same
//! authorization checks as every other transport.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Transports                        │
//! │    Console (serial)  │  HTTP API  │  Voice            │
//! └──────────┬───────────────────────────────┬───────────┘
//!            │                               │
//! ┌──────────▼──────────┐        ┌───────────┴───────────┐
//! │  Command dispatch   │◄───────│  Voice auth bridge    │
//! │  (authorization)    │        │  (armed identity)     │
//! └─────────────────────┘        └───────────▲───────────┘
//!                                            │
//! ┌──────────────────────────────────────────┴───────────┐
//! │  Recognition engine: preprocess → wake → stages      │
//! └──────────────────────────┬───────────────────────────┘
//!                            │
//! ┌──────────────────────────▼───────────────────────────┐
//! │  Audio source arbiter  │  Recorder (WAV)             │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod events;
pub mod security;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use device::Device;
pub use error::{Error, Outcome, Result};
pub use events::{EventBus, VoiceEvent};
pub use security::{AuthContext, Transport, VoiceAuthBridge};
pub use voice::{Grammar, GrammarEntry, StatusSnapshot, VoiceState};
