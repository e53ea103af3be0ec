//! Recognition telemetry and the status snapshot

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::session::VoiceState;
use crate::audio::SILENCE_DB;

/// Telemetry shared between the pipeline and status readers
pub type SharedTelemetry = Arc<RwLock<Telemetry>>;

/// Counters and last-seen values written by the recognition pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub running: bool,
    pub state: VoiceState,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub last_command: Option<String>,
    pub last_confidence: f32,
    pub last_wake_at: Option<DateTime<Utc>>,
    pub last_command_at: Option<DateTime<Utc>>,
    pub wake_count: u64,
    pub command_count: u64,
    pub low_confidence_rejects: u64,
    pub gap_accepts: u64,
    pub volume_db: f32,
    pub dyn_gain_current: f32,
    pub dyn_gain_applied: u64,
    pub dyn_gain_bypassed: u64,
    pub detect_calls: u64,
    pub detections: u64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            running: false,
            state: VoiceState::Idle,
            category: None,
            subcategory: None,
            last_command: None,
            last_confidence: 0.0,
            last_wake_at: None,
            last_command_at: None,
            wake_count: 0,
            command_count: 0,
            low_confidence_rejects: 0,
            gap_accepts: 0,
            volume_db: SILENCE_DB,
            dyn_gain_current: 1.0,
            dyn_gain_applied: 0,
            dyn_gain_bypassed: 0,
            detect_calls: 0,
            detections: 0,
        }
    }
}

/// Point-in-time view of the voice subsystem, as served to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub running: bool,
    pub wake_active: bool,
    pub state: VoiceState,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub last_command: Option<String>,
    pub last_confidence: f32,
    pub wake_count: u64,
    pub command_count: u64,
    pub low_confidence_rejects: u64,
    pub gap_accepts: u64,
    pub volume_db: f32,
    pub mic_gain_percent: u8,
    pub voice_armed: bool,
    pub voice_armed_user: Option<String>,
    pub voice_armed_by: Option<String>,
    pub grammar_entries: usize,
    pub recording: bool,
    pub last_wake_at: Option<DateTime<Utc>>,
    pub last_command_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Combine pipeline telemetry with device-level state
    #[must_use]
    pub fn from_telemetry(telemetry: &Telemetry) -> Self {
        Self {
            running: telemetry.running,
            wake_active: telemetry.state.is_listening(),
            state: telemetry.state,
            category: telemetry.category.clone(),
            sub_category: telemetry.subcategory.clone(),
            last_command: telemetry.last_command.clone(),
            last_confidence: telemetry.last_confidence,
            wake_count: telemetry.wake_count,
            command_count: telemetry.command_count,
            low_confidence_rejects: telemetry.low_confidence_rejects,
            gap_accepts: telemetry.gap_accepts,
            volume_db: telemetry.volume_db,
            mic_gain_percent: 0,
            voice_armed: false,
            voice_armed_user: None,
            voice_armed_by: None,
            grammar_entries: 0,
            recording: false,
            last_wake_at: telemetry.last_wake_at,
            last_command_at: telemetry.last_command_at,
        }
    }

    /// Multi-line summary for text transports
    #[must_use]
    pub fn render(&self) -> String {
        let armed = match (&self.voice_armed_user, &self.voice_armed_by) {
            (Some(user), Some(by)) if self.voice_armed => format!("yes ({user} via {by})"),
            _ => "no".to_string(),
        };
        let mut out = format!(
            "running={} state={} wake_active={}\n",
            self.running, self.state, self.wake_active
        );
        if let Some(category) = &self.category {
            out.push_str(&format!(
                "category={category} subcategory={}\n",
                self.sub_category.as_deref().unwrap_or("-")
            ));
        }
        out.push_str(&format!(
            "last_command={} last_confidence={:.2}\n",
            self.last_command.as_deref().unwrap_or("-"),
            self.last_confidence
        ));
        out.push_str(&format!(
            "wakes={} commands={} rejects={} gap_accepts={}\n",
            self.wake_count, self.command_count, self.low_confidence_rejects, self.gap_accepts
        ));
        out.push_str(&format!(
            "volume={:.1}dB mic_gain={}% grammar_entries={}\n",
            self.volume_db, self.mic_gain_percent, self.grammar_entries
        ));
        out.push_str(&format!("voice_armed={armed} recording={}", self.recording));
        out
    }
}
