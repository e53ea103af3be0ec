//! Hierarchical voice session
//!
//! After the wake word the speaker names a category, then (depending on the
//! grammar) a subcategory and a target. [`RecognitionSession`] is the pure
//! state machine behind that dialogue: it consumes wake, speech and
//! hypothesis events with an explicit clock and reports what the pipeline
//! should do next. It never touches audio or the recognizer itself.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::grammar::{Grammar, GrammarEntry, normalize_phrase};
use super::recognizer::Hypothesis;
use crate::config::Tuning;

/// Dialogue stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum VoiceState {
    #[default]
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "category")]
    AwaitingCategory,
    #[serde(rename = "subcategory")]
    AwaitingSubCategory,
    #[serde(rename = "target")]
    AwaitingTarget,
}

impl VoiceState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingCategory => "category",
            Self::AwaitingSubCategory => "subcategory",
            Self::AwaitingTarget => "target",
        }
    }

    /// Whether a wake word has opened a dialogue
    #[must_use]
    pub const fn is_listening(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a session input resulted in
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Wake word opened a dialogue
    Woke,
    /// Advanced to a new stage
    Stage(VoiceState),
    /// A complete command was recognized; the session is idle again
    Dispatch {
        command: String,
        phrase: String,
        confidence: f32,
    },
    /// Confidence too low; stage unchanged
    Rejected {
        phrase: String,
        confidence: f32,
        required: f32,
    },
    /// Dialogue aborted by the speaker
    Cancelled,
    /// Options available at the current stage
    Help { options: Vec<String> },
    /// Stage deadline passed or the recognizer timed out
    TimedOut,
    /// Accepted phrase has no meaning at this stage; the session is idle again
    Unknown { phrase: String },
    /// Input had no effect
    Ignored,
}

impl SessionEvent {
    /// Whether the recognizer needs a new phrase set
    #[must_use]
    pub const fn changes_stage(&self) -> bool {
        matches!(
            self,
            Self::Woke
                | Self::Stage(_)
                | Self::Dispatch { .. }
                | Self::Cancelled
                | Self::TimedOut
                | Self::Unknown { .. }
        )
    }
}

/// Voice dialogue state and its counters
#[derive(Debug, Default)]
pub struct RecognitionSession {
    state: VoiceState,
    category: Option<String>,
    subcategory: Option<String>,
    deadline: Option<Instant>,
    speech_started: bool,
    wake_count: u64,
    low_confidence_rejects: u64,
    gap_accepts: u64,
    last_confidence: f32,
}

impl RecognitionSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> VoiceState {
        self.state
    }

    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    #[must_use]
    pub fn subcategory(&self) -> Option<&str> {
        self.subcategory.as_deref()
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub const fn speech_started(&self) -> bool {
        self.speech_started
    }

    #[must_use]
    pub const fn wake_count(&self) -> u64 {
        self.wake_count
    }

    #[must_use]
    pub const fn low_confidence_rejects(&self) -> u64 {
        self.low_confidence_rejects
    }

    #[must_use]
    pub const fn gap_accepts(&self) -> u64 {
        self.gap_accepts
    }

    /// Confidence of the most recently accepted phrase
    #[must_use]
    pub const fn last_confidence(&self) -> f32 {
        self.last_confidence
    }

    /// Wake word detected
    pub fn wake(&mut self, now: Instant, timeout: Duration) -> SessionEvent {
        if self.state.is_listening() {
            return SessionEvent::Ignored;
        }
        self.wake_count += 1;
        self.enter(VoiceState::AwaitingCategory, now, timeout);
        tracing::info!(wake_count = self.wake_count, "wake word detected");
        SessionEvent::Woke
    }

    /// Voice activity in the current chunk; the first burst after a stage
    /// change restarts the stage deadline
    pub fn speech(&mut self, now: Instant, timeout: Duration) {
        if self.state.is_listening() && !self.speech_started {
            self.speech_started = true;
            self.deadline = Some(now + timeout);
            tracing::trace!(state = %self.state, "speech started");
        }
    }

    /// Expire the stage if its deadline has passed
    pub fn tick(&mut self, now: Instant) -> SessionEvent {
        match self.deadline {
            Some(deadline) if self.state.is_listening() && now >= deadline => {
                tracing::info!(state = %self.state, "voice command timed out");
                self.reset();
                SessionEvent::TimedOut
            }
            _ => SessionEvent::Ignored,
        }
    }

    /// The recognizer gave up on the current utterance
    pub fn recognizer_timeout(&mut self) -> SessionEvent {
        if !self.state.is_listening() {
            return SessionEvent::Ignored;
        }
        tracing::info!(state = %self.state, "recognizer timeout");
        self.reset();
        SessionEvent::TimedOut
    }

    /// Return to idle, forgetting the partial phrase sequence
    pub fn reset(&mut self) {
        self.state = VoiceState::Idle;
        self.category = None;
        self.subcategory = None;
        self.deadline = None;
        self.speech_started = false;
    }

    /// Zero the rejection and gap acceptance counters
    pub const fn reset_counters(&mut self) {
        self.low_confidence_rejects = 0;
        self.gap_accepts = 0;
    }

    /// Handle a completed utterance
    pub fn hypotheses(
        &mut self,
        grammar: &Grammar,
        hypotheses: &[Hypothesis],
        tuning: &Tuning,
        now: Instant,
    ) -> SessionEvent {
        if !self.state.is_listening() {
            return SessionEvent::Ignored;
        }
        let Some(top) = hypotheses.first() else {
            return SessionEvent::Ignored;
        };

        let phrase = normalize_phrase(&top.phrase);
        let p1 = top.confidence;
        let p2 = hypotheses.get(1).map_or(0.0, |h| h.confidence);

        let target_stage = self.state == VoiceState::AwaitingTarget;
        let required = if target_stage {
            tuning.command_threshold
        } else {
            tuning.category_threshold
        };
        let gap = tuning.gap_accept;
        let speech_ok = !gap.require_speech || self.speech_started;
        let by_gap =
            target_stage && gap.enabled && speech_ok && p1 >= gap.floor && p1 - p2 >= gap.gap;

        if p1 < required && !by_gap {
            self.low_confidence_rejects += 1;
            self.deadline = Some(now + tuning.command_timeout);
            tracing::warn!(
                phrase = %phrase,
                confidence = p1,
                required,
                rejects = self.low_confidence_rejects,
                "low confidence, phrase rejected"
            );
            return SessionEvent::Rejected {
                phrase,
                confidence: p1,
                required,
            };
        }
        if p1 < required {
            self.gap_accepts += 1;
            tracing::debug!(phrase = %phrase, p1, p2, "accepted by gap");
        }
        self.last_confidence = p1;

        if phrase.contains("cancel") || phrase.contains("nevermind") {
            tracing::info!(state = %self.state, "voice command cancelled");
            self.reset();
            return SessionEvent::Cancelled;
        }

        if phrase.contains("help") {
            self.deadline = Some(now + tuning.command_timeout);
            return SessionEvent::Help {
                options: self.options(grammar),
            };
        }

        if let Some(global) = grammar.global(&phrase) {
            let command = global.command_string();
            self.reset();
            return SessionEvent::Dispatch {
                command,
                phrase,
                confidence: p1,
            };
        }

        match self.state {
            VoiceState::AwaitingCategory => self.on_category(grammar, phrase, p1, tuning, now),
            VoiceState::AwaitingSubCategory => self.on_subcategory(grammar, phrase, tuning, now),
            VoiceState::AwaitingTarget => self.on_target(grammar, phrase, p1),
            VoiceState::Idle => SessionEvent::Ignored,
        }
    }

    /// Phrases the recognizer should accept in the current stage
    #[must_use]
    pub fn stage_phrases(&self, grammar: &Grammar) -> Vec<String> {
        let mut phrases = match self.state {
            VoiceState::Idle => owned(grammar.categories()),
            _ => self.options(grammar),
        };
        for global in grammar.global_phrases() {
            if !phrases.iter().any(|p| p == global) {
                phrases.push(global.to_string());
            }
        }
        phrases
    }

    /// Stage-specific choices, without the global phrases
    #[must_use]
    pub fn options(&self, grammar: &Grammar) -> Vec<String> {
        let category = self.category.as_deref().unwrap_or_default();
        match self.state {
            VoiceState::Idle => Vec::new(),
            VoiceState::AwaitingCategory => owned(grammar.categories()),
            VoiceState::AwaitingSubCategory => owned(grammar.subcategories(category)),
            VoiceState::AwaitingTarget => {
                owned(grammar.targets(category, self.subcategory.as_deref()))
            }
        }
    }

    fn on_category(
        &mut self,
        grammar: &Grammar,
        phrase: String,
        confidence: f32,
        tuning: &Tuning,
        now: Instant,
    ) -> SessionEvent {
        if grammar.has_subcategories(&phrase) {
            self.category = Some(phrase);
            self.enter(VoiceState::AwaitingSubCategory, now, tuning.command_timeout);
            return SessionEvent::Stage(self.state);
        }
        if grammar.has_direct_targets(&phrase) {
            self.category = Some(phrase);
            self.enter(VoiceState::AwaitingTarget, now, tuning.command_timeout);
            return SessionEvent::Stage(self.state);
        }

        let command = grammar.single_stage(&phrase).map(GrammarEntry::command_string);
        self.reset();
        match command {
            Some(command) => SessionEvent::Dispatch {
                command,
                phrase,
                confidence,
            },
            None => {
                tracing::warn!(category = %phrase, "category has no associated command");
                SessionEvent::Unknown { phrase }
            }
        }
    }

    fn on_subcategory(
        &mut self,
        grammar: &Grammar,
        phrase: String,
        tuning: &Tuning,
        now: Instant,
    ) -> SessionEvent {
        let category = self.category.as_deref().unwrap_or_default();
        if grammar.subcategories(category).contains(&phrase.as_str()) {
            self.subcategory = Some(phrase);
            self.enter(VoiceState::AwaitingTarget, now, tuning.command_timeout);
            return SessionEvent::Stage(self.state);
        }
        tracing::warn!(category, subcategory = %phrase, "unknown subcategory");
        self.reset();
        SessionEvent::Unknown { phrase }
    }

    fn on_target(&mut self, grammar: &Grammar, phrase: String, confidence: f32) -> SessionEvent {
        let category = self.category.clone().unwrap_or_default();
        let subcategory = self.subcategory.clone();
        let resolved = grammar
            .resolve(&category, subcategory.as_deref(), &phrase)
            .map(GrammarEntry::command_string);
        self.reset();

        let Some(command) = resolved else {
            tracing::warn!(category = %category, subcategory = ?subcategory, target = %phrase, "no command for phrase sequence");
            return SessionEvent::Unknown { phrase };
        };

        let spoken = [Some(category.as_str()), subcategory.as_deref(), Some(phrase.as_str())]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        SessionEvent::Dispatch {
            command,
            phrase: spoken,
            confidence,
        }
    }

    fn enter(&mut self, state: VoiceState, now: Instant, timeout: Duration) {
        self.state = state;
        self.deadline = Some(now + timeout);
        self.speech_started = false;
        if state == VoiceState::AwaitingCategory {
            self.category = None;
            self.subcategory = None;
        }
        tracing::debug!(state = %state, category = ?self.category, subcategory = ?self.subcategory, "voice stage");
    }
}

fn owned(items: Vec<&str>) -> Vec<String> {
    items.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> Grammar {
        Grammar::new([
            GrammarEntry::new("lights").with_subcategory("kitchen").with_target("on"),
            GrammarEntry::new("lights").with_subcategory("kitchen").with_target("off"),
            GrammarEntry::new("battery").with_target("status").with_command("power status"),
            GrammarEntry::new("reboot").with_command("system reboot"),
            GrammarEntry::global("cancel", "voice cancel"),
            GrammarEntry::global("nevermind", "voice cancel"),
            GrammarEntry::global("help", "voice help"),
            GrammarEntry::global("stop listening", "sr stop"),
        ])
        .unwrap()
    }

    fn said(phrase: &str, confidence: f32) -> Vec<Hypothesis> {
        vec![Hypothesis::new(phrase, confidence)]
    }

    struct Harness {
        session: RecognitionSession,
        grammar: Grammar,
        tuning: Tuning,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                session: RecognitionSession::new(),
                grammar: grammar(),
                tuning: Tuning::default(),
                now: Instant::now(),
            }
        }

        fn wake(&mut self) -> SessionEvent {
            self.session.wake(self.now, self.tuning.command_timeout)
        }

        fn say(&mut self, phrase: &str, confidence: f32) -> SessionEvent {
            self.session
                .hypotheses(&self.grammar, &said(phrase, confidence), &self.tuning, self.now)
        }
    }

    #[test]
    fn three_level_sequence_dispatches_composite() {
        let mut h = Harness::new();
        assert_eq!(h.wake(), SessionEvent::Woke);
        assert_eq!(h.say("Lights", 0.9), SessionEvent::Stage(VoiceState::AwaitingSubCategory));
        assert_eq!(h.session.category(), Some("lights"));
        assert_eq!(h.say("kitchen", 0.9), SessionEvent::Stage(VoiceState::AwaitingTarget));

        let event = h.say("on", 0.7);
        assert_eq!(
            event,
            SessionEvent::Dispatch {
                command: "lights kitchen on".to_string(),
                phrase: "lights kitchen on".to_string(),
                confidence: 0.7,
            }
        );
        assert_eq!(h.session.state(), VoiceState::Idle);
        assert!((h.session.last_confidence() - 0.7).abs() < f32::EPSILON);
        assert_eq!(h.session.wake_count(), 1);
    }

    #[test]
    fn two_level_and_single_stage() {
        let mut h = Harness::new();
        h.wake();
        assert_eq!(h.say("battery", 0.5), SessionEvent::Stage(VoiceState::AwaitingTarget));
        assert!(matches!(
            h.say("status", 0.5),
            SessionEvent::Dispatch { ref command, ref phrase, .. }
                if command == "power status" && phrase == "battery status"
        ));

        h.wake();
        assert!(matches!(
            h.say("reboot", 0.5),
            SessionEvent::Dispatch { ref command, .. } if command == "system reboot"
        ));
        assert_eq!(h.session.state(), VoiceState::Idle);
    }

    #[test]
    fn low_confidence_never_advances() {
        let mut h = Harness::new();
        h.wake();
        for n in 1..=3 {
            assert!(matches!(h.say("lights", 0.10), SessionEvent::Rejected { .. }));
            assert_eq!(h.session.state(), VoiceState::AwaitingCategory);
            assert_eq!(h.session.low_confidence_rejects(), n);
        }
    }

    #[test]
    fn counters_reset_without_touching_the_dialogue() {
        let mut h = Harness::new();
        h.wake();
        h.say("lights", 0.10);
        assert_eq!(h.session.low_confidence_rejects(), 1);

        h.session.reset_counters();
        assert_eq!(h.session.low_confidence_rejects(), 0);
        assert_eq!(h.session.gap_accepts(), 0);
        assert_eq!(h.session.state(), VoiceState::AwaitingCategory);
        assert_eq!(h.session.wake_count(), 1);
    }

    #[test]
    fn rejection_refreshes_deadline() {
        let mut h = Harness::new();
        h.wake();
        let first = h.session.deadline().unwrap();
        h.now += Duration::from_secs(2);
        h.say("lights", 0.01);
        assert_eq!(h.session.deadline(), Some(first + Duration::from_secs(2)));
    }

    #[test]
    fn gap_acceptance_only_at_target_stage() {
        let mut h = Harness::new();
        h.tuning.command_threshold = 0.5;
        h.tuning.category_threshold = 0.5;
        h.wake();

        let category = h.session.hypotheses(
            &h.grammar,
            &[Hypothesis::new("lights", 0.3), Hypothesis::new("battery", 0.01)],
            &h.tuning,
            h.now,
        );
        assert!(matches!(category, SessionEvent::Rejected { .. }));

        h.say("lights", 0.9);
        h.say("kitchen", 0.9);
        let event = h.session.hypotheses(
            &h.grammar,
            &[Hypothesis::new("off", 0.20), Hypothesis::new("on", 0.10)],
            &h.tuning,
            h.now,
        );
        assert!(matches!(event, SessionEvent::Dispatch { ref command, .. } if command == "lights kitchen off"));
        assert_eq!(h.session.gap_accepts(), 1);
    }

    #[test]
    fn gap_acceptance_waits_for_speech_when_required() {
        let mut h = Harness::new();
        h.tuning.command_threshold = 0.5;
        h.tuning.gap_accept.require_speech = true;
        h.wake();
        h.say("lights", 0.9);
        h.say("kitchen", 0.9);

        let quiet = [Hypothesis::new("off", 0.20), Hypothesis::new("on", 0.05)];
        let event = h.session.hypotheses(&h.grammar, &quiet, &h.tuning, h.now);
        assert!(matches!(event, SessionEvent::Rejected { .. }));
        assert_eq!(h.session.gap_accepts(), 0);

        h.session.speech(h.now, h.tuning.command_timeout);
        let event = h.session.hypotheses(&h.grammar, &quiet, &h.tuning, h.now);
        assert!(matches!(event, SessionEvent::Dispatch { ref command, .. } if command == "lights kitchen off"));
        assert_eq!(h.session.gap_accepts(), 1);
    }

    #[test]
    fn narrow_gap_is_rejected() {
        let mut h = Harness::new();
        h.tuning.command_threshold = 0.5;
        h.wake();
        h.say("lights", 0.9);
        h.say("kitchen", 0.9);
        let event = h.session.hypotheses(
            &h.grammar,
            &[Hypothesis::new("off", 0.20), Hypothesis::new("on", 0.15)],
            &h.tuning,
            h.now,
        );
        assert!(matches!(event, SessionEvent::Rejected { .. }));
        assert_eq!(h.session.state(), VoiceState::AwaitingTarget);
        assert_eq!(h.session.gap_accepts(), 0);
    }

    #[test]
    fn cancel_returns_to_idle_from_any_stage() {
        let mut h = Harness::new();
        h.wake();
        h.say("lights", 0.9);
        h.say("kitchen", 0.9);
        assert_eq!(h.say("can cancel", 0.9), SessionEvent::Cancelled);
        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.session.category(), None);
        assert_eq!(h.session.subcategory(), None);

        h.wake();
        assert_eq!(h.say("nevermind", 0.9), SessionEvent::Cancelled);
    }

    #[test]
    fn help_lists_options_without_changing_state() {
        let mut h = Harness::new();
        h.wake();
        h.say("lights", 0.9);
        h.now += Duration::from_secs(3);

        let event = h.say("help", 0.9);
        assert_eq!(
            event,
            SessionEvent::Help {
                options: vec!["kitchen".to_string()]
            }
        );
        assert_eq!(h.session.state(), VoiceState::AwaitingSubCategory);
        assert_eq!(h.session.deadline(), Some(h.now + h.tuning.command_timeout));
        assert!(!event.changes_stage());
    }

    #[test]
    fn global_commands_dispatch_from_any_stage() {
        let mut h = Harness::new();
        h.wake();
        h.say("lights", 0.9);
        assert!(matches!(
            h.say("stop listening", 0.9),
            SessionEvent::Dispatch { ref command, .. } if command == "sr stop"
        ));
        assert_eq!(h.session.state(), VoiceState::Idle);
    }

    #[test]
    fn stage_deadline_expires() {
        let mut h = Harness::new();
        h.wake();
        h.say("lights", 0.9);
        assert_eq!(h.session.tick(h.now + Duration::from_millis(5_999)), SessionEvent::Ignored);
        assert_eq!(h.session.tick(h.now + Duration::from_millis(6_000)), SessionEvent::TimedOut);
        assert_eq!(h.session.state(), VoiceState::Idle);
        assert_eq!(h.session.tick(h.now + Duration::from_secs(60)), SessionEvent::Ignored);
    }

    #[test]
    fn first_speech_restarts_deadline_once() {
        let mut h = Harness::new();
        h.wake();
        let timeout = h.tuning.command_timeout;

        h.session.speech(h.now + Duration::from_secs(4), timeout);
        assert!(h.session.speech_started());
        assert_eq!(h.session.deadline(), Some(h.now + Duration::from_secs(4) + timeout));

        h.session.speech(h.now + Duration::from_secs(5), timeout);
        assert_eq!(h.session.deadline(), Some(h.now + Duration::from_secs(4) + timeout));

        h.say("lights", 0.9);
        assert!(!h.session.speech_started());
    }

    #[test]
    fn recognizer_timeout_and_idle_input() {
        let mut h = Harness::new();
        assert_eq!(h.session.recognizer_timeout(), SessionEvent::Ignored);
        assert_eq!(h.say("lights", 0.9), SessionEvent::Ignored);

        h.wake();
        assert_eq!(h.wake(), SessionEvent::Ignored);
        assert_eq!(h.session.wake_count(), 1);
        assert_eq!(h.session.recognizer_timeout(), SessionEvent::TimedOut);
        assert_eq!(h.session.state(), VoiceState::Idle);
    }

    #[test]
    fn unknown_phrase_returns_to_idle() {
        let mut h = Harness::new();
        h.wake();
        h.say("lights", 0.9);
        assert!(matches!(h.say("garage", 0.9), SessionEvent::Unknown { .. }));
        assert_eq!(h.session.state(), VoiceState::Idle);
    }

    #[test]
    fn stage_phrases_include_globals() {
        let mut h = Harness::new();
        let idle = h.session.stage_phrases(&h.grammar);
        assert_eq!(idle[..3], ["lights", "battery", "reboot"]);
        assert!(idle.contains(&"cancel".to_string()));

        h.wake();
        h.say("lights", 0.9);
        h.say("kitchen", 0.9);
        let target = h.session.stage_phrases(&h.grammar);
        assert_eq!(target[..2], ["on", "off"]);
        assert!(target.contains(&"help".to_string()));
    }
}
