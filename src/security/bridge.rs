//! Voice authorization bridge
//!
//! Voice has no credentials of its own. A user who authenticated over some
//! other transport arms voice, and recognized commands then run with that
//! user's identity until voice is disarmed (or, when configured, until the
//! arming goes unused for too long).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::context::{AuthContext, Transport};
use crate::commands::CommandFacade;
use crate::events::{EventBus, VoiceEvent};
use crate::{Error, Result};

/// Wait for the arm slot on mutating paths
const ARM_LOCK_TIMEOUT: Duration = Duration::from_millis(200);

/// Wait for the arm slot when only reporting state
const STATUS_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// Origin and path stamped on commands executed by voice
pub const VOICE_ORIGIN: &str = "voice";
pub const VOICE_PATH: &str = "/voice";

/// Identity voice commands currently run as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceArmToken {
    pub user: String,
    /// Transport the user armed from
    pub transport: Transport,
    pub origin: String,
    pub armed_at: DateTime<Utc>,
    armed_instant: Instant,
    last_used: Instant,
}

impl VoiceArmToken {
    fn new(ctx: &AuthContext) -> Self {
        let now = Instant::now();
        Self {
            user: ctx.user.trim().to_string(),
            transport: ctx.transport,
            origin: ctx.origin.clone(),
            armed_at: Utc::now(),
            armed_instant: now,
            last_used: now,
        }
    }

    /// Time since arming
    #[must_use]
    pub fn age(&self) -> Duration {
        self.armed_instant.elapsed()
    }

    fn expired(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|limit| self.last_used.elapsed() >= limit)
    }
}

/// Holds the single armed identity and executes commands under it
pub struct VoiceAuthBridge {
    slot: Mutex<Option<VoiceArmToken>>,
    facade: Arc<dyn CommandFacade>,
    idle_timeout: Option<Duration>,
    events: EventBus,
}

impl VoiceAuthBridge {
    #[must_use]
    pub fn new(
        facade: Arc<dyn CommandFacade>,
        idle_timeout: Option<Duration>,
        events: EventBus,
    ) -> Self {
        Self {
            slot: Mutex::new(None),
            facade,
            idle_timeout,
            events,
        }
    }

    /// Bind voice to the caller's identity, replacing any previous binding
    ///
    /// # Errors
    ///
    /// Returns `Error::Unauthorized` for internal callers or callers without a
    /// user, and `Error::Busy` if the arm slot stays locked
    pub fn arm(&self, ctx: &AuthContext) -> Result<()> {
        if ctx.transport == Transport::Internal || !ctx.has_user() {
            tracing::warn!(transport = %ctx.transport, "refusing to arm voice");
            return Err(Error::Unauthorized(
                "cannot arm voice from this transport/user".to_string(),
            ));
        }

        let token = VoiceArmToken::new(ctx);
        let mut slot = self
            .slot
            .try_lock_for(ARM_LOCK_TIMEOUT)
            .ok_or_else(|| Error::Busy("voice arm slot".to_string()))?;
        let previous = slot.replace(token.clone());
        drop(slot);

        tracing::info!(
            user = %token.user,
            transport = %token.transport,
            origin = %token.origin,
            replaced = ?previous.map(|p| p.user),
            "voice armed"
        );
        self.events.publish(VoiceEvent::Armed {
            user: token.user,
            transport: token.transport,
        });
        Ok(())
    }

    /// Release the binding; returns whether one existed
    pub fn disarm(&self) -> bool {
        let previous = self.slot.lock().take();
        if let Some(token) = &previous {
            tracing::info!(user = %token.user, "voice disarmed");
            self.events.publish(VoiceEvent::Disarmed);
        }
        previous.is_some()
    }

    /// Whether voice is armed; contention reads as not armed
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed().is_some()
    }

    /// Current binding, if any
    #[must_use]
    pub fn armed(&self) -> Option<VoiceArmToken> {
        let mut slot = self.slot.try_lock_for(STATUS_LOCK_TIMEOUT)?;
        if slot.as_ref().is_some_and(|t| t.expired(self.idle_timeout)) {
            let expired = slot.take();
            drop(slot);
            self.log_expiry(expired.as_ref());
            return None;
        }
        slot.clone()
    }

    /// Run `command` as the armed user over the voice transport
    ///
    /// # Errors
    ///
    /// Returns `Error::NotArmed` when no identity is bound, `Error::Busy` if
    /// the arm slot stays locked, or whatever the dispatcher returns
    pub fn execute_as_armed_user(&self, command: &str) -> Result<String> {
        let mut slot = self
            .slot
            .try_lock_for(ARM_LOCK_TIMEOUT)
            .ok_or_else(|| Error::Busy("voice arm slot".to_string()))?;

        let user = match slot.as_mut() {
            Some(token) if token.expired(self.idle_timeout) => {
                let expired = slot.take();
                drop(slot);
                self.log_expiry(expired.as_ref());
                return Err(Error::NotArmed);
            }
            Some(token) => {
                token.last_used = Instant::now();
                token.user.clone()
            }
            None => return Err(Error::NotArmed),
        };
        drop(slot);

        let ctx = AuthContext::new(Transport::Voice, user)
            .with_origin(VOICE_ORIGIN)
            .with_path(VOICE_PATH);
        tracing::debug!(user = %ctx.user, command, "executing voice command");
        self.facade.execute(&ctx, command)
    }

    fn log_expiry(&self, token: Option<&VoiceArmToken>) {
        if let Some(token) = token {
            tracing::info!(user = %token.user, age_secs = token.age().as_secs(), "voice arm expired");
            self.events.publish(VoiceEvent::Disarmed);
        }
    }
}

impl std::fmt::Debug for VoiceAuthBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceAuthBridge")
            .field("armed", &self.armed().map(|t| t.user))
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(AuthContext, String)>>,
    }

    impl CommandFacade for Recording {
        fn execute(&self, ctx: &AuthContext, text: &str) -> Result<String> {
            self.calls.lock().push((ctx.clone(), text.to_string()));
            Ok(format!("ran {text}"))
        }
    }

    fn bridge(idle: Option<Duration>) -> (VoiceAuthBridge, Arc<Recording>) {
        let facade = Arc::new(Recording::default());
        let bridge = VoiceAuthBridge::new(facade.clone(), idle, EventBus::new());
        (bridge, facade)
    }

    fn web(user: &str) -> AuthContext {
        AuthContext::new(Transport::Web, user).with_origin("10.0.0.2")
    }

    #[test]
    fn disarm_is_idempotent() {
        let (bridge, _) = bridge(None);
        assert!(!bridge.disarm());
        bridge.arm(&web("alice")).unwrap();
        assert!(bridge.disarm());
        assert!(!bridge.disarm());
        assert!(!bridge.is_armed());
    }

    #[test]
    fn internal_and_anonymous_callers_cannot_arm() {
        let (bridge, _) = bridge(None);
        for user in ["alice", "admin", "system"] {
            let err = bridge.arm(&AuthContext::new(Transport::Internal, user)).unwrap_err();
            assert_eq!(err.to_string(), "cannot arm voice from this transport/user");
            assert!(!bridge.is_armed());
        }
        for user in ["", "   "] {
            assert!(bridge.arm(&AuthContext::new(Transport::Serial, user)).is_err());
            assert!(!bridge.is_armed());
        }
    }

    #[test]
    fn second_arm_replaces_first() {
        let (bridge, _) = bridge(None);
        bridge.arm(&web("alice")).unwrap();
        bridge.arm(&AuthContext::new(Transport::Serial, "bob")).unwrap();

        let token = bridge.armed().unwrap();
        assert_eq!(token.user, "bob");
        assert_eq!(token.transport, Transport::Serial);
    }

    #[test]
    fn executes_with_voice_context() {
        let (bridge, facade) = bridge(None);
        assert!(matches!(
            bridge.execute_as_armed_user("lights kitchen on"),
            Err(Error::NotArmed)
        ));
        assert!(facade.calls.lock().is_empty());

        bridge.arm(&web("alice")).unwrap();
        assert_eq!(
            bridge.execute_as_armed_user("lights kitchen on").unwrap(),
            "ran lights kitchen on"
        );

        let calls = facade.calls.lock();
        let (ctx, text) = &calls[0];
        assert_eq!(ctx.transport, Transport::Voice);
        assert_eq!(ctx.user, "alice");
        assert_eq!(ctx.origin, VOICE_ORIGIN);
        assert_eq!(ctx.path, VOICE_PATH);
        assert_eq!(text, "lights kitchen on");
    }

    #[test]
    fn contention_reads_as_not_armed() {
        let (bridge, _) = bridge(None);
        bridge.arm(&web("alice")).unwrap();
        let _held = bridge.slot.lock();
        assert!(!bridge.is_armed());
    }

    #[test]
    fn idle_arm_expires() {
        let (bridge, facade) = bridge(Some(Duration::from_millis(30)));
        bridge.arm(&web("alice")).unwrap();
        assert!(bridge.is_armed());

        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(bridge.execute_as_armed_user("status"), Err(Error::NotArmed)));
        assert!(!bridge.is_armed());
        assert!(facade.calls.lock().is_empty());
    }

    #[test]
    fn use_extends_idle_window() {
        let (bridge, _) = bridge(Some(Duration::from_millis(300)));
        bridge.arm(&web("alice")).unwrap();
        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(100));
            bridge.execute_as_armed_user("status").unwrap();
        }
        assert!(bridge.is_armed());
    }

    #[tokio::test]
    async fn publishes_arm_events() {
        let facade = Arc::new(Recording::default());
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let bridge = VoiceAuthBridge::new(facade, None, events);

        bridge.arm(&web("alice")).unwrap();
        bridge.disarm();
        bridge.disarm();

        assert!(matches!(rx.recv().await.unwrap(), VoiceEvent::Armed { ref user, .. } if user == "alice"));
        assert_eq!(rx.recv().await.unwrap(), VoiceEvent::Disarmed);
        assert!(rx.try_recv().is_err());
    }
}
