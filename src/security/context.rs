//! Caller identity attached to every command

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Channel a command arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Web,
    Serial,
    /// Device-internal callers (boot scripts, timers); implicitly privileged
    Internal,
    EspNow,
    #[serde(rename = "display")]
    LocalDisplay,
    Bluetooth,
    Mqtt,
    Voice,
}

impl Transport {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Serial => "serial",
            Self::Internal => "internal",
            Self::EspNow => "espnow",
            Self::LocalDisplay => "display",
            Self::Bluetooth => "bluetooth",
            Self::Mqtt => "mqtt",
            Self::Voice => "voice",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" | "http" => Ok(Self::Web),
            "serial" | "console" => Ok(Self::Serial),
            "internal" | "system" => Ok(Self::Internal),
            "espnow" => Ok(Self::EspNow),
            "display" | "oled" => Ok(Self::LocalDisplay),
            "bluetooth" | "ble" => Ok(Self::Bluetooth),
            "mqtt" => Ok(Self::Mqtt),
            "voice" => Ok(Self::Voice),
            other => Err(Error::InvalidArgument(format!("unknown transport: {other}"))),
        }
    }
}

/// Who is issuing a command, and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub transport: Transport,
    pub user: String,
    /// Network address or other origin tag
    pub origin: String,
    /// Request path or channel-specific location
    pub path: String,
    pub session: Option<String>,
}

impl AuthContext {
    #[must_use]
    pub fn new(transport: Transport, user: impl Into<String>) -> Self {
        Self {
            transport,
            user: user.into(),
            origin: String::new(),
            path: String::new(),
            session: None,
        }
    }

    /// Context for device-internal callers
    #[must_use]
    pub fn internal() -> Self {
        Self::new(Transport::Internal, "system").with_origin("internal")
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Whether a named user is attached
    #[must_use]
    pub fn has_user(&self) -> bool {
        !self.user.trim().is_empty()
    }
}
