//! Security module for caller identity, users, and voice arming

pub mod bridge;
pub mod context;
pub mod users;

pub use bridge::{VOICE_ORIGIN, VOICE_PATH, VoiceArmToken, VoiceAuthBridge};
pub use context::{AuthContext, Transport};
pub use users::{UserDirectory, UserRecord};
