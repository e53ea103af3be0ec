//! Device fixture for command handler tests

use std::sync::Arc;

use crate::Result;
use crate::audio::{MemoryFeed, MemoryInput};
use crate::config::{Config, UserConfig};
use crate::device::Device;
use crate::security::{AuthContext, Transport};
use crate::voice::ScriptedRecognizer;

pub(super) struct Rig {
    pub device: Arc<Device>,
    pub feed: MemoryFeed,
    pub dir: tempfile::TempDir,
}

impl Rig {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_data_dir(dir.path());
        config.users = vec![UserConfig::new("alice", false), UserConfig::new("root", true)];
        let (input, feed) = MemoryInput::new();
        let (recognizer, _script) = ScriptedRecognizer::new();
        let device = Device::new(config, Box::new(input), Box::new(recognizer)).unwrap();
        Self {
            device,
            feed,
            dir,
        }
    }

    /// Run as the admin user
    pub fn run(&self, text: &str) -> Result<String> {
        self.run_as("root", text)
    }

    pub fn run_as(&self, user: &str, text: &str) -> Result<String> {
        self.device
            .execute(&AuthContext::new(Transport::Serial, user), text)
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.device.shutdown();
    }
}
