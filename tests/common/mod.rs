//! Shared test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use hwone_voice::audio::{CHUNK_SAMPLES, MemoryFeed, MemoryInput};
use hwone_voice::config::UserConfig;
use hwone_voice::voice::{ScriptHandle, ScriptedRecognizer};
use hwone_voice::{AuthContext, Config, Device, Transport};
use tempfile::TempDir;

pub const ALICE_TOKEN: &str = "alice-token";
pub const ROOT_TOKEN: &str = "root-token";

/// A device wired to in-memory audio and a scripted recognizer
pub struct TestDevice {
    pub device: Arc<Device>,
    pub feed: MemoryFeed,
    pub script: ScriptHandle,
    pub dir: TempDir,
}

impl TestDevice {
    /// Feed audio chunks to the device until `done` holds or `timeout` passes
    pub fn pump_until(&self, timeout: Duration, done: impl Fn(&Device) -> bool) -> bool {
        let chunk = vec![200i16; CHUNK_SAMPLES];
        let start = Instant::now();
        while start.elapsed() < timeout {
            if done(&self.device) {
                return true;
            }
            if self.feed.pending() < CHUNK_SAMPLES * 4 {
                self.feed.push(&chunk);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        done(&self.device)
    }

    /// Feed audio until every scripted step has been consumed
    pub fn drain_script(&self) -> bool {
        let script = self.script.clone();
        self.pump_until(Duration::from_secs(5), move |_| script.pending() == 0)
    }

    pub fn exec(&self, ctx: &AuthContext, text: &str) -> hwone_voice::Result<String> {
        self.device.execute(ctx, text)
    }
}

/// Configuration with two users: `alice` and the admin `root`
pub fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::with_data_dir(dir);
    config.console_user = Some("alice".to_string());
    config.users = vec![
        UserConfig::new("alice", false).with_token(ALICE_TOKEN),
        UserConfig::new("root", true).with_token(ROOT_TOKEN),
    ];
    config
}

/// Build a test device with default test configuration
pub fn test_device() -> TestDevice {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = test_config(dir.path());
    test_device_with(config, dir)
}

/// Build a test device from explicit configuration
pub fn test_device_with(config: Config, dir: TempDir) -> TestDevice {
    let (input, feed) = MemoryInput::new();
    let (recognizer, script) = ScriptedRecognizer::new();
    let device = Device::new(config, Box::new(input), Box::new(recognizer))
        .expect("failed to build test device");
    TestDevice {
        device,
        feed,
        script,
        dir,
    }
}

pub fn web(user: &str) -> AuthContext {
    AuthContext::new(Transport::Web, user).with_origin("10.0.0.2")
}

pub fn serial(user: &str) -> AuthContext {
    AuthContext::new(Transport::Serial, user).with_origin("console")
}
