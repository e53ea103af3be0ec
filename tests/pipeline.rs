//! End-to-end voice pipeline tests

use std::sync::Arc;
use std::time::Duration;

use hwone_voice::commands::CommandEntry;
use hwone_voice::security::Transport;
use hwone_voice::voice::{ScriptStep, VoiceState};
use hwone_voice::{AuthContext, Error};
use parking_lot::Mutex;

mod common;
use common::{TestDevice, serial, test_device, web};

const WAIT: Duration = Duration::from_secs(5);

const GRAMMAR: &str = r#"
[[entry]]
category = "lights"
subcategory = "kitchen"
target = "on"

[[entry]]
category = "lights"
subcategory = "kitchen"
target = "off"

[[entry]]
category = "battery"
target = "status"

[[entry]]
category = "report"
command = "battery"

[[entry]]
category = "secrets"
target = "dump"
command = "sr cmds"

[[entry]]
category = "*"
target = "cancel"
command = "voice cancel"
"#;

type Calls = Arc<Mutex<Vec<(AuthContext, String)>>>;

/// Device with a lights grammar and a `lights` command that records calls
fn lights_device() -> (TestDevice, Calls) {
    let rig = test_device();
    let calls: Calls = Arc::default();

    let seen = Arc::clone(&calls);
    rig.device.dispatcher().register(CommandEntry::new(
        "lights",
        "Switch lights",
        move |call| {
            seen.lock().push((call.ctx.clone(), call.args.to_string()));
            Ok(format!("lights: {}", call.args))
        },
    ));
    rig.device.dispatcher().register(CommandEntry::new(
        "battery",
        "Battery report",
        |_| Ok("battery: 87%".to_string()),
    ));

    let path = rig.dir.path().join("grammar.toml");
    std::fs::write(&path, GRAMMAR).unwrap();
    let reply = rig
        .exec(&serial("root"), &format!("sr model grammar {}", path.display()))
        .unwrap();
    assert_eq!(reply, "grammar loaded: 6 entries");

    (rig, calls)
}

#[test]
fn test_armed_composite_command_runs_as_alice() {
    let (rig, calls) = lights_device();

    let reply = rig.exec(&web("alice"), "sr start").unwrap();
    assert_eq!(reply, "OK (voice armed as 'alice')");

    rig.script.push([
        ScriptStep::Wake,
        ScriptStep::phrase("lights", 0.91),
        ScriptStep::phrase("kitchen", 0.83),
        ScriptStep::phrase("on", 0.74),
    ]);
    assert!(rig.pump_until(WAIT, |d| d.status().command_count == 1));

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    let (ctx, args) = &calls[0];
    assert_eq!(ctx.transport, Transport::Voice);
    assert_eq!(ctx.user, "alice");
    assert_eq!(ctx.origin, "voice");
    assert_eq!(args, "kitchen on");

    let status = rig.device.status();
    assert_eq!(status.state, VoiceState::Idle);
    assert_eq!(status.wake_count, 1);
    assert_eq!(status.last_command.as_deref(), Some("lights kitchen on"));
    assert!((status.last_confidence - 0.74).abs() < 1e-6);
    assert!(status.voice_armed);

    rig.exec(&web("alice"), "sr stop").unwrap();
}

#[test]
fn test_unarmed_sequence_is_not_dispatched() {
    let (rig, calls) = lights_device();

    rig.device.engine().start().unwrap();
    assert!(!rig.device.bridge().is_armed());
    assert!(matches!(
        rig.device.bridge().execute_as_armed_user("lights kitchen on"),
        Err(Error::NotArmed)
    ));

    let mut events = rig.device.events().subscribe();
    rig.script.push([
        ScriptStep::Wake,
        ScriptStep::phrase("lights", 0.9),
        ScriptStep::phrase("kitchen", 0.9),
        ScriptStep::phrase("on", 0.9),
    ]);
    assert!(rig.pump_until(WAIT, |d| d.status().last_command.is_some()));

    assert!(calls.lock().is_empty());
    let status = rig.device.status();
    assert_eq!(status.command_count, 0);
    assert_eq!(status.last_command.as_deref(), Some("lights kitchen on"));

    let mut response = None;
    while let Ok(event) = events.try_recv() {
        if let hwone_voice::VoiceEvent::Command { ok, response: r, .. } = event {
            assert!(!ok);
            response = Some(r);
        }
    }
    assert_eq!(response.as_deref(), Some("Voice not armed"));

    rig.device.engine().stop().unwrap();
}

#[test]
fn test_two_level_category_dispatches() {
    let (rig, _calls) = lights_device();
    rig.exec(&web("alice"), "sr start").unwrap();

    rig.script.push([
        ScriptStep::Wake,
        ScriptStep::phrase("battery", 0.8),
        ScriptStep::phrase("status", 0.8),
    ]);
    assert!(rig.pump_until(WAIT, |d| d.status().command_count == 1));
    assert_eq!(rig.device.status().last_command.as_deref(), Some("battery status"));

    rig.exec(&web("alice"), "sr stop").unwrap();
}

#[test]
fn test_single_stage_category_dispatches_on_first_phrase() {
    let (rig, _calls) = lights_device();
    rig.exec(&web("alice"), "sr start").unwrap();
    let mut events = rig.device.events().subscribe();

    rig.script.push([ScriptStep::Wake, ScriptStep::phrase("report", 0.8)]);
    assert!(rig.pump_until(WAIT, |d| d.status().command_count == 1));

    let status = rig.device.status();
    assert_eq!(status.last_command.as_deref(), Some("report"));
    assert_eq!(status.state, VoiceState::Idle);

    let mut response = None;
    while let Ok(event) = events.try_recv() {
        if let hwone_voice::VoiceEvent::Command {
            command, response: r, ok, ..
        } = event
        {
            assert!(ok);
            assert_eq!(command, "battery");
            response = Some(r);
        }
    }
    assert_eq!(response.as_deref(), Some("battery: 87%"));

    rig.exec(&web("alice"), "sr stop").unwrap();
}

#[test]
fn test_admin_command_refused_over_voice_for_non_admin() {
    let (rig, _calls) = lights_device();
    rig.exec(&web("alice"), "sr start").unwrap();

    let mut events = rig.device.events().subscribe();
    rig.script.push([
        ScriptStep::Wake,
        ScriptStep::phrase("secrets", 0.9),
        ScriptStep::phrase("dump", 0.9),
    ]);
    assert!(rig.pump_until(WAIT, |d| d.status().last_command.is_some()));
    assert_eq!(rig.device.status().command_count, 0);

    let mut refused = false;
    while let Ok(event) = events.try_recv() {
        if let hwone_voice::VoiceEvent::Command { ok, response, .. } = event {
            assert!(!ok);
            assert!(response.starts_with("Admin access required"));
            refused = true;
        }
    }
    assert!(refused);

    rig.exec(&web("alice"), "sr stop").unwrap();
}

#[test]
fn test_low_confidence_category_does_not_advance() {
    let (rig, _calls) = lights_device();
    rig.exec(&web("alice"), "sr start").unwrap();

    rig.script.push([ScriptStep::Wake, ScriptStep::phrase("lights", 0.05)]);
    assert!(rig.pump_until(WAIT, |d| d.status().low_confidence_rejects == 1));

    let status = rig.device.status();
    assert_eq!(status.state, VoiceState::AwaitingCategory);
    assert!(status.wake_active);

    rig.exec(&web("alice"), "sr stop").unwrap();
}

#[test]
fn test_voice_close_stops_recognition() {
    let rig = test_device();
    rig.exec(&web("alice"), "sr start").unwrap();
    assert!(rig.device.engine().is_running());

    rig.script.push([
        ScriptStep::Wake,
        ScriptStep::phrase("voice", 0.9),
        ScriptStep::phrase("close", 0.9),
    ]);
    assert!(rig.pump_until(WAIT, |d| !d.engine().is_running() && !d.status().running));
    assert!(!rig.device.bridge().is_armed());
    assert!(!rig.device.status().running);
}

#[test]
fn test_stop_disarms_and_releases_microphone() {
    let rig = test_device();
    rig.exec(&web("alice"), "sr start").unwrap();
    assert!(rig.device.bridge().is_armed());
    assert!(rig.device.arbiter().active_session().is_some());

    assert_eq!(rig.exec(&web("alice"), "sr stop").unwrap(), "OK");
    assert!(!rig.device.bridge().is_armed());
    assert_eq!(rig.device.arbiter().active_session(), None);
}

#[test]
fn test_start_without_identity_does_not_arm() {
    let rig = test_device();
    let reply = rig.exec(&AuthContext::internal(), "sr start").unwrap();
    assert_eq!(reply, "OK (voice NOT armed)");
    assert!(rig.device.engine().is_running());
    assert!(!rig.device.bridge().is_armed());
    rig.exec(&AuthContext::internal(), "sr stop").unwrap();
}

#[test]
fn test_failed_grammar_load_keeps_previous() {
    let (rig, _calls) = lights_device();
    let err = rig
        .exec(&serial("root"), "sr model grammar /nonexistent/grammar.toml")
        .unwrap_err();
    assert!(err.to_string().starts_with("load failed"));
    assert!(rig.device.engine().grammar().has_category("lights"));

    let err = rig
        .exec(&serial("root"), "sr model wake /nonexistent/wake.bin")
        .unwrap_err();
    assert!(matches!(err, Error::ModelLoad(_)));
}
