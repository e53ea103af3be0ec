//! Microphone recording tests

use std::time::Duration;

use hwone_voice::audio::{SAMPLE_RATE, SessionKind};
use hwone_voice::{Error, VoiceEvent};

mod common;
use common::{serial, test_device, web};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_recording_header_matches_written_samples() {
    let rig = test_device();
    let mut events = rig.device.events().subscribe();

    let reply = rig.exec(&serial("alice"), "mic record start").unwrap();
    assert!(reply.starts_with("recording to "));
    assert_eq!(rig.device.arbiter().active_session(), Some(SessionKind::Recording));

    assert!(rig.pump_until(WAIT, |d| d.recorder().samples_written() >= 4096));
    let summary = rig.device.stop_recording().unwrap();
    assert!(summary.samples >= 4096);

    let bytes = std::fs::read(&summary.path).unwrap();
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
    let data_size = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]);
    assert_eq!(u64::from(data_size), summary.samples * 2);
    assert_eq!(bytes.len() as u64, 44 + summary.samples * 2);

    let reader = hound::WavReader::open(&summary.path).unwrap();
    assert_eq!(reader.spec(), hwone_voice::audio::wav_spec());
    assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
    assert_eq!(u64::from(reader.len()), summary.samples);

    assert_eq!(rig.device.arbiter().active_session(), None);

    let mut started = false;
    let mut stopped = None;
    while let Ok(event) = events.try_recv() {
        match event {
            VoiceEvent::RecordingStarted { .. } => started = true,
            VoiceEvent::RecordingStopped { samples, .. } => stopped = Some(samples),
            _ => {}
        }
    }
    assert!(started);
    assert_eq!(stopped, Some(summary.samples));
}

#[test]
fn test_recording_refused_while_recognition_runs() {
    let rig = test_device();
    rig.exec(&web("alice"), "sr start").unwrap();

    let err = rig.exec(&serial("alice"), "mic record start").unwrap_err();
    assert!(matches!(err, Error::Busy(_)));
    assert!(!rig.device.recorder().is_recording());

    rig.exec(&web("alice"), "sr stop").unwrap();
    rig.exec(&serial("alice"), "mic record start").unwrap();

    let err = rig.exec(&web("alice"), "sr start").unwrap_err();
    assert!(matches!(err, Error::Busy(_)));
    assert!(!rig.device.bridge().is_armed());

    rig.exec(&serial("alice"), "mic record stop").unwrap();
}

#[test]
fn test_record_list_and_idle_stop() {
    let rig = test_device();

    assert_eq!(rig.exec(&serial("alice"), "mic record list").unwrap(), "no recordings");
    assert_eq!(rig.exec(&serial("alice"), "mic record").unwrap(), "recording: idle");
    assert!(matches!(
        rig.exec(&serial("alice"), "mic record stop"),
        Err(Error::InvalidState(_))
    ));

    rig.exec(&serial("alice"), "mic record start").unwrap();
    assert!(rig.pump_until(WAIT, |d| d.recorder().samples_written() > 0));
    let reply = rig.exec(&serial("alice"), "mic record stop").unwrap();
    assert!(reply.starts_with("saved "));

    let listing = rig.exec(&serial("alice"), "mic record list").unwrap();
    assert_eq!(listing.lines().count(), 1);
    assert!(listing.starts_with("rec_"));
}

#[test]
fn test_recorder_writes_explicit_path() {
    let rig = test_device();
    let path = rig.dir.path().join("nested").join("take.wav");

    let recorder = rig.device.recorder();
    recorder.start_at(&path).unwrap();
    assert!(rig.pump_until(WAIT, |_| recorder.samples_written() >= 1024));
    let summary = recorder.stop().unwrap();

    assert_eq!(summary.path, path);
    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(u64::from(reader.len()), summary.samples);
}
