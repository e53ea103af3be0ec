//! `mic` commands: level, gain and recording

use std::fmt::Write as _;
use std::sync::Weak;

use super::{CommandCall, CommandEntry, Dispatcher, bind};
use crate::device::Device;
use crate::{Error, Result};

const RECORD_USAGE: &str = "mic record [start|stop|list|delete <name|all>]";

pub(super) fn register(dispatcher: &Dispatcher, device: &Weak<Device>) {
    dispatcher.register(CommandEntry::new("mic", "Microphone", |_| {
        Ok("usage: mic <level|gain [<0-100>]|record [start|stop|list|delete <name|all>]>".to_string())
    }));
    dispatcher.register(CommandEntry::new("mic level", "Input level 0-100", bind(device, level)));
    dispatcher.register(
        CommandEntry::new("mic gain", "Microphone gain", bind(device, gain))
            .usage("mic gain [<0-100>]"),
    );
    dispatcher.register(
        CommandEntry::new("mic record", "Record the microphone to WAV", bind(device, record))
            .usage(RECORD_USAGE),
    );
}

fn level(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    Ok(format!("mic level: {}%", device.arbiter().level()))
}

fn gain(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let words = call.words();
    match words.as_slice() {
        [] => {}
        [v] => {
            let percent = v
                .parse::<u8>()
                .map_err(|_| Error::InvalidArgument("gain must be 0-100".to_string()))?;
            device.tuning().write().set_mic_gain_percent(percent)?;
            device.persist_tuning()?;
            tracing::info!(percent, "microphone gain changed");
        }
        _ => return Err(Error::InvalidArgument("usage: mic gain [<0-100>]".to_string())),
    }
    Ok(format!("mic gain: {}%", device.tuning().read().mic_gain_percent))
}

fn record(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let words = call.words();
    match words.as_slice() {
        [] => {
            let recorder = device.recorder();
            Ok(if recorder.is_recording() {
                format!("recording: {} samples", recorder.samples_written())
            } else {
                "recording: idle".to_string()
            })
        }
        [action] if action.eq_ignore_ascii_case("start") => {
            let path = device.start_recording()?;
            Ok(format!("recording to {}", path.display()))
        }
        [action] if action.eq_ignore_ascii_case("stop") => {
            let summary = device.stop_recording()?;
            Ok(format!(
                "saved {} ({} samples, {:.1}s)",
                summary.path.display(),
                summary.samples,
                summary.duration().as_secs_f32()
            ))
        }
        [action] if action.eq_ignore_ascii_case("list") => {
            let recordings = device.recorder().list()?;
            if recordings.is_empty() {
                return Ok("no recordings".to_string());
            }
            let mut out = String::new();
            for r in &recordings {
                let _ = writeln!(out, "{} {} bytes", r.name, r.bytes);
            }
            Ok(out.trim_end().to_string())
        }
        [action, name] if action.eq_ignore_ascii_case("delete") => {
            let deleted = device.recorder().delete(name)?;
            Ok(match deleted.as_slice() {
                [one] if !name.eq_ignore_ascii_case("all") => format!("Deleted: {one}"),
                _ => format!("Deleted {} recording(s)", deleted.len()),
            })
        }
        _ => Err(Error::InvalidArgument(format!("usage: {RECORD_USAGE}"))),
    }
}
