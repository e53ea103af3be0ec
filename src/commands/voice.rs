//! `voice` commands: arming and the spoken global phrases

use std::sync::Weak;

use super::{CommandCall, CommandEntry, Dispatcher, bind};
use crate::Result;
use crate::device::Device;

pub(super) fn register(dispatcher: &Dispatcher, device: &Weak<Device>) {
    dispatcher.register(
        CommandEntry::new("voice", "Voice arming", |_| {
            Ok("usage: voice <arm|disarm|status>".to_string())
        }),
    );
    dispatcher.register(CommandEntry::new(
        "voice arm",
        "Run voice commands as the caller",
        bind(device, arm),
    ));
    dispatcher.register(CommandEntry::new(
        "voice disarm",
        "Stop running voice commands as anyone",
        bind(device, disarm),
    ));
    dispatcher.register(CommandEntry::new(
        "voice status",
        "Show who voice commands run as",
        bind(device, status),
    ));
    dispatcher.register(
        CommandEntry::new("voice cancel", "Abandon the spoken command", |_| {
            Ok("voice: cancelled".to_string())
        })
        .voice_global("cancel")
        .voice_global("nevermind"),
    );
    dispatcher.register(
        CommandEntry::new("voice help", "List what can be said next", bind(device, help))
            .voice_global("help"),
    );
}

fn arm(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    device.bridge().arm(call.ctx)?;
    Ok(format!("voice: armed user='{}'", call.ctx.user.trim()))
}

fn disarm(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    device.bridge().disarm();
    Ok("voice: disarmed".to_string())
}

fn status(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    Ok(device.bridge().armed().map_or_else(
        || "voice: not armed".to_string(),
        |token| format!("voice: armed user='{}' by={}", token.user, token.transport),
    ))
}

fn help(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    let grammar = device.engine().grammar();
    let categories = grammar.categories().join(", ");
    let globals = grammar.global_phrases().join(", ");
    Ok(format!(
        "say the wake word, then a category: {categories}\nat any point: {globals}"
    ))
}
