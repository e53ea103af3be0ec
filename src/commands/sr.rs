//! `sr` commands: speech recognition control and tuning

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Weak;

use super::{CommandCall, CommandEntry, Dispatcher, bind, parse_switch};
use crate::audio::{DynamicGainConfig, SnipReason, percent_for_gain};
use crate::config::tuning::parse_unit;
use crate::device::Device;
use crate::events::VoiceEvent;
use crate::voice::GrammarEntry;
use crate::{Error, Result};

const USAGE: &str = "\
usage: sr <command>
  start | stop | status | enable <on|off>
  confidence [<v> | category <v> | target <v>]
  accept [on|off|floor <v>|gap <v>|speech <on|off>]
  dyngain [on|off|min <v>|max <v>|target <v>|alpha <v>|reset]
  timeout [<1000-30000>]
  tuning [filters <on|off> | swgain <1.0-50.0>]
  model wake <path> | model grammar <path>
  cmds [list|add|del|clear|save|reload|sync]
  debug <stats|reset>
  snip <on|off|start|stop|status|config>";

const ACCEPT_USAGE: &str = "sr accept [on|off|floor <v>|gap <v>|speech <on|off>]";
const SNIP_CONFIG_USAGE: &str = "sr snip config [pre_ms <100-5000>|max_ms <1000-30000>|dest <dir>]";

pub(super) fn register(dispatcher: &Dispatcher, device: &Weak<Device>) {
    dispatcher.register(CommandEntry::new("sr", "Speech recognition", |_| {
        Ok(USAGE.to_string())
    }));
    dispatcher.register(
        CommandEntry::new("sr start", "Start recognition and arm voice", bind(device, start)),
    );
    dispatcher.register(
        CommandEntry::new("sr stop", "Stop recognition and disarm voice", bind(device, stop))
            .voice("voice", None, Some("close")),
    );
    dispatcher.register(CommandEntry::new("sr status", "Recognition status", bind(device, status)));
    dispatcher.register(
        CommandEntry::new("sr enable", "Allow or forbid recognition", bind(device, enable))
            .usage("sr enable <on|off>")
            .admin(),
    );
    dispatcher.register(
        CommandEntry::new("sr confidence", "Confidence thresholds", bind(device, confidence))
            .usage("sr confidence [<v>|category <v>|target <v>]"),
    );
    dispatcher.register(
        CommandEntry::new("sr accept", "Gap acceptance at the target stage", bind(device, accept))
            .usage(ACCEPT_USAGE),
    );
    dispatcher.register(
        CommandEntry::new("sr dyngain", "Dynamic gain", bind(device, dyngain))
            .usage("sr dyngain [on|off|min|max|target|alpha <v>|reset]"),
    );
    dispatcher.register(
        CommandEntry::new("sr timeout", "Stage timeout", bind(device, timeout))
            .usage("sr timeout [<1000-30000>]"),
    );
    dispatcher.register(
        CommandEntry::new("sr tuning", "Preprocessing settings", bind(device, tuning))
            .usage("sr tuning [filters <on|off>|swgain <v>]"),
    );
    dispatcher.register(
        CommandEntry::new("sr model", "Load wake model or grammar", bind(device, model))
            .usage("sr model <wake|grammar> <path>")
            .admin(),
    );
    register_cmds(dispatcher, device);
    register_debug(dispatcher, device);
    register_snip(dispatcher, device);
}

fn register_cmds(dispatcher: &Dispatcher, device: &Weak<Device>) {
    dispatcher.register(
        CommandEntry::new("sr cmds", "List the voice grammar", bind(device, cmds))
            .usage("sr cmds [list|add|del|clear|save|reload|sync]")
            .admin(),
    );
    dispatcher.register(
        CommandEntry::new("sr cmds list", "List the voice grammar", bind(device, cmds_list))
            .admin(),
    );
    dispatcher.register(
        CommandEntry::new("sr cmds add", "Add a voice command", bind(device, cmds_add))
            .usage("sr cmds add <category>[/<subcategory>]/<target> [= <command>]")
            .admin(),
    );
    dispatcher.register(
        CommandEntry::new("sr cmds del", "Delete a voice command", bind(device, cmds_del))
            .usage("sr cmds del <index|phrase>")
            .admin(),
    );
    dispatcher.register(
        CommandEntry::new("sr cmds clear", "Delete every voice command", bind(device, cmds_clear))
            .usage("sr cmds clear confirm")
            .admin(),
    );
    dispatcher.register(
        CommandEntry::new("sr cmds save", "Write the grammar file", bind(device, cmds_save))
            .admin(),
    );
    dispatcher.register(
        CommandEntry::new("sr cmds reload", "Reload the grammar file", bind(device, cmds_reload))
            .admin(),
    );
    dispatcher.register(
        CommandEntry::new(
            "sr cmds sync",
            "Rebuild the grammar from registered commands",
            bind(device, cmds_sync),
        )
        .admin(),
    );
}

fn register_debug(dispatcher: &Dispatcher, device: &Weak<Device>) {
    dispatcher.register(CommandEntry::new("sr debug", "Recognition counters", |_| {
        Ok("usage: sr debug <stats|reset>".to_string())
    }));
    dispatcher.register(
        CommandEntry::new("sr debug stats", "Show recognition counters", bind(device, debug_stats)),
    );
    dispatcher.register(
        CommandEntry::new("sr debug reset", "Zero recognition counters", bind(device, debug_reset)),
    );
}

fn register_snip(dispatcher: &Dispatcher, device: &Weak<Device>) {
    dispatcher.register(CommandEntry::new("sr snip", "Voice snippet capture", |_| {
        Ok("usage: sr snip <on|off|start|stop|status|config>".to_string())
    }));
    dispatcher.register(
        CommandEntry::new("sr snip on", "Capture a snippet on every wake", bind(device, snip_on)),
    );
    dispatcher.register(
        CommandEntry::new("sr snip off", "Stop capturing snippets", bind(device, snip_off)),
    );
    dispatcher.register(
        CommandEntry::new("sr snip start", "Start a snippet now", bind(device, snip_start)),
    );
    dispatcher.register(
        CommandEntry::new("sr snip stop", "Save the snippet in progress", bind(device, snip_stop)),
    );
    dispatcher.register(
        CommandEntry::new("sr snip status", "Snippet capture status", bind(device, snip_status)),
    );
    dispatcher.register(
        CommandEntry::new("sr snip config", "Snippet capture settings", bind(device, snip_config))
            .usage(SNIP_CONFIG_USAGE)
            .admin(),
    );
}

fn start(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    if device.start_recognition(call.ctx)? {
        Ok(format!("OK (voice armed as '{}')", call.ctx.user.trim()))
    } else {
        Ok("OK (voice NOT armed)".to_string())
    }
}

fn stop(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    device.stop_recognition()?;
    Ok("OK".to_string())
}

fn status(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    Ok(device.status().render())
}

fn enable(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let engine = device.engine();
    let Some(value) = call.words().first().copied() else {
        let state = if engine.is_enabled() { "enabled" } else { "disabled" };
        return Ok(format!("speech recognition {state}"));
    };
    let on = parse_switch(value).ok_or_else(|| usage("sr enable <on|off>"))?;
    engine.set_enabled(on)?;
    Ok(if on {
        "speech recognition enabled".to_string()
    } else {
        "speech recognition disabled".to_string()
    })
}

fn confidence(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let words = call.words();
    let mut tuning = device.tuning().write();
    match words.as_slice() {
        [] => {}
        ["category", v] => tuning.category_threshold = parse_unit(v)?,
        ["target", v] => tuning.command_threshold = parse_unit(v)?,
        [v] => {
            let v = parse_unit(v)?;
            tuning.category_threshold = v;
            tuning.command_threshold = v;
        }
        _ => return Err(usage("sr confidence [<v>|category <v>|target <v>]")),
    }
    if !words.is_empty() {
        tracing::info!(
            category = tuning.category_threshold,
            target = tuning.command_threshold,
            "confidence thresholds changed"
        );
    }
    Ok(format!(
        "confidence: category={:.2} target={:.2}",
        tuning.category_threshold, tuning.command_threshold
    ))
}

fn accept(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let words = call.words();
    let mut tuning = device.tuning().write();
    let gap = &mut tuning.gap_accept;
    match words.as_slice() {
        [] => {}
        ["floor", v] => gap.floor = parse_unit(v)?,
        ["gap", v] => gap.gap = parse_unit(v)?,
        ["speech", v] => {
            gap.require_speech = parse_switch(v).ok_or_else(|| usage(ACCEPT_USAGE))?;
        }
        [v] => gap.enabled = parse_switch(v).ok_or_else(|| usage(ACCEPT_USAGE))?,
        _ => return Err(usage(ACCEPT_USAGE)),
    }
    Ok(format!(
        "gap accept: {} floor={:.2} gap={:.2} speech={}",
        on_off(gap.enabled),
        gap.floor,
        gap.gap,
        on_off(gap.require_speech)
    ))
}

fn dyngain(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    const USAGE: &str = "sr dyngain [on|off|min <v>|max <v>|target <v>|alpha <v>|reset]";

    let words = call.words();
    let mut tuning = device.tuning().write();
    let cfg = &mut tuning.dynamic_gain;
    match words.as_slice() {
        [] => {}
        ["reset"] => *cfg = DynamicGainConfig::default(),
        ["min", v] => {
            let v = parse_positive(v)?;
            if v > cfg.max {
                return Err(Error::InvalidArgument(format!("min must not exceed max ({:.2})", cfg.max)));
            }
            cfg.min = v;
        }
        ["max", v] => {
            let v = parse_positive(v)?;
            if v < cfg.min {
                return Err(Error::InvalidArgument(format!("max must not be below min ({:.2})", cfg.min)));
            }
            cfg.max = v;
        }
        ["target", v] => {
            let v = parse_positive(v)?;
            if v > f32::from(i16::MAX) {
                return Err(Error::InvalidArgument("target must be 1-32767".to_string()));
            }
            cfg.target_peak = v;
        }
        ["alpha", v] => {
            let v = parse_unit(v)?;
            if v == 0.0 {
                return Err(Error::InvalidArgument("alpha must be above 0".to_string()));
            }
            cfg.alpha = v;
        }
        [v] => cfg.enabled = parse_switch(v).ok_or_else(|| usage(USAGE))?,
        _ => return Err(usage(USAGE)),
    }
    let cfg = *cfg;
    drop(tuning);

    let telemetry = device.engine().telemetry();
    Ok(format!(
        "dyngain: {} min={:.2} max={:.2} target={:.0} alpha={:.3} current={:.2} applied={} bypassed={}",
        on_off(cfg.enabled),
        cfg.min,
        cfg.max,
        cfg.target_peak,
        cfg.alpha,
        telemetry.dyn_gain_current,
        telemetry.dyn_gain_applied,
        telemetry.dyn_gain_bypassed
    ))
}

fn timeout(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let words = call.words();
    match words.as_slice() {
        [] => {}
        [v] => {
            let ms = v
                .parse::<u64>()
                .map_err(|_| usage("sr timeout [<1000-30000>]"))?;
            device.tuning().write().set_command_timeout_ms(ms)?;
            device.persist_tuning()?;
            tracing::info!(timeout_ms = ms, "command timeout changed");
        }
        _ => return Err(usage("sr timeout [<1000-30000>]")),
    }
    let current = device.tuning().read().command_timeout;
    Ok(format!("timeout: {} ms", current.as_millis()))
}

fn tuning(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let words = call.words();
    match words.as_slice() {
        [] => {}
        ["filters", v] => {
            let on = parse_switch(v).ok_or_else(|| usage("sr tuning filters <on|off>"))?;
            device.tuning().write().filters = on;
        }
        ["swgain", v] => {
            let gain = v
                .parse::<f32>()
                .ok()
                .filter(|g| (1.0..=50.0).contains(g))
                .ok_or_else(|| Error::InvalidArgument("swgain must be 1.0-50.0".to_string()))?;
            device
                .tuning()
                .write()
                .set_mic_gain_percent(percent_for_gain(gain))?;
            device.persist_tuning()?;
        }
        _ => return Err(usage("sr tuning [filters <on|off>|swgain <1.0-50.0>]")),
    }

    let tuning = device.tuning().read().clone();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "filters={} swgain={:.1} mic_gain={}%",
        on_off(tuning.filters),
        tuning.software_gain(),
        tuning.mic_gain_percent
    );
    let _ = writeln!(
        out,
        "confidence: category={:.2} target={:.2}",
        tuning.category_threshold, tuning.command_threshold
    );
    let _ = writeln!(
        out,
        "gap accept: {} floor={:.2} gap={:.2} speech={}",
        on_off(tuning.gap_accept.enabled),
        tuning.gap_accept.floor,
        tuning.gap_accept.gap,
        on_off(tuning.gap_accept.require_speech)
    );
    let _ = write!(
        out,
        "dyngain: {} timeout={} ms",
        on_off(tuning.dynamic_gain.enabled),
        tuning.command_timeout.as_millis()
    );
    Ok(out)
}

fn model(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let (kind, path) = call
        .args
        .split_once(char::is_whitespace)
        .map(|(k, p)| (k, p.trim()))
        .filter(|(_, p)| !p.is_empty())
        .ok_or_else(|| usage("sr model <wake|grammar> <path>"))?;

    let path = Path::new(path);
    match kind.to_ascii_lowercase().as_str() {
        "wake" => {
            device.engine().load_wake_model(path)?;
            Ok(format!("wake model loaded: {}", path.display()))
        }
        "grammar" => {
            let entries = device.engine().load_grammar(path)?;
            Ok(format!("grammar loaded: {entries} entries"))
        }
        _ => Err(usage("sr model <wake|grammar> <path>")),
    }
}

fn cmds(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    if !call.words().is_empty() {
        return Err(usage("sr cmds [list|add|del|clear|save|reload|sync]"));
    }
    cmds_list(device, call)
}

fn cmds_list(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    let grammar = device.engine().grammar();
    if grammar.is_empty() {
        return Ok("no voice commands".to_string());
    }
    let mut out = format!("{} voice commands:", grammar.len());
    for (i, e) in grammar.entries().iter().enumerate() {
        let _ = write!(out, "\n{:>3}. {:<32} -> {}", i + 1, e.spoken(), e.command_string());
    }
    Ok(out)
}

fn cmds_add(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    const USAGE: &str = "sr cmds add <category>[/<subcategory>]/<target> [= <command>]";

    let (spoken, command) = match call.args.split_once('=') {
        Some((spoken, command)) => (spoken.trim(), Some(command.trim())),
        None => (call.args, None),
    };
    if spoken.is_empty() || command.is_some_and(str::is_empty) {
        return Err(usage(USAGE));
    }
    let mut entry = GrammarEntry::from_spoken(spoken)?;
    if let Some(command) = command {
        entry = entry.with_command(command);
    }
    let entries = device.engine().edit_grammar(|g| g.push(entry))?;
    Ok(format!("OK ({entries} entries)"))
}

fn cmds_del(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let arg = call.args;
    if arg.is_empty() {
        return Err(usage("sr cmds del <index|phrase>"));
    }
    let removed = device.engine().edit_grammar(|g| match arg.parse::<usize>() {
        Ok(0) => Err(Error::InvalidArgument("entries are numbered from 1".to_string())),
        Ok(index) => g.remove(index - 1),
        Err(_) => g.remove_spoken(arg),
    })?;
    Ok(format!("OK (removed {})", removed.spoken()))
}

fn cmds_clear(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    if call.args != "confirm" {
        return Err(usage("sr cmds clear confirm"));
    }
    device.engine().edit_grammar(|g| {
        g.clear();
        Ok(())
    })?;
    Ok("OK (grammar cleared)".to_string())
}

fn cmds_save(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    let saved = device.save_grammar()?;
    Ok(format!("OK (saved {saved})"))
}

fn cmds_reload(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    let loaded = device.reload_grammar()?;
    Ok(format!("OK (loaded {loaded})"))
}

fn cmds_sync(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    let synced = device.sync_grammar()?;
    Ok(format!("OK (synced {synced})"))
}

fn debug_stats(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    let t = device.engine().telemetry();
    let reads = device.arbiter().read_stats();
    tracing::info!(
        reads_ok = reads.ok,
        read_errors = reads.errors,
        reads_empty = reads.empty,
        detect_calls = t.detect_calls,
        detections = t.detections,
        low_confidence_rejects = t.low_confidence_rejects,
        gap_accepts = t.gap_accepts,
        "recognition stats"
    );
    Ok(format!(
        "reads: ok={} errors={} empty={}\n\
         detect: calls={} detections={}\n\
         rejects: low_confidence={} gap_accepts={}\n\
         dyngain: current={:.2} applied={} bypassed={}\n\
         wakes={} commands={}",
        reads.ok,
        reads.errors,
        reads.empty,
        t.detect_calls,
        t.detections,
        t.low_confidence_rejects,
        t.gap_accepts,
        t.dyn_gain_current,
        t.dyn_gain_applied,
        t.dyn_gain_bypassed,
        t.wake_count,
        t.command_count
    ))
}

fn debug_reset(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    device.reset_debug_stats()?;
    Ok("OK (stats reset)".to_string())
}

fn require_running(device: &Device) -> Result<()> {
    if device.engine().is_running() {
        Ok(())
    } else {
        Err(Error::InvalidState("SR not running. Run: sr start".to_string()))
    }
}

fn snip_on(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    require_running(device)?;
    let mut snip = device.snip().lock();
    snip.set_enabled(true);
    Ok(format!(
        "OK (snip on, pre_ms={} max_ms={})",
        snip.config().pre_roll_ms,
        snip.config().max_ms
    ))
}

fn snip_off(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    device.snip().lock().set_enabled(false);
    Ok("OK (snip off)".to_string())
}

fn snip_start(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    require_running(device)?;
    let id = device.snip().lock().begin(SnipReason::Manual)?;
    Ok(format!("OK (snippet {id} started)"))
}

fn snip_stop(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    let saved = device.snip().lock().finish("stopped")?;
    let path = saved.ok_or_else(|| Error::InvalidState("No active snippet session".to_string()))?;
    device.events().publish(VoiceEvent::SnippetSaved {
        path: path.display().to_string(),
    });
    Ok(format!("saved {}", path.display()))
}

fn snip_status(device: &Device, _call: &CommandCall<'_>) -> Result<String> {
    Ok(device.snip().lock().render())
}

fn snip_config(device: &Device, call: &CommandCall<'_>) -> Result<String> {
    let mut snip = device.snip().lock();
    match call.args.split_once(char::is_whitespace) {
        None if call.args.is_empty() => {}
        Some(("pre_ms", v)) => snip.set_pre_roll_ms(parse_ms(v.trim())?)?,
        Some(("max_ms", v)) => snip.set_max_ms(parse_ms(v.trim())?)?,
        Some(("dest", dir)) => snip.set_dir(dir.trim()),
        _ => return Err(usage(SNIP_CONFIG_USAGE)),
    }
    let config = snip.config();
    Ok(format!(
        "pre_ms={} max_ms={} dest={}",
        config.pre_roll_ms,
        config.max_ms,
        config.dir.display()
    ))
}

fn parse_ms(value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| Error::InvalidArgument(format!("expected milliseconds, got '{value}'")))
}

fn parse_positive(value: &str) -> Result<f32> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| *v > 0.0 && v.is_finite())
        .ok_or_else(|| Error::InvalidArgument(format!("expected a positive number, got '{value}'")))
}

const fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn usage(text: &str) -> Error {
    Error::InvalidArgument(format!("usage: {text}"))
}

#[cfg(test)]
mod tests {
    use super::super::testing::Rig;
    use crate::Error;
    use crate::audio::CHUNK_SAMPLES;

    fn start(rig: &Rig) {
        rig.feed.push(&vec![0; CHUNK_SAMPLES * 16]);
        rig.run("sr start").unwrap();
    }

    #[test]
    fn accept_speech_toggles_the_gate() {
        let rig = Rig::new();
        let reply = rig.run("sr accept speech on").unwrap();
        assert!(reply.ends_with("speech=on"), "{reply}");
        assert!(rig.device.tuning().read().gap_accept.require_speech);

        assert!(rig.run("sr accept speech maybe").is_err());
        assert!(rig.run("sr accept speech off").unwrap().ends_with("speech=off"));
        assert!(rig.run("sr tuning").unwrap().contains("speech=off"));
    }

    #[test]
    fn cmds_list_numbers_entries() {
        let rig = Rig::new();
        let entries = rig.device.engine().grammar().len();
        let list = rig.run("sr cmds").unwrap();
        assert!(list.starts_with(&format!("{entries} voice commands:")));
        assert!(list.contains("*/cancel"));
        assert_eq!(rig.run("sr cmds list").unwrap(), list);
        assert!(rig.run("sr cmds frobnicate").is_err());
    }

    #[test]
    fn cmds_add_and_del() {
        let rig = Rig::new();
        let before = rig.device.engine().grammar().len();

        assert_eq!(
            rig.run("sr cmds add Fan / Bedroom / On = fan on bedroom").unwrap(),
            format!("OK ({} entries)", before + 1)
        );
        assert_eq!(
            rig.run("sr cmds add reboot = system reboot").unwrap(),
            format!("OK ({} entries)", before + 2)
        );
        assert!(rig.run("sr cmds add fan/bedroom/on").is_err());
        assert!(rig.run("sr cmds add fan/on =").is_err());
        assert!(matches!(
            rig.run_as("alice", "sr cmds add fan/off"),
            Err(Error::Unauthorized(_))
        ));

        let grammar = rig.device.engine().grammar();
        let fan = grammar.resolve("fan", Some("bedroom"), "on").unwrap();
        assert_eq!(fan.command_string(), "fan on bedroom");
        assert!(grammar.single_stage("reboot").is_some());
        let list = rig.run("sr cmds list").unwrap();
        assert!(list.contains("fan/bedroom/on"));
        assert!(list.contains("-> system reboot"));

        assert_eq!(
            rig.run(&format!("sr cmds del {}", before + 2)).unwrap(),
            "OK (removed reboot)"
        );
        assert_eq!(rig.run("sr cmds del fan/bedroom/on").unwrap(), "OK (removed fan/bedroom/on)");
        assert!(rig.run("sr cmds del fan/bedroom/on").is_err());
        assert!(rig.run("sr cmds del 0").is_err());
        assert!(rig.run("sr cmds del").is_err());
        assert_eq!(rig.device.engine().grammar().len(), before);
    }

    #[test]
    fn cmds_clear_needs_confirm() {
        let rig = Rig::new();
        assert!(rig.run("sr cmds clear").is_err());
        assert!(!rig.device.engine().grammar().is_empty());

        assert_eq!(rig.run("sr cmds clear confirm").unwrap(), "OK (grammar cleared)");
        assert_eq!(rig.run("sr cmds").unwrap(), "no voice commands");
        assert!(matches!(rig.run("sr cmds save"), Err(Error::Grammar(_))));
    }

    #[test]
    fn cmds_save_and_reload() {
        let rig = Rig::new();
        assert!(rig.run("sr cmds reload").is_err());

        rig.run("sr cmds add fan/on").unwrap();
        let entries = rig.device.engine().grammar().len();
        assert_eq!(rig.run("sr cmds save").unwrap(), format!("OK (saved {entries})"));
        assert!(rig.dir.path().join("grammar.toml").exists());

        rig.run("sr cmds del fan/on").unwrap();
        assert!(!rig.device.engine().grammar().has_category("fan"));
        assert_eq!(rig.run("sr cmds reload").unwrap(), format!("OK (loaded {entries})"));
        assert!(rig.device.engine().grammar().has_category("fan"));
    }

    #[test]
    fn cmds_sync_restores_registry_grammar() {
        let rig = Rig::new();
        let registry = rig.device.dispatcher().grammar().unwrap();
        rig.run("sr cmds clear confirm").unwrap();

        assert_eq!(
            rig.run("sr cmds sync").unwrap(),
            format!("OK (synced {})", registry.len())
        );
        assert_eq!(rig.device.engine().grammar(), registry);
    }

    #[test]
    fn debug_stats_and_reset() {
        let rig = Rig::new();
        assert_eq!(rig.run("sr debug").unwrap(), "usage: sr debug <stats|reset>");

        let stats = rig.run("sr debug stats").unwrap();
        assert!(stats.contains("detect: calls=0 detections=0"), "{stats}");
        assert!(stats.contains("rejects: low_confidence=0 gap_accepts=0"));

        assert_eq!(rig.run("sr debug reset").unwrap(), "OK (stats reset)");
        assert!(rig.run("sr debug stats").unwrap().starts_with("reads: ok=0 errors=0 empty=0"));
    }

    #[test]
    fn snip_needs_running_recognition() {
        let rig = Rig::new();
        assert!(matches!(rig.run("sr snip on"), Err(Error::InvalidState(_))));
        assert!(matches!(rig.run("sr snip start"), Err(Error::InvalidState(_))));
        assert_eq!(
            rig.run("sr snip").unwrap(),
            "usage: sr snip <on|off|start|stop|status|config>"
        );

        start(&rig);
        assert!(rig.run("sr snip on").unwrap().starts_with("OK (snip on"));
        assert!(rig.run("sr snip status").unwrap().starts_with("snip: on"));
        assert_eq!(rig.run("sr snip off").unwrap(), "OK (snip off)");
        assert!(rig.run("sr snip status").unwrap().starts_with("snip: off"));
    }

    #[test]
    fn snip_start_and_stop_save_a_wav() {
        let rig = Rig::new();
        start(&rig);
        let idle = rig.run("sr snip stop").unwrap_err();
        assert_eq!(idle.to_string(), "invalid state: No active snippet session");

        assert_eq!(rig.run("sr snip start").unwrap(), "OK (snippet 1 started)");
        assert!(rig.run("sr snip start").is_err());
        let saved = rig.run("sr snip stop").unwrap();
        let path = std::path::Path::new(saved.strip_prefix("saved ").unwrap());
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "manual_1_stopped.wav");
        assert!(path.starts_with(rig.dir.path().join("snips")));
        assert!(rig.run("sr snip status").unwrap().contains("saved: 1"));
    }

    #[test]
    fn snip_config_limits_and_admin() {
        let rig = Rig::new();
        assert!(rig.run("sr snip config").unwrap().starts_with("pre_ms=800 max_ms=6000"));
        assert!(rig.run("sr snip config pre_ms 50").is_err());
        assert!(rig.run("sr snip config max_ms lots").is_err());
        assert!(rig.run("sr snip config pre_ms 400").unwrap().starts_with("pre_ms=400"));

        let dest = rig.dir.path().join("clips");
        let reply = rig.run(&format!("sr snip config dest {}", dest.display())).unwrap();
        assert!(reply.ends_with(&format!("dest={}", dest.display())));
        assert!(matches!(
            rig.run_as("alice", "sr snip config pre_ms 500"),
            Err(Error::Unauthorized(_))
        ));
    }
}
