use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hwone_voice::audio::{AudioInput, CpalInput, WavInput};
use hwone_voice::config::SettingsStore;
use hwone_voice::voice::{EnergyRecognizer, Recognizer, ScriptedRecognizer};
use hwone_voice::{Config, Daemon, Device};

/// hwone-voice - on-device voice command pipeline
#[derive(Parser)]
#[command(name = "hwone-voice", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/hwone/voice/config.toml)
    #[arg(short, long, env = "HWONE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run {
        /// Read audio from a WAV file instead of the microphone
        #[arg(long)]
        wav: Option<PathBuf>,

        /// Drive recognition from a TOML script of recognizer steps
        #[arg(long, env = "HWONE_RECOGNIZER_SCRIPT")]
        script: Option<PathBuf>,

        /// Port to listen on
        #[arg(long, env = "HWONE_PORT")]
        port: Option<u16>,

        /// Do not read commands from stdin
        #[arg(long)]
        no_console: bool,
    },
    /// Record the microphone to a WAV file
    Record {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },
    /// Show the microphone level
    Level {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,
    },
    /// Show configuration, persisted tuning and recordings
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,hwone_voice=info",
        1 => "info,hwone_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run {
        wav: None,
        script: None,
        port: None,
        no_console: false,
    }) {
        Command::Run {
            wav,
            script,
            port,
            no_console,
        } => run_daemon(config, wav, script, port, no_console).await,
        Command::Record { seconds } => record(config, seconds).await,
        Command::Level { seconds } => level(config, seconds).await,
        Command::Status => status(&config),
    }
}

async fn run_daemon(
    mut config: Config,
    wav: Option<PathBuf>,
    script: Option<PathBuf>,
    port: Option<u16>,
    no_console: bool,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.api.port = port;
    }

    let input = open_input(wav.as_deref())?;
    let recognizer: Box<dyn Recognizer> = if let Some(path) = &script {
        let (recognizer, _handle) = ScriptedRecognizer::from_file(path)?;
        tracing::info!(path = %path.display(), "scripted recognizer");
        Box::new(recognizer)
    } else {
        Box::new(EnergyRecognizer::new())
    };

    let device = Device::new(config, input, recognizer)?;
    tracing::info!("hwone-voice ready - send 'sr start' to begin listening");

    let daemon = Daemon::new(device);
    let daemon = if no_console {
        daemon.without_console()
    } else {
        daemon
    };
    daemon.run().await?;
    Ok(())
}

/// Record the microphone for `seconds`
async fn record(config: Config, seconds: u64) -> anyhow::Result<()> {
    let device = Device::new(config, open_input(None)?, Box::new(EnergyRecognizer::new()))?;

    let path = device.start_recording()?;
    println!("Recording to {} for {seconds} seconds...", path.display());
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    let summary = tokio::task::spawn_blocking(move || device.stop_recording()).await??;
    println!(
        "Saved {} ({} samples, {:.1}s)",
        summary.path.display(),
        summary.samples,
        summary.duration().as_secs_f32()
    );
    Ok(())
}

/// Print the microphone level twice a second
async fn level(config: Config, seconds: u64) -> anyhow::Result<()> {
    let device = Device::new(config, open_input(None)?, Box::new(EnergyRecognizer::new()))?;
    println!("Speak into your microphone!\n");

    for _ in 0..seconds * 2 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let device = std::sync::Arc::clone(&device);
        let level = tokio::task::spawn_blocking(move || device.arbiter().level()).await?;
        let meter = "#".repeat(usize::from(level / 2));
        println!("{level:3}% [{meter:<50}]");
    }
    Ok(())
}

fn status(config: &Config) -> anyhow::Result<()> {
    let persisted = SettingsStore::new(&config.settings_path).load();

    println!("data dir:       {}", config.data_dir.display());
    println!("settings:       {}", config.settings_path.display());
    println!(
        "mic gain:       {}%",
        persisted.mic_gain_percent.unwrap_or(config.audio.mic_gain_percent)
    );
    println!(
        "timeout:        {} ms",
        persisted
            .command_timeout_ms
            .unwrap_or(config.voice.command_timeout_ms)
    );
    println!("users:          {}", config.users.len());
    println!(
        "api:            {}",
        if config.api.enabled {
            format!("port {}", config.api.port)
        } else {
            "disabled".to_string()
        }
    );

    let recordings = match std::fs::read_dir(&config.recordings_dir) {
        Ok(entries) => entries.filter_map(Result::ok).count(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };
    println!("recordings:     {recordings} in {}", config.recordings_dir.display());
    Ok(())
}

fn open_input(wav: Option<&std::path::Path>) -> anyhow::Result<Box<dyn AudioInput>> {
    Ok(match wav {
        Some(path) => Box::new(WavInput::open(path)?),
        None => Box::new(CpalInput::open()?),
    })
}
