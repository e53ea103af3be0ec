//! Daemon - runs the device with its transports
//!
//! Starts the HTTP API, a line-oriented console on stdin and an event
//! logger, then waits for ctrl-c and shuts the device down.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::api::ApiServer;
use crate::device::Device;
use crate::events::VoiceEvent;
use crate::security::{AuthContext, Transport};
use crate::Result;

/// The voice daemon
pub struct Daemon {
    device: Arc<Device>,
    console: bool,
}

impl Daemon {
    #[must_use]
    pub const fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            console: true,
        }
    }

    /// Disable the stdin console
    #[must_use]
    pub const fn without_console(mut self) -> Self {
        self.console = false;
        self
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if shutdown fails
    pub async fn run(self) -> Result<()> {
        tokio::spawn(log_events(Arc::clone(&self.device)));

        let api = self.device.api_config().clone();
        let server = api
            .enabled
            .then(|| ApiServer::new(Arc::clone(&self.device), api.port).spawn());

        if self.device.autostart() {
            if let Err(e) = self.device.engine().start() {
                tracing::error!(error = %e, "recognition autostart failed");
            }
        }

        let console = self
            .console
            .then(|| tokio::spawn(run_console(Arc::clone(&self.device))));

        tracing::info!(api = api.enabled, port = api.port, "daemon running");

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
        }

        if let Some(console) = console {
            console.abort();
        }
        if let Some(server) = server {
            server.abort();
        }

        let device = Arc::clone(&self.device);
        if let Err(e) = tokio::task::spawn_blocking(move || device.shutdown()).await {
            tracing::error!(error = %e, "shutdown task failed");
        }
        Ok(())
    }
}

/// Read commands from stdin and run them as the console user
async fn run_console(device: Arc<Device>) {
    let user = device.console_user().unwrap_or_default().to_string();
    if user.is_empty() {
        tracing::warn!("no console user configured; console commands will be refused");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("console closed");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let ctx = AuthContext::new(Transport::Serial, user.clone()).with_origin("console");
        let device = Arc::clone(&device);
        let reply = tokio::task::spawn_blocking(move || device.execute(&ctx, &line)).await;
        match reply {
            Ok(Ok(text)) => println!("{text}"),
            Ok(Err(e)) => println!("Error: {e}"),
            Err(e) => tracing::error!(error = %e, "console command task failed"),
        }
    }
}

/// Log voice events as they happen
async fn log_events(device: Arc<Device>) {
    let mut rx = device.events().subscribe();
    loop {
        match rx.recv().await {
            Ok(event @ (VoiceEvent::Armed { .. } | VoiceEvent::Disarmed)) => {
                tracing::info!(?event, "voice arming changed");
            }
            Ok(event) => tracing::debug!(?event, "voice event"),
            Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "event logger lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}
