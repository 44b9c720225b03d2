//! # pulse-console
//!
//! Console binary: loads settings, initialises logging, then owns a stream
//! client, a socket client and a health monitor until interrupted.

#![deny(unsafe_code)]

mod runtime;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_settings::{PulseSettings, load_settings_from_path, settings_path};

use crate::runtime::{Console, Targets};

/// Pulse real-time console.
#[derive(Parser, Debug)]
#[command(name = "pulse-console", about = "Pulse real-time console")]
struct Cli {
    /// Settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Event-stream URL (overrides settings).
    #[arg(long)]
    stream_url: Option<String>,

    /// Socket URL (overrides settings).
    #[arg(long)]
    socket_url: Option<String>,

    /// Credential sent with both connections (overrides settings).
    #[arg(long)]
    token: Option<String>,

    /// Socket channel to subscribe to. Repeatable.
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Stream event type to log. Repeatable.
    #[arg(long = "event", default_value = "message")]
    events: Vec<String>,

    /// Run one health pass, print the snapshot as JSON and exit.
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn targets(&self, settings: &PulseSettings) -> Targets {
        Targets {
            stream_url: self
                .stream_url
                .clone()
                .unwrap_or_else(|| settings.api.stream_url()),
            socket_url: self
                .socket_url
                .clone()
                .unwrap_or_else(|| settings.api.socket_url.clone()),
            token: self
                .token
                .clone()
                .or_else(|| settings.api.token.clone())
                .unwrap_or_default(),
            channels: self.channels.clone(),
            events: self.events.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings first: the log level comes from them.
    let path = args.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    pulse_core::logging::init_subscriber(settings.logging.level.as_filter_str(), settings.logging.json);

    let console = Console::build(&settings, args.targets(&settings))?;

    if args.once {
        let health = console.monitor().check_all().await;
        let json =
            serde_json::to_string_pretty(&*health).context("Failed to serialize health snapshot")?;
        println!("{json}");
        return Ok(());
    }

    console.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    console.shutdown();
    Ok(())
}
