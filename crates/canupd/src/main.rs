//! canupd - CAN Update Daemon
//!
//! Polls for a new firmware artifact and hands it to the external updater
//! once the target controller has acknowledged the CAN trigger frame.
//!
//! # Usage
//!
//! ```bash
//! # Run with a config file
//! canupd /etc/canupd.toml
//!
//! # Single cycle against a virtual bus, no interface setup
//! canupd --mock --once --url http://localhost:8000/configurationFull.gciBin
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use canup_agent::{Agent, AgentConfig};
use canup_core::{ChannelConfig, MockConfig};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "canupd")]
#[command(version, about = "CAN update daemon for OTA firmware delivery")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(value_name = "CONFIG")]
    config_file: Option<PathBuf>,

    /// Configuration file path, same as the positional argument
    #[arg(short, long, conflicts_with = "config_file")]
    config: Option<PathBuf>,

    /// CAN interface name, overrides `interface.name`
    #[arg(short, long)]
    interface: Option<String>,

    /// Artifact URL, overrides `artifact.url`
    #[arg(long)]
    url: Option<String>,

    /// Run a single check-and-update cycle, then exit
    #[arg(long)]
    once: bool,

    /// Use the simulated bus and skip interface setup
    #[arg(long)]
    mock: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref().or(self.config_file.as_ref())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting canupd (CAN Update Daemon)");

    let config = load_config(&args)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut agent = Agent::from_config(&config, shutdown_rx).context("Failed to build agent")?;

    info!(
        url = %config.artifact.url,
        interface = %config.interface.name,
        timeout_secs = config.handshake.timeout_secs,
        ack = ?config.handshake.ack,
        "Configuration loaded"
    );

    if args.once {
        let outcome = agent.run_once().await;
        info!(%outcome, "Single cycle finished");
        return Ok(());
    }

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutting down...");
        let _ = shutdown_tx.send(true);
    });

    agent.run().await;
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    let default_filter = if args.verbose {
        "canupd=debug,canup_core=debug,canup_agent=debug"
    } else {
        "canupd=info,canup_core=info,canup_agent=info"
    };

    let file_layer = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

fn load_config(args: &Args) -> Result<AgentConfig> {
    let mut config = match args.config_path() {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            AgentConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => {
            info!("No config file provided, using defaults");
            AgentConfig::default()
        }
    };

    if let Some(interface) = &args.interface {
        config.interface.name = interface.clone();
        if let Some(ChannelConfig::SocketCan(socket)) = config.channel.as_mut() {
            socket.interface = interface.clone();
        }
    }

    if let Some(url) = &args.url {
        config.artifact.url = url.clone();
    }

    if args.mock {
        warn!("Using simulated CAN bus, interface setup disabled");
        config.channel = Some(ChannelConfig::Mock(MockConfig::default()));
        config.interface.manage = false;
    }

    Ok(config)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_overrides_applied() {
        let args = Args::parse_from([
            "canupd",
            "--interface",
            "vcan0",
            "--url",
            "http://localhost:8000/fw.bin",
            "--mock",
        ]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.interface.name, "vcan0");
        assert_eq!(config.artifact.url, "http://localhost:8000/fw.bin");
        assert!(!config.interface.manage);
        assert!(matches!(config.channel(), ChannelConfig::Mock(_)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_without_url_rejected_when_building_agent() {
        let args = Args::parse_from(["canupd", "--mock"]);
        let config = load_config(&args).unwrap();
        let (_tx, rx) = watch::channel(false);

        let err = Agent::from_config(&config, rx).err().unwrap();
        assert!(err.to_string().contains("url"), "{err}");
    }

    #[test]
    fn test_positional_config_path() {
        let args = Args::parse_from(["canupd", "/etc/canupd.toml", "--once"]);
        assert_eq!(args.config_path(), Some(&PathBuf::from("/etc/canupd.toml")));
        assert!(args.once);
    }
}
