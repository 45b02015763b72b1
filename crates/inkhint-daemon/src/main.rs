//! inkhint daemon
//!
//! Owns the window registry, drives the e-paper driver and serves the
//! control socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use inkhint_config::{BridgeConfig, Config, DriverBackend};
use inkhint_daemon::bridge::NiriBridge;
use inkhint_daemon::driver::{DriverSink, MemoryDriver, ModeController, RockchipEbc};
use inkhint_daemon::hint::{BitDepth, Convert, HintSpec};
use inkhint_daemon::ipc::{determine_socket_path, IpcServer};
use inkhint_daemon::rect::Rect;
use inkhint_daemon::registry::Registry;
use inkhint_daemon::service::{self, ServiceHandle};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inkhintd")]
#[command(about = "Window-aware rendering hint daemon for e-paper displays")]
#[command(version)]
struct Args {
    /// Path to configuration file [default: ~/.config/inkhint/config.kdl]
    #[arg(short, long)]
    config: Option<String>,
}

fn init_tracing(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.global.log_level.as_filter())),
        )
        .init();
}

/// The driver's own default hint is used unless the config overrides it
fn open_driver(config: &Config) -> Result<(Arc<dyn DriverSink>, HintSpec)> {
    let override_hint = config
        .default_hint
        .as_deref()
        .map(str::parse::<HintSpec>)
        .transpose()
        .context("Invalid default-hint in configuration")?;

    let sink: Arc<dyn DriverSink> = match config.driver.backend {
        DriverBackend::RockchipEbc => Arc::new(RockchipEbc::new(
            &config.driver.device,
            &config.driver.parameters,
        )),
        DriverBackend::Memory => Arc::new(MemoryDriver::new(
            override_hint.unwrap_or(HintSpec::new(BitDepth::Y4, Convert::Threshold, false)),
        )),
    };

    let default_hint = match override_hint {
        Some(hint) => hint,
        None => sink
            .default_hint()
            .context("Failed to read the driver's default hint")?,
    };

    Ok((sink, default_hint))
}

fn spawn_bridges(config: &Config, service: &ServiceHandle) -> Result<()> {
    for bridge in &config.bridges {
        match bridge {
            BridgeConfig::Niri(niri) => {
                let bridge = NiriBridge::new(niri, service.clone())
                    .context("Invalid hint in niri bridge rules")?;
                tokio::spawn(async move {
                    if let Err(e) = bridge.run().await {
                        tracing::error!("niri bridge stopped: {}", e);
                    }
                });
            }
        }
        tracing::info!("Started {} bridge", bridge.name());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path: PathBuf = match &args.config {
        Some(path) => shellexpand::tilde(path).into_owned().into(),
        None => inkhint_config::default_config_path(),
    };
    let config = inkhint_config::load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    init_tracing(&config);
    tracing::info!("Loaded configuration from {}", config_path.display());

    let (sink, default_hint) = open_driver(&config)?;
    tracing::info!(backend = ?config.driver.backend, %default_hint, "Driver ready");

    let controller = ModeController::new(
        sink,
        Duration::from_millis(config.driver.poll_interval_ms),
        Duration::from_millis(config.driver.mode_timeout_ms),
    )
    .context("Failed to read driver state")?;

    let (width, height) = config.driver.screen;
    let service = service::spawn(Registry::new(default_hint), controller, Rect::screen(width, height));

    spawn_bridges(&config, &service)?;

    let server = IpcServer::bind(determine_socket_path(config.global.socket_path.as_deref()))?;

    tracing::info!("inkhint daemon running");

    tokio::select! {
        result = server.serve(service) => result?,
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
    }

    tracing::info!("Shutting down...");

    Ok(())
}
