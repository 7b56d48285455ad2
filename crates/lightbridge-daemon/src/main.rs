//! Lightbridge Daemon - Main entry point
//!
//! Always-on bridge between a lighting-control host and physical audio
//! peripherals: maintains device registries and serves the UDP
//! discovery/command protocol.

mod config;
mod dispatcher;

use anyhow::Result;
use clap::Parser;
use lightbridge_core::descriptor::ProductKind;
use lightbridge_device::transport::{CharDeviceOpener, SerialOpener};
use lightbridge_device::{DeviceRegistry, HardwareEvent, UnlockCommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lightbridged")]
#[command(about = "Bridge between lighting-control hosts and audio peripherals")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lightbridge.toml")]
    config: PathBuf,

    /// Bind address for the UDP socket
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("lightbridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.bridge.bind = bind;
    }
    config.validate()?;

    info!(
        listen_port = config.bridge.listen_port,
        reply_port = config.bridge.reply_port,
        devices = config.devices.len(),
        "Configuration loaded"
    );

    // One registry per supported model, each with its own transport backend
    let katana_unlock = config
        .unlock
        .katana_utility
        .clone()
        .map(UnlockCommand::katana_v2);
    let registries = vec![
        Arc::new(DeviceRegistry::new(
            ProductKind::Ae5,
            Arc::new(CharDeviceOpener),
            None,
        )),
        Arc::new(DeviceRegistry::new(
            ProductKind::KatanaV2,
            Arc::new(SerialOpener::default()),
            katana_unlock,
        )),
    ];

    // Hardware-presence channels. The senders stay alive for the process
    // lifetime; a real OS watcher would feed them alongside the static
    // config entries.
    let mut presence_feeds = Vec::new();
    for registry in &registries {
        let (tx, rx) = mpsc::channel::<HardwareEvent>(16);
        let registry = registry.clone();
        tokio::spawn(async move { registry.run(rx).await });
        presence_feeds.push(tx);
    }
    for device in &config.devices {
        let feed = registries
            .iter()
            .position(|r| r.kind() == device.kind)
            .map(|i| &presence_feeds[i]);
        if let Some(feed) = feed {
            feed.send(HardwareEvent::Added(device.to_hardware_info()))
                .await
                .ok();
        }
    }

    let dispatcher = dispatcher::Dispatcher::bind(
        &config.bridge.bind,
        config.bridge.listen_port,
        config.bridge.reply_port,
        registries,
    )
    .await?;

    tokio::select! {
        result = dispatcher.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            dispatcher.shutdown().await;
        }
    }

    Ok(())
}
