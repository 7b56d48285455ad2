//! Command-line client for the lightbridge service
//!
//! `discover` queries bridge services and prints what they announce;
//! `set-color` paints every internal LED of one device a solid color;
//! `monitor` runs the full discovery loop and streams tracking events.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lightbridge_core::descriptor::{descriptor, ProductKind};
use lightbridge_core::frame::{build_frame, Rgb};
use lightbridge_core::protocol::{
    build_devices_query, build_setrgb, parse_service_message, ServiceMessage, CLIENT_PORT,
    SERVICE_PORT,
};
use lightbridge_core::DeviceIdentity;
use lightbridge_client::{ClientConfig, ClientEvent, ServiceTracker};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lightbridge-cli")]
#[command(about = "Query and control lightbridge services")]
#[command(version)]
struct Args {
    /// Bridge service address
    #[arg(short, long, default_value = "127.0.0.1")]
    service: IpAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query for devices and print one line per announcement
    Discover {
        /// Seconds to wait for responses
        #[arg(short, long, default_value_t = 3)]
        wait: u64,
    },
    /// Set every internal LED of one device to a solid color
    SetColor {
        /// Product kind (AE5 or KatanaV2)
        kind: String,
        /// Device identity as printed by `discover`
        identity: String,
        /// Color as RRGGBB hex
        color: String,
    },
    /// Run the discovery loop and print tracking events until interrupted
    Monitor {
        /// Seconds between DEVICES broadcasts
        #[arg(short, long, default_value_t = 60)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Discover { wait } => discover(args.service, wait).await,
        Command::SetColor {
            kind,
            identity,
            color,
        } => set_color(args.service, &kind, &identity, &color).await,
        Command::Monitor { interval } => monitor(args.service, interval).await,
    }
}

async fn monitor(service: IpAddr, interval: u64) -> Result<()> {
    let tracker = Arc::new(Mutex::new(ServiceTracker::new()));
    let mut events = tracker.lock().await.subscribe();

    let config = ClientConfig {
        broadcast_addr: service,
        query_interval_secs: interval,
        ..ClientConfig::default()
    };
    let discovery = tokio::spawn(lightbridge_client::run(tracker, config));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::ServiceFound(addr)) => println!("service {addr} seen"),
                Ok(ClientEvent::ServiceLost(addr)) => println!("service {addr} lost"),
                Ok(ClientEvent::DeviceAnnounced { service, device }) => println!(
                    "device {},{},{} via {service}",
                    device.kind, device.display_name, device.identity
                ),
                Ok(ClientEvent::DeviceRemoved { service, identity }) => {
                    println!("device {identity} removed via {service}")
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    discovery.abort();
    Ok(())
}

async fn discover(service: IpAddr, wait: u64) -> Result<()> {
    // Bridge services reply to the fixed client port, so bind it
    let socket = UdpSocket::bind(("0.0.0.0", CLIENT_PORT))
        .await
        .context("failed to bind the client port; is another lighting host running?")?;
    socket.set_broadcast(true)?;

    let target = SocketAddr::new(service, SERVICE_PORT);
    socket
        .send_to(build_devices_query().as_bytes(), target)
        .await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(wait);
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0usize;

    loop {
        let datagram = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let Ok(received) = datagram else {
            break; // deadline reached
        };
        let (len, peer) = received?;
        match parse_service_message(&buf[..len]) {
            Ok(ServiceMessage::Devices(devices)) => {
                println!("Service at {}:", peer.ip());
                for dev in &devices {
                    println!("  {},{},{}", dev.kind, dev.display_name, dev.identity);
                }
                total += devices.len();
            }
            Ok(ServiceMessage::Stopping) => println!("Service at {} is stopping", peer.ip()),
            Err(_) => {} // foreign traffic on the client port
        }
    }

    println!("{total} device(s) announced");
    Ok(())
}

async fn set_color(service: IpAddr, kind: &str, identity: &str, color: &str) -> Result<()> {
    let Some(kind) = ProductKind::from_wire(kind) else {
        bail!("unknown product kind {kind:?}; expected AE5 or KatanaV2");
    };
    let rgb = parse_hex_color(color)?;

    let desc = descriptor(kind);
    let led_count = desc.internal_led_count as usize;
    let colors = vec![rgb; led_count];
    let frame = build_frame(desc, &colors, led_count, false)?;

    let message = build_setrgb(&DeviceIdentity(identity.to_string()), &frame);
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket
        .send_to(
            message.as_bytes(),
            SocketAddr::new(service, SERVICE_PORT),
        )
        .await?;

    println!("Sent {}-byte frame to {identity}", frame.len());
    Ok(())
}

fn parse_hex_color(s: &str) -> Result<Rgb> {
    let s = s.trim_start_matches('#');
    if s.len() != 6 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("color must be RRGGBB hex, got {s:?}");
    }
    let r = u8::from_str_radix(&s[0..2], 16)?;
    let g = u8::from_str_radix(&s[2..4], 16)?;
    let b = u8::from_str_radix(&s[4..6], 16)?;
    Ok(Rgb::new(r, g, b))
}
