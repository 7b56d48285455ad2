//! Discovery loop
//!
//! Broadcasts a `DEVICES` query on a fixed cadence, feeds every response
//! into the shared [`ServiceTracker`], and purges silent services on each
//! cycle.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use lightbridge_core::protocol::{build_devices_query, CLIENT_PORT, SERVICE_PORT};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::tracker::ServiceTracker;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address bridge queries are broadcast to
    pub broadcast_addr: IpAddr,
    /// Port bridge services listen on
    pub service_port: u16,
    /// Port we listen on for responses
    pub listen_port: u16,
    /// Seconds between `DEVICES` broadcasts
    pub query_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            // The bridge normally runs on the same machine as the
            // lighting host.
            broadcast_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            service_port: SERVICE_PORT,
            listen_port: CLIENT_PORT,
            query_interval_secs: 60,
        }
    }
}

/// Run discovery until the task is cancelled
pub async fn run(tracker: Arc<Mutex<ServiceTracker>>, config: ClientConfig) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("failed to bind client socket on port {}", config.listen_port))?;
    socket.set_broadcast(true)?;
    info!(port = config.listen_port, "Client listening for bridge responses");

    let query_target = SocketAddr::new(config.broadcast_addr, config.service_port);
    let mut query_timer = interval(Duration::from_secs(config.query_interval_secs));
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        tokio::select! {
            _ = query_timer.tick() => {
                debug!(target = %query_target, "Broadcasting DEVICES query");
                if let Err(e) = socket.send_to(build_devices_query().as_bytes(), query_target).await {
                    warn!(target = %query_target, error = %e, "Failed to broadcast query");
                }
                tracker.lock().await.purge(Utc::now());
            }
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = received?;
                tracker.lock().await.handle_datagram(peer.ip(), &buf[..len], Utc::now());
            }
        }
    }
}
