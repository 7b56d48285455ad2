//! Remote service bookkeeping
//!
//! One [`ServiceSession`] exists per bridge address that has answered a
//! `DEVICES` query. Every response refreshes its last-seen timestamp and
//! re-announces its device list; a service that stays silent past the
//! liveness window is purged together with its devices. Timestamps are
//! passed in explicitly so liveness is testable without waiting.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use lightbridge_core::protocol::{parse_service_message, DeviceAnnouncement, ServiceMessage};
use lightbridge_core::DeviceIdentity;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// A service silent for this many seconds is considered gone
pub const LIVENESS_TIMEOUT_SECS: i64 = 122;

/// Discovery bookkeeping for one remote bridge instance
#[derive(Debug, Clone)]
pub struct ServiceSession {
    pub remote: IpAddr,
    pub last_seen: DateTime<Utc>,
    pub devices: Vec<DeviceAnnouncement>,
}

/// Event emitted as the tracked set of services and devices changes
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ServiceFound(IpAddr),
    ServiceLost(IpAddr),
    DeviceAnnounced {
        service: IpAddr,
        device: DeviceAnnouncement,
    },
    DeviceRemoved {
        service: IpAddr,
        identity: DeviceIdentity,
    },
}

/// Tracks every bridge service heard from on the client port
pub struct ServiceTracker {
    services: HashMap<IpAddr, ServiceSession>,
    events: broadcast::Sender<ClientEvent>,
}

impl Default for ServiceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            services: HashMap::new(),
            events,
        }
    }

    /// Subscribe to tracking events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Snapshot of tracked services
    pub fn services(&self) -> Vec<ServiceSession> {
        self.services.values().cloned().collect()
    }

    /// All currently announced devices with their owning service
    pub fn devices(&self) -> Vec<(IpAddr, DeviceAnnouncement)> {
        self.services
            .values()
            .flat_map(|s| s.devices.iter().map(|d| (s.remote, d.clone())))
            .collect()
    }

    /// Ingest one datagram received on the client port
    pub fn handle_datagram(&mut self, from: IpAddr, raw: &[u8], now: DateTime<Utc>) {
        match parse_service_message(raw) {
            Ok(ServiceMessage::Devices(devices)) => self.update_devices(from, devices, now),
            Ok(ServiceMessage::Stopping) => {
                debug!(service = %from, "Service announced it is stopping");
                self.remove_service(from);
            }
            Err(e) => {
                // The client port sees arbitrary broadcast traffic too
                debug!(peer = %from, error = %e, "Ignoring datagram");
            }
        }
    }

    fn update_devices(
        &mut self,
        from: IpAddr,
        devices: Vec<DeviceAnnouncement>,
        now: DateTime<Utc>,
    ) {
        let session = self.services.entry(from).or_insert_with(|| {
            info!(service = %from, "Found bridge service");
            ServiceSession {
                remote: from,
                last_seen: now,
                devices: Vec::new(),
            }
        });
        session.last_seen = now;

        let previous = std::mem::replace(&mut session.devices, devices.clone());

        let _ = self.events.send(ClientEvent::ServiceFound(from));
        for old in &previous {
            if !devices.iter().any(|d| d.identity == old.identity) {
                info!(service = %from, identity = %old.identity, "Device no longer announced");
                let _ = self.events.send(ClientEvent::DeviceRemoved {
                    service: from,
                    identity: old.identity.clone(),
                });
            }
        }
        for new in &devices {
            if !previous.iter().any(|d| d.identity == new.identity) {
                info!(
                    service = %from,
                    device = %new.display_name,
                    identity = %new.identity,
                    "Device announced"
                );
                let _ = self.events.send(ClientEvent::DeviceAnnounced {
                    service: from,
                    device: new.clone(),
                });
            }
        }
    }

    /// Drop services that have been silent for the liveness window,
    /// cascading removal of their devices. Idempotent: an already-purged
    /// service is simply absent on the next call.
    pub fn purge(&mut self, now: DateTime<Utc>) {
        let stale: Vec<IpAddr> = self
            .services
            .values()
            .filter(|s| (now - s.last_seen).num_seconds() >= LIVENESS_TIMEOUT_SECS)
            .map(|s| s.remote)
            .collect();

        for addr in stale {
            info!(service = %addr, "Service silent past liveness window, removing");
            self.remove_service(addr);
        }
    }

    fn remove_service(&mut self, addr: IpAddr) {
        let Some(session) = self.services.remove(&addr) else {
            return;
        };
        for device in session.devices {
            let _ = self.events.send(ClientEvent::DeviceRemoved {
                service: addr,
                identity: device.identity,
            });
        }
        let _ = self.events.send(ClientEvent::ServiceLost(addr));
    }
}
