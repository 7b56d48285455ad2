//! Per-type device registry
//!
//! One registry exists per supported product model. It is the only writer of
//! its session list: hardware-presence events are funneled through an mpsc
//! channel into [`DeviceRegistry::run`], and the one other mutation (dropping
//! a session whose transport died) goes through a registry method. Lookups
//! and iteration take the read side of the same lock, so dispatch never
//! interleaves unsafely with add/remove.

use std::sync::Arc;

use lightbridge_core::descriptor::{descriptor, DeviceTypeDescriptor, ProductKind};
use lightbridge_core::protocol::DeviceAnnouncement;
use lightbridge_core::DeviceIdentity;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::session::{DeviceSession, SendError, SendOutcome};
use crate::transport::TransportOpener;
use crate::unlock::UnlockCommand;
use crate::watch::{HardwareEvent, HardwareInfo};

/// Registry of all sessions for one device model
pub struct DeviceRegistry {
    descriptor: &'static DeviceTypeDescriptor,
    opener: Arc<dyn TransportOpener>,
    unlock: Option<UnlockCommand>,
    sessions: RwLock<Vec<Arc<DeviceSession>>>,
}

impl DeviceRegistry {
    pub fn new(
        kind: ProductKind,
        opener: Arc<dyn TransportOpener>,
        unlock: Option<UnlockCommand>,
    ) -> Self {
        Self {
            descriptor: descriptor(kind),
            opener,
            unlock,
            sessions: RwLock::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ProductKind {
        self.descriptor.product_kind
    }

    /// Consume hardware-presence events until the channel closes
    pub async fn run(&self, mut events: mpsc::Receiver<HardwareEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                HardwareEvent::Added(info) => self.add(info).await,
                HardwareEvent::Removed { instance_path } => self.remove(&instance_path).await,
            }
        }
        debug!(kind = %self.kind(), "Hardware event channel closed");
    }

    /// Register a newly enumerated hardware instance
    pub async fn add(&self, info: HardwareInfo) {
        let identity = derive_identity(&info);
        let mut sessions = self.sessions.write().await;

        if sessions
            .iter()
            .any(|s| s.instance_path() == info.instance_path)
        {
            debug!(path = %info.instance_path, "Instance already registered");
            return;
        }
        if sessions.iter().any(|s| s.identity() == &identity) {
            warn!(
                identity = %identity,
                path = %info.instance_path,
                "Duplicate identity within registry, ignoring instance"
            );
            return;
        }

        info!(
            kind = %self.kind(),
            device = %info.display_name,
            identity = %identity,
            "Discovered device"
        );
        sessions.push(Arc::new(DeviceSession::new(
            identity,
            info.instance_path,
            info.display_name,
            self.descriptor,
            self.unlock.clone(),
            self.opener.clone(),
        )));
    }

    /// Drop the session for a removed hardware instance
    pub async fn remove(&self, instance_path: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(pos) = sessions
            .iter()
            .position(|s| s.instance_path() == instance_path)
        else {
            warn!(path = %instance_path, "Removal event for unknown instance");
            return;
        };
        let session = sessions.remove(pos);
        drop(sessions);

        session.disconnect().await;
        info!(
            kind = %self.kind(),
            device = %session.display_name(),
            identity = %session.identity(),
            "Device removed"
        );
    }

    /// Snapshot of the current session list
    pub async fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.sessions.read().await.clone()
    }

    /// Connect every session concurrently and return announcements for those
    /// that end up connected. Sessions whose connect attempt fails stay
    /// retryable and are simply omitted.
    pub async fn connect_all(&self) -> Vec<DeviceAnnouncement> {
        let sessions = self.sessions().await;
        let mut tasks = JoinSet::new();

        for session in sessions {
            tasks.spawn(async move {
                match session.connect().await {
                    Ok(()) => Some(session.announcement()),
                    Err(e) => {
                        debug!(
                            device = %session.display_name(),
                            error = %e,
                            "Connect attempt failed"
                        );
                        None
                    }
                }
            });
        }

        let mut announcements = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(announcement)) = result {
                announcements.push(announcement);
            }
        }
        announcements
    }

    /// Look up a session by identity
    pub async fn find(&self, identity: &DeviceIdentity) -> Option<Arc<DeviceSession>> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|s| s.identity() == identity)
            .cloned()
    }

    /// Route a frame to the session with the given identity.
    ///
    /// Returns `true` when the identity belongs to this registry, whether or
    /// not the frame was delivered: a not-connected session is a silent
    /// no-op, and a dead transport retires the session here and now.
    pub async fn dispatch_frame(&self, identity: &DeviceIdentity, frame: &[u8]) -> bool {
        let Some(session) = self.find(identity).await else {
            return false;
        };

        match session.try_send(frame) {
            Ok(SendOutcome::Sent) => {}
            Ok(SendOutcome::DroppedBusy) => {
                debug!(identity = %identity, "Frame dropped, send in flight");
            }
            Err(SendError::NotConnected) => {
                debug!(identity = %identity, "Frame for unconnected session ignored");
            }
            Err(SendError::Transport(_)) => {
                let mut sessions = self.sessions.write().await;
                sessions.retain(|s| s.identity() != identity);
                info!(identity = %identity, "Session dropped after transport failure");
            }
        }
        true
    }

    /// Disconnect every session, leaving the list empty
    pub async fn disconnect_all(&self) {
        let mut sessions = self.sessions.write().await;
        for session in sessions.drain(..) {
            session.disconnect().await;
        }
    }
}

/// Derive the stable identity for a hardware instance.
///
/// Preference order: explicit serial, then the serial segment of the parent
/// instance id. Falling back to the instance path gives an identity that dies
/// with the next replug, so it is logged loudly; a random identity is the
/// last resort.
fn derive_identity(info: &HardwareInfo) -> DeviceIdentity {
    if let Some(serial) = info.serial.as_deref() {
        return DeviceIdentity::from_serial(serial);
    }
    if let Some(identity) = info
        .parent_instance_id
        .as_deref()
        .and_then(DeviceIdentity::from_parent_id)
    {
        return identity;
    }
    if let Some(identity) = DeviceIdentity::from_instance_path(&info.instance_path) {
        warn!(
            path = %info.instance_path,
            "No device serial found, deriving identity from instance path; \
             it will not survive a replug"
        );
        return identity;
    }
    warn!(path = %info.instance_path, "No usable hardware id, using random identity");
    DeviceIdentity::random()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryOpener;
    use crate::session::ConnectionState;

    fn info(path: &str, serial: Option<&str>) -> HardwareInfo {
        HardwareInfo {
            instance_path: path.to_string(),
            display_name: format!("Device at {path}"),
            serial: serial.map(str::to_string),
            parent_instance_id: None,
        }
    }

    fn registry() -> (DeviceRegistry, Arc<MemoryOpener>) {
        let opener = Arc::new(MemoryOpener::new());
        (
            DeviceRegistry::new(ProductKind::Ae5, opener.clone(), None),
            opener,
        )
    }

    #[tokio::test]
    async fn test_events_maintain_session_list() {
        let (registry, _) = registry();
        let (tx, rx) = mpsc::channel(8);

        tx.send(HardwareEvent::Added(info("p0", Some("S0"))))
            .await
            .unwrap();
        tx.send(HardwareEvent::Added(info("p1", Some("S1"))))
            .await
            .unwrap();
        tx.send(HardwareEvent::Removed {
            instance_path: "p0".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        registry.run(rx).await;

        let sessions = registry.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].identity().as_str(), "S1");
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_rejected() {
        let (registry, _) = registry();
        registry.add(info("p0", Some("SAME"))).await;
        registry.add(info("p1", Some("SAME"))).await;
        assert_eq!(registry.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_readd_of_same_instance_is_ignored() {
        let (registry, _) = registry();
        registry.add(info("p0", Some("S0"))).await;
        registry.add(info("p0", Some("S0"))).await;
        assert_eq!(registry.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_identity_prefers_parent_serial_segment() {
        let (registry, _) = registry();
        registry
            .add(HardwareInfo {
                instance_path: r"USB\VID_041E&PID_3260\9&12AB34".to_string(),
                display_name: "Katana V2".to_string(),
                serial: None,
                parent_instance_id: Some(r"USB\VID_041E&PID_3260\SB0042".to_string()),
            })
            .await;
        let sessions = registry.sessions().await;
        assert_eq!(sessions[0].identity().as_str(), "SB0042");
    }

    #[tokio::test]
    async fn test_connect_all_lists_only_connected() {
        let (registry, opener) = registry();
        registry.add(info("p0", Some("S0"))).await;
        registry.add(info("p1", Some("S1"))).await;

        opener.fail_opens(true);
        assert!(registry.connect_all().await.is_empty());
        for session in registry.sessions().await {
            assert_eq!(session.state().await, ConnectionState::Found);
        }

        // Failed sessions stay retryable and appear on the next cycle
        opener.fail_opens(false);
        let mut announced = registry.connect_all().await;
        announced.sort_by(|a, b| a.identity.as_str().cmp(b.identity.as_str()));
        assert_eq!(announced.len(), 2);
        assert_eq!(announced[0].identity.as_str(), "S0");
        assert_eq!(announced[0].kind, ProductKind::Ae5);
    }

    #[tokio::test]
    async fn test_dispatch_frame_unknown_identity_is_unhandled() {
        let (registry, opener) = registry();
        registry.add(info("p0", Some("S0"))).await;
        let handled = registry
            .dispatch_frame(&DeviceIdentity::from_serial("MISSING"), &[1])
            .await;
        assert!(!handled);
        assert!(opener.writes().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_frame_to_unconnected_is_silent_noop() {
        let (registry, opener) = registry();
        registry.add(info("p0", Some("S0"))).await;
        let handled = registry
            .dispatch_frame(&DeviceIdentity::from_serial("S0"), &[1])
            .await;
        assert!(handled);
        assert!(opener.writes().is_empty());
        assert_eq!(registry.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_drops_session_from_registry() {
        let (registry, opener) = registry();
        opener.fail_sends_after(0);
        registry.add(info("p0", Some("S0"))).await;
        registry.connect_all().await;

        let identity = DeviceIdentity::from_serial("S0");
        assert!(registry.dispatch_frame(&identity, &[1]).await);
        assert!(registry.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_delivered_frame_reaches_transport() {
        let (registry, opener) = registry();
        registry.add(info("p0", Some("S0"))).await;
        registry.connect_all().await;

        let identity = DeviceIdentity::from_serial("S0");
        assert!(registry.dispatch_frame(&identity, &[9, 9, 9]).await);
        assert_eq!(opener.writes(), vec![vec![9, 9, 9]]);
    }

    #[tokio::test]
    async fn test_disconnect_all_empties_registry() {
        let (registry, _) = registry();
        registry.add(info("p0", Some("S0"))).await;
        registry.add(info("p1", Some("S1"))).await;
        registry.disconnect_all().await;
        assert!(registry.sessions().await.is_empty());
    }
}
