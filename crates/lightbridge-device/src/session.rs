//! Per-device session state machine
//!
//! A session wraps one discovered physical unit and owns its transport while
//! connected. Lifecycle: `Found → [Unlocking] → Connecting → Connected →
//! Disconnected`, with `Found → Disconnected` when hardware disappears before
//! anything connected. Disconnected sessions are never reused; rediscovery
//! creates a fresh session even for the same identity.

use std::sync::Arc;

use lightbridge_core::descriptor::{DeviceTypeDescriptor, ProductKind};
use lightbridge_core::protocol::DeviceAnnouncement;
use lightbridge_core::DeviceIdentity;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, trace, warn};

use crate::transport::{Transport, TransportError, TransportOpener};
use crate::unlock::UnlockCommand;

/// Connection state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Hardware present, transport not yet opened
    Found,
    /// Vendor unlock utility running
    Unlocking,
    /// Transport open in progress
    Connecting,
    /// Transport open, frames accepted
    Connected,
    /// Terminal; the session is dropped from its registry
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unlock utility did not report success")]
    UnlockFailed,
    #[error("failed to open transport: {0}")]
    Open(#[source] TransportError),
    #[error("session is disconnected and will not be reused")]
    Retired,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("session is not connected")]
    NotConnected,
    #[error("transport write failed: {0}")]
    Transport(#[source] TransportError),
}

/// Result of a non-blocking send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Another send was in flight; this frame was dropped. Frames are
    /// current-color snapshots, so the newest one always supersedes.
    DroppedBusy,
}

struct Inner {
    state: ConnectionState,
    transport: Option<Box<dyn Transport + Send>>,
}

/// One connected or connectable physical device instance
pub struct DeviceSession {
    identity: DeviceIdentity,
    instance_path: String,
    display_name: String,
    descriptor: &'static DeviceTypeDescriptor,
    unlock: Option<UnlockCommand>,
    opener: Arc<dyn TransportOpener>,
    inner: Mutex<Inner>,
}

impl DeviceSession {
    pub fn new(
        identity: DeviceIdentity,
        instance_path: String,
        display_name: String,
        descriptor: &'static DeviceTypeDescriptor,
        unlock: Option<UnlockCommand>,
        opener: Arc<dyn TransportOpener>,
    ) -> Self {
        Self {
            identity,
            instance_path,
            display_name,
            descriptor,
            unlock,
            opener,
            inner: Mutex::new(Inner {
                state: ConnectionState::Found,
                transport: None,
            }),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn instance_path(&self) -> &str {
        &self.instance_path
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn kind(&self) -> ProductKind {
        self.descriptor.product_kind
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Entry for this session in a `DEVICES` response
    pub fn announcement(&self) -> DeviceAnnouncement {
        DeviceAnnouncement {
            kind: self.descriptor.product_kind,
            display_name: self.display_name.clone(),
            identity: self.identity.clone(),
        }
    }

    /// Open the transport, running the unlock step first where the model
    /// needs one. Idempotent: connecting an already-connected session is a
    /// no-op success. On failure the session returns to `Found` and may be
    /// retried on the next discovery cycle.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Disconnected => return Err(ConnectError::Retired),
            _ => {}
        }

        if let Some(unlock) = &self.unlock {
            inner.state = ConnectionState::Unlocking;
            if !unlock.run().await {
                inner.state = ConnectionState::Found;
                return Err(ConnectError::UnlockFailed);
            }
        }

        inner.state = ConnectionState::Connecting;
        let transport = match self.opener.open(&self.instance_path) {
            Ok(transport) => transport,
            Err(e) => {
                inner.state = ConnectionState::Found;
                return Err(ConnectError::Open(e));
            }
        };

        inner.transport = Some(transport);
        inner.state = ConnectionState::Connected;
        info!(device = %self.display_name, identity = %self.identity, "Connected to device");

        // Model-specific initialization, fire and forget: a failure here
        // does not roll back the connected state.
        if let Some(transport) = inner.transport.as_mut() {
            for command in init_commands(self.descriptor.product_kind) {
                if let Err(e) = transport.send(command) {
                    warn!(
                        device = %self.display_name,
                        error = %e,
                        "Init command failed"
                    );
                }
            }
        }

        Ok(())
    }

    /// Push one frame without blocking.
    ///
    /// At most one send is in flight per session; a frame arriving while the
    /// session is busy is dropped rather than queued. A transport write
    /// failure retires the session to `Disconnected`.
    pub fn try_send(&self, frame: &[u8]) -> Result<SendOutcome, SendError> {
        let Ok(mut inner) = self.inner.try_lock() else {
            trace!(device = %self.display_name, "Send in flight, dropping frame");
            return Ok(SendOutcome::DroppedBusy);
        };

        if inner.state != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        let Some(transport) = inner.transport.as_mut() else {
            return Err(SendError::NotConnected);
        };

        match transport.send(frame) {
            Ok(()) => Ok(SendOutcome::Sent),
            Err(e) => {
                warn!(
                    device = %self.display_name,
                    identity = %self.identity,
                    error = %e,
                    "Transport failed, retiring session"
                );
                inner.transport = None;
                inner.state = ConnectionState::Disconnected;
                Err(SendError::Transport(e))
            }
        }
    }

    /// Release the transport and retire the session
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Connected {
            info!(device = %self.display_name, identity = %self.identity, "Disconnected from device");
        }
        inner.transport = None;
        inner.state = ConnectionState::Disconnected;
    }
}

/// Commands issued right after the transport opens
fn init_commands(kind: ProductKind) -> &'static [&'static [u8]] {
    match kind {
        ProductKind::Ae5 => &[],
        // Switch the soundbar into SW mode, then turn both LED zones on in
        // case they were off.
        ProductKind::KatanaV2 => &[
            b"SW_MODE1\r\n",
            &[0x5A, 0x3A, 0x02, 0x25, 0x01],
            &[0x5A, 0x3A, 0x02, 0x26, 0x01],
        ],
    }
}
