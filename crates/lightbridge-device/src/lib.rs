//! Lightbridge Device - Transports, sessions, and registries
//!
//! This crate owns the run-time side of device handling:
//! - Transport traits plus serial and character-device implementations
//! - The vendor unlock utility runner
//! - The per-device session state machine (connect/send/disconnect)
//! - The per-type registry fed by hardware-presence events

pub mod registry;
pub mod session;
pub mod transport;
pub mod unlock;
pub mod watch;

pub use registry::DeviceRegistry;
pub use session::{ConnectError, ConnectionState, DeviceSession, SendError, SendOutcome};
pub use transport::{
    CharDeviceOpener, MemoryOpener, SerialOpener, Transport, TransportError, TransportOpener,
};
pub use unlock::UnlockCommand;
pub use watch::{HardwareEvent, HardwareInfo};
