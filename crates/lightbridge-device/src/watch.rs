//! Hardware-presence event types
//!
//! OS device enumeration is an external capability: whatever watches the
//! bus delivers add/remove events into an `mpsc` channel that a registry's
//! single-writer loop consumes. That keeps arbitrary-thread watcher
//! callbacks out of registry state.

/// Descriptive properties of one enumerated hardware instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    /// Opaque enumeration handle; may change across replugs
    pub instance_path: String,
    /// Human-readable device name reported by the enumeration
    pub display_name: String,
    /// Hardware serial number, when the enumeration exposes one directly
    pub serial: Option<String>,
    /// Parent instance id, whose trailing segment carries the serial
    pub parent_instance_id: Option<String>,
}

/// Presence event delivered by the hardware watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    Added(HardwareInfo),
    Removed { instance_path: String },
}
