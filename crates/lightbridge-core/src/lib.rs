//! Lightbridge Core - Descriptors, frame codec, and wire protocol
//!
//! This crate provides the foundational types for the lightbridge system:
//! - Static per-model device descriptors (LED layout, frame header templates)
//! - The packet codec that turns RGB triples into raw device frames
//! - The line-based UDP discovery/command protocol
//! - Stable device identity derivation

pub mod descriptor;
pub mod frame;
pub mod identity;
pub mod protocol;

pub use descriptor::{
    descriptor, descriptors, AlphaPosition, ChannelOrder, DescriptorError, DeviceTypeDescriptor,
    ProductKind,
};
pub use frame::{build_frame, FrameError, Rgb};
pub use identity::DeviceIdentity;
pub use protocol::{ClientCommand, DeviceAnnouncement, ProtocolError, ServiceMessage};
