//! Static per-model device descriptors
//!
//! Every supported product has exactly one immutable [`DeviceTypeDescriptor`]
//! describing its LED layout and the binary framing its control channel
//! expects. The set of descriptors is fixed at compile time and validated
//! once at startup with [`validate`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported product models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    /// Sound BlasterX AE-5 PCIe sound card (ioctl control channel)
    Ae5,
    /// Katana V2 soundbar (USB serial control channel)
    KatanaV2,
}

impl ProductKind {
    /// Wire name used in `DEVICES` response lines
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Ae5 => "AE5",
            ProductKind::KatanaV2 => "KatanaV2",
        }
    }

    /// Parse a wire name back into a product kind
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "AE5" => Some(ProductKind::Ae5),
            "KatanaV2" => Some(ProductKind::KatanaV2),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order of the two non-alpha color components within an LED block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// Red first, blue last
    Rgb,
    /// Blue first, red last (green never moves)
    Bgr,
}

/// Position of the 0xFF alpha byte within each 4-byte LED block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlphaPosition {
    /// Alpha at offset 0, color bytes at 1..4
    Leading,
    /// Color bytes at 0..3, alpha at offset 3
    Trailing,
}

/// Immutable per-model configuration
#[derive(Debug, Clone)]
pub struct DeviceTypeDescriptor {
    pub product_kind: ProductKind,
    /// Number of LEDs built into the device itself
    pub internal_led_count: u8,
    /// 2D coordinates of the internal LEDs, used by lighting hosts for layout
    pub led_positions: &'static [(u8, u8)],
    /// Overall panel size (width, height) in LED grid units
    pub panel_size: (u8, u8),
    /// Whether the device exposes an external ARGB header channel
    pub supports_external_channel: bool,
    /// Maximum LED count the external channel can drive
    pub external_led_limit: u16,
    pub channel_order: ChannelOrder,
    pub alpha_position: AlphaPosition,
    /// Exact frame length the transport expects, if fixed; frames are
    /// zero-padded to this size. `None` means header + 4 bytes per LED.
    pub fixed_frame_len: Option<usize>,
}

/// Fixed ioctl buffer size of the AE-5 control channel
pub const AE5_FRAME_LEN: usize = 1044;

/// Katana V2 LED command header: magic, LED command, command length,
/// set-LEDs sub-command, then three fixed bytes.
const KATANA_V2_HEADER: [u8; 7] = [0x5A, 0x3A, 0x20, 0x2B, 0x00, 0x01, 0x01];

/// One firmware revision of the Katana V2 was observed to expect a single
/// extra 0x00 after the header and another dropped it again. Left empty
/// until someone verifies against real hardware; flip to `&[0x00]` if frames
/// are rejected.
pub const KATANA_V2_HEADER_TAIL: &[u8] = &[];

impl DeviceTypeDescriptor {
    /// Build the frame header for `led_count` LEDs.
    ///
    /// For devices with an external channel, `led_count` must be the live
    /// LED count reported by that channel, not the configured maximum.
    pub fn header(&self, led_count: u8, is_external: bool) -> Vec<u8> {
        match self.product_kind {
            ProductKind::Ae5 => {
                let mut header = vec![0u8; 20];
                // Internal strip = 3, external ARGB header = 2
                header[0] = if is_external { 0x02 } else { 0x03 };
                header[12] = led_count;
                header[16] = 0x14;
                header
            }
            ProductKind::KatanaV2 => {
                let mut header = KATANA_V2_HEADER.to_vec();
                header.extend_from_slice(KATANA_V2_HEADER_TAIL);
                header
            }
        }
    }
}

static AE5: DeviceTypeDescriptor = DeviceTypeDescriptor {
    product_kind: ProductKind::Ae5,
    internal_led_count: 5,
    led_positions: &[(0, 0), (1, 0), (2, 0), (3, 0), (4, 0)],
    panel_size: (5, 1),
    supports_external_channel: true,
    external_led_limit: 100,
    channel_order: ChannelOrder::Rgb,
    alpha_position: AlphaPosition::Trailing,
    fixed_frame_len: Some(AE5_FRAME_LEN),
};

static KATANA_V2: DeviceTypeDescriptor = DeviceTypeDescriptor {
    product_kind: ProductKind::KatanaV2,
    internal_led_count: 7,
    led_positions: &[(0, 0), (1, 0), (2, 0), (3, 0), (4, 0), (5, 0), (6, 0)],
    panel_size: (7, 1),
    supports_external_channel: false,
    external_led_limit: 0,
    channel_order: ChannelOrder::Bgr,
    alpha_position: AlphaPosition::Leading,
    fixed_frame_len: None,
};

/// All supported descriptors
pub fn descriptors() -> &'static [&'static DeviceTypeDescriptor] {
    static DESCRIPTORS: [&DeviceTypeDescriptor; 2] = [&AE5, &KATANA_V2];
    &DESCRIPTORS
}

/// Look up the descriptor for a product kind
pub fn descriptor(kind: ProductKind) -> &'static DeviceTypeDescriptor {
    match kind {
        ProductKind::Ae5 => &AE5,
        ProductKind::KatanaV2 => &KATANA_V2,
    }
}

/// Errors found while validating the descriptor table
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("{kind}: header ({header_len} bytes) plus {led_count} LEDs exceeds fixed frame length {fixed_len}")]
    FrameOverflow {
        kind: ProductKind,
        header_len: usize,
        led_count: u16,
        fixed_len: usize,
    },
    #[error("{kind}: LED position count {positions} does not match internal LED count {leds}")]
    PositionMismatch {
        kind: ProductKind,
        positions: usize,
        leds: u8,
    },
}

/// Validate the descriptor table at startup.
///
/// Checks that the worst-case frame (internal count, and external limit where
/// supported) fits inside any fixed transport size, and that the LED layout
/// is self-consistent.
pub fn validate() -> Result<(), DescriptorError> {
    for desc in descriptors() {
        if desc.led_positions.len() != desc.internal_led_count as usize {
            return Err(DescriptorError::PositionMismatch {
                kind: desc.product_kind,
                positions: desc.led_positions.len(),
                leds: desc.internal_led_count,
            });
        }

        if let Some(fixed_len) = desc.fixed_frame_len {
            let mut worst_cases = vec![(desc.internal_led_count as u16, false)];
            if desc.supports_external_channel {
                worst_cases.push((desc.external_led_limit, true));
            }
            for (led_count, is_external) in worst_cases {
                let header_len = desc.header(led_count.min(255) as u8, is_external).len();
                if header_len + led_count as usize * 4 > fixed_len {
                    return Err(DescriptorError::FrameOverflow {
                        kind: desc.product_kind,
                        header_len,
                        led_count,
                        fixed_len,
                    });
                }
            }
        }
    }
    Ok(())
}
