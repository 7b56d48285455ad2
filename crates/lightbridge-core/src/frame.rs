//! Packet codec: RGB triples to raw device frames
//!
//! Pure and stateless. The frame layout is `[header][4 bytes per LED]`,
//! zero-padded to the descriptor's fixed frame length when one is set.

use thiserror::Error;

use crate::descriptor::{AlphaPosition, ChannelOrder, DeviceTypeDescriptor};

/// One LED color as passed in by the lighting host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("led count {led_count} does not match {colors} supplied colors")]
    ColorCountMismatch { led_count: usize, colors: usize },
    #[error("{kind} has no external channel")]
    NoExternalChannel { kind: crate::ProductKind },
    #[error("external channel reports {led_count} LEDs but {kind} supports at most {limit}")]
    ExternalLimitExceeded {
        kind: crate::ProductKind,
        led_count: usize,
        limit: u16,
    },
    #[error("internal channel of {kind} has {expected} LEDs, not {led_count}")]
    InternalCountMismatch {
        kind: crate::ProductKind,
        led_count: usize,
        expected: u8,
    },
    #[error("frame for {led_count} LEDs overflows fixed length {fixed_len}")]
    FrameOverflow { led_count: usize, fixed_len: usize },
}

/// Build the raw byte frame for one full color update.
///
/// `led_count` must equal `colors.len()` and, for external frames, must be
/// the live LED count the channel reports rather than the configured
/// maximum. The header encodes this count, so an inflated value would make
/// the device read past the colors actually sent.
pub fn build_frame(
    descriptor: &DeviceTypeDescriptor,
    colors: &[Rgb],
    led_count: usize,
    is_external: bool,
) -> Result<Vec<u8>, FrameError> {
    if led_count != colors.len() {
        return Err(FrameError::ColorCountMismatch {
            led_count,
            colors: colors.len(),
        });
    }

    if is_external {
        if !descriptor.supports_external_channel {
            return Err(FrameError::NoExternalChannel {
                kind: descriptor.product_kind,
            });
        }
        if led_count > descriptor.external_led_limit as usize {
            return Err(FrameError::ExternalLimitExceeded {
                kind: descriptor.product_kind,
                led_count,
                limit: descriptor.external_led_limit,
            });
        }
    } else if led_count != descriptor.internal_led_count as usize {
        return Err(FrameError::InternalCountMismatch {
            kind: descriptor.product_kind,
            led_count,
            expected: descriptor.internal_led_count,
        });
    }

    let header = descriptor.header(led_count as u8, is_external);
    let payload_len = header.len() + led_count * 4;

    let frame_len = match descriptor.fixed_frame_len {
        Some(fixed_len) => {
            if payload_len > fixed_len {
                return Err(FrameError::FrameOverflow {
                    led_count,
                    fixed_len,
                });
            }
            fixed_len
        }
        None => payload_len,
    };

    let mut frame = vec![0u8; frame_len];
    frame[..header.len()].copy_from_slice(&header);

    // Leading alpha shifts the color bytes one slot right
    let (alpha_offset, color_offset) = match descriptor.alpha_position {
        AlphaPosition::Leading => (0, 1),
        AlphaPosition::Trailing => (3, 0),
    };

    for (i, color) in colors.iter().enumerate() {
        let block = header.len() + i * 4;
        let (first, last) = match descriptor.channel_order {
            ChannelOrder::Rgb => (color.r, color.b),
            ChannelOrder::Bgr => (color.b, color.r),
        };
        frame[block + color_offset] = first;
        frame[block + color_offset + 1] = color.g;
        frame[block + color_offset + 2] = last;
        frame[block + alpha_offset] = 0xFF;
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{descriptor, ProductKind, AE5_FRAME_LEN};

    fn colors(n: usize) -> Vec<Rgb> {
        (0..n)
            .map(|i| Rgb::new(i as u8, (i as u8).wrapping_add(100), (i as u8).wrapping_add(200)))
            .collect()
    }

    #[test]
    fn test_ae5_internal_frame_is_fixed_size_and_zero_padded() {
        let desc = descriptor(ProductKind::Ae5);
        let frame = build_frame(desc, &colors(5), 5, false).unwrap();
        assert_eq!(frame.len(), AE5_FRAME_LEN);

        // 5 LED blocks at [20..40), everything after is padding
        for i in 0..5 {
            let block = &frame[20 + i * 4..20 + i * 4 + 4];
            assert_eq!(block[3], 0xFF);
            assert_ne!(block[..3], [0, 0, 0]);
        }
        assert!(frame[40..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_ae5_channel_order_and_trailing_alpha() {
        let desc = descriptor(ProductKind::Ae5);
        let input = vec![Rgb::new(1, 2, 3); 5];
        let frame = build_frame(desc, &input, 5, false).unwrap();
        assert_eq!(&frame[20..24], &[1, 2, 3, 0xFF]);
    }

    #[test]
    fn test_katana_swaps_red_and_blue_never_green() {
        let desc = descriptor(ProductKind::KatanaV2);
        let input = vec![Rgb::new(10, 20, 30); 7];
        let frame = build_frame(desc, &input, 7, false).unwrap();
        // Leading alpha, then B G R
        assert_eq!(&frame[7..11], &[0xFF, 30, 20, 10]);
    }

    #[test]
    fn test_katana_frame_length_is_header_plus_blocks() {
        let desc = descriptor(ProductKind::KatanaV2);
        let frame = build_frame(desc, &colors(7), 7, false).unwrap();
        assert_eq!(frame.len(), desc.header(7, false).len() + 7 * 4);
    }

    #[test]
    fn test_external_frame_uses_live_led_count() {
        let desc = descriptor(ProductKind::Ae5);
        let frame = build_frame(desc, &colors(12), 12, true).unwrap();
        assert_eq!(frame.len(), AE5_FRAME_LEN);
        assert_eq!(frame[0], 0x02);
        assert_eq!(frame[12], 12);
        assert!(frame[20 + 12 * 4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_external_limit_enforced() {
        let desc = descriptor(ProductKind::Ae5);
        let err = build_frame(desc, &colors(101), 101, true).unwrap_err();
        assert!(matches!(err, FrameError::ExternalLimitExceeded { .. }));
    }

    #[test]
    fn test_external_rejected_without_channel() {
        let desc = descriptor(ProductKind::KatanaV2);
        let err = build_frame(desc, &colors(3), 3, true).unwrap_err();
        assert!(matches!(err, FrameError::NoExternalChannel { .. }));
    }

    #[test]
    fn test_color_count_must_match_led_count() {
        let desc = descriptor(ProductKind::Ae5);
        let err = build_frame(desc, &colors(4), 5, false).unwrap_err();
        assert!(matches!(err, FrameError::ColorCountMismatch { .. }));
    }

    #[test]
    fn test_internal_count_must_match_descriptor() {
        let desc = descriptor(ProductKind::Ae5);
        let err = build_frame(desc, &colors(6), 6, false).unwrap_err();
        assert!(matches!(err, FrameError::InternalCountMismatch { .. }));
    }
}
