//! Line-based UDP discovery and command protocol
//!
//! Messages are UTF-8 text with `\n`-separated lines. Line 0 is a literal
//! role header identifying the sender; anything without the expected header
//! is foreign broadcast traffic and is ignored. Line 1 is the command, the
//! remaining lines are command data.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::descriptor::ProductKind;
use crate::identity::DeviceIdentity;

/// Header literal sent by the lighting-host plugin
pub const CLIENT_HEADER: &str = "Creative Bridge Plugin";
/// Header literal sent by the bridge service
pub const SERVICE_HEADER: &str = "Creative SignalRGB Service";

/// Port the bridge service listens on for client broadcasts
pub const SERVICE_PORT: u16 = 12346;
/// Port the client listens on for service responses
pub const CLIENT_PORT: u16 = 12347;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not valid UTF-8")]
    NotUtf8,
    #[error("foreign or missing role header")]
    ForeignHeader,
    #[error("missing command line")]
    MissingCommand,
    #[error("unrecognized command {0:?}")]
    UnknownCommand(String),
    #[error("{command} is missing its {field} line")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
    #[error("invalid base64 frame payload")]
    InvalidFrame(#[from] base64::DecodeError),
    #[error("malformed device line {0:?}")]
    MalformedDeviceLine(String),
}

/// Command sent by the lighting host to the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Enumerate devices; the service connects everything it has found and
    /// responds with the connected list.
    Devices,
    /// Push one raw frame to the device with the given identity
    SetRgb {
        identity: DeviceIdentity,
        frame: Vec<u8>,
    },
}

/// One device entry in a `DEVICES` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAnnouncement {
    pub kind: ProductKind,
    pub display_name: String,
    pub identity: DeviceIdentity,
}

/// Message sent by the service to the lighting host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceMessage {
    /// Response listing currently connected devices
    Devices(Vec<DeviceAnnouncement>),
    /// Service is shutting down; forget its devices
    Stopping,
}

/// Parse a datagram received on the service port.
pub fn parse_client_message(raw: &[u8]) -> Result<ClientCommand, ProtocolError> {
    let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::NotUtf8)?;
    let mut lines = text.split('\n');

    let header = lines.next().map(str::trim);
    if header != Some(CLIENT_HEADER) {
        return Err(ProtocolError::ForeignHeader);
    }

    let command = lines
        .next()
        .map(str::trim)
        .ok_or(ProtocolError::MissingCommand)?;

    match command {
        "DEVICES" => Ok(ClientCommand::Devices),
        "SETRGB" => {
            let identity = lines
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or(ProtocolError::MissingField {
                    command: "SETRGB",
                    field: "identity",
                })?;
            let payload = lines.next().map(str::trim).ok_or(ProtocolError::MissingField {
                command: "SETRGB",
                field: "frame",
            })?;
            let frame = BASE64.decode(payload)?;
            Ok(ClientCommand::SetRgb {
                identity: DeviceIdentity(identity.to_string()),
                frame,
            })
        }
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

/// Parse a datagram received on the client port.
pub fn parse_service_message(raw: &[u8]) -> Result<ServiceMessage, ProtocolError> {
    let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::NotUtf8)?;
    let mut lines = text.split('\n');

    let header = lines.next().map(str::trim);
    if header != Some(SERVICE_HEADER) {
        return Err(ProtocolError::ForeignHeader);
    }

    let command = lines
        .next()
        .map(str::trim)
        .ok_or(ProtocolError::MissingCommand)?;

    match command {
        "DEVICES" => {
            let mut devices = Vec::new();
            for line in lines {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                devices.push(parse_device_line(line)?);
            }
            Ok(ServiceMessage::Devices(devices))
        }
        "STOPPING" => Ok(ServiceMessage::Stopping),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

fn parse_device_line(line: &str) -> Result<DeviceAnnouncement, ProtocolError> {
    let mut fields = line.splitn(3, ',');
    let (Some(kind), Some(name), Some(identity)) =
        (fields.next(), fields.next(), fields.next())
    else {
        return Err(ProtocolError::MalformedDeviceLine(line.to_string()));
    };
    let kind = ProductKind::from_wire(kind.trim())
        .ok_or_else(|| ProtocolError::MalformedDeviceLine(line.to_string()))?;
    Ok(DeviceAnnouncement {
        kind,
        display_name: name.trim().to_string(),
        identity: DeviceIdentity(identity.trim().to_string()),
    })
}

/// `DEVICES` query broadcast by the client
pub fn build_devices_query() -> String {
    format!("{CLIENT_HEADER}\nDEVICES")
}

/// `SETRGB` command carrying one base64-encoded frame
pub fn build_setrgb(identity: &DeviceIdentity, frame: &[u8]) -> String {
    format!(
        "{CLIENT_HEADER}\nSETRGB\n{identity}\n{}",
        BASE64.encode(frame)
    )
}

/// `DEVICES` response with one line per connected device
pub fn build_devices_response(devices: &[DeviceAnnouncement]) -> String {
    let mut response = format!("{SERVICE_HEADER}\nDEVICES");
    for dev in devices {
        response.push_str(&format!(
            "\n{},{},{}",
            dev.kind, dev.display_name, dev.identity
        ));
    }
    response
}

/// `STOPPING` notice broadcast on service shutdown
pub fn build_stopping_notice() -> String {
    format!("{SERVICE_HEADER}\nSTOPPING")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devices_query_roundtrip() {
        let raw = build_devices_query();
        assert_eq!(
            parse_client_message(raw.as_bytes()).unwrap(),
            ClientCommand::Devices
        );
    }

    #[test]
    fn test_setrgb_roundtrip() {
        let identity = DeviceIdentity("SB0123456".to_string());
        let frame = vec![0x5A, 0x3A, 0x00, 0xFF];
        let raw = build_setrgb(&identity, &frame);
        match parse_client_message(raw.as_bytes()).unwrap() {
            ClientCommand::SetRgb {
                identity: parsed_id,
                frame: parsed_frame,
            } => {
                assert_eq!(parsed_id, identity);
                assert_eq!(parsed_frame, frame);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_foreign_header_is_rejected() {
        let raw = b"SSDP-DISCOVER * HTTP/1.1\nHOST: 239.255.255.250";
        assert!(matches!(
            parse_client_message(raw),
            Err(ProtocolError::ForeignHeader)
        ));
        assert!(matches!(
            parse_service_message(raw),
            Err(ProtocolError::ForeignHeader)
        ));
    }

    #[test]
    fn test_own_response_is_foreign_to_service() {
        // The service can hear its own broadcast reply; the role header
        // keeps it from dispatching it as a command.
        let raw = build_devices_response(&[]);
        assert!(matches!(
            parse_client_message(raw.as_bytes()),
            Err(ProtocolError::ForeignHeader)
        ));
    }

    #[test]
    fn test_devices_response_roundtrip() {
        let devices = vec![
            DeviceAnnouncement {
                kind: ProductKind::Ae5,
                display_name: "SoundblasterX AE-5".to_string(),
                identity: DeviceIdentity("AB12".to_string()),
            },
            DeviceAnnouncement {
                kind: ProductKind::KatanaV2,
                display_name: "Katana V2".to_string(),
                identity: DeviceIdentity("CD34".to_string()),
            },
        ];
        let raw = build_devices_response(&devices);
        match parse_service_message(raw.as_bytes()).unwrap() {
            ServiceMessage::Devices(parsed) => assert_eq!(parsed, devices),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_stopping_notice() {
        let raw = build_stopping_notice();
        assert_eq!(
            parse_service_message(raw.as_bytes()).unwrap(),
            ServiceMessage::Stopping
        );
    }

    #[test]
    fn test_setrgb_with_bad_base64_is_an_error() {
        let raw = format!("{CLIENT_HEADER}\nSETRGB\nAB12\n!!not-base64!!");
        assert!(matches!(
            parse_client_message(raw.as_bytes()),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_unknown_command() {
        let raw = format!("{CLIENT_HEADER}\nREBOOT");
        assert!(matches!(
            parse_client_message(raw.as_bytes()),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_malformed_device_line() {
        let raw = format!("{SERVICE_HEADER}\nDEVICES\nonly-one-field");
        assert!(matches!(
            parse_service_message(raw.as_bytes()),
            Err(ProtocolError::MalformedDeviceLine(_))
        ));
    }
}
