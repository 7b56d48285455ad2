//! Stable device identity derivation
//!
//! The lighting host addresses `SETRGB` commands by identity, so the value
//! must survive a replug. Enumeration handles do not: replugging a USB
//! device hands out a fresh instance path. The hardware serial embedded in
//! the parent instance id does survive, so that is the canonical source.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable string key for one physical device instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity(pub String);

impl DeviceIdentity {
    /// Identity from an explicit hardware serial number
    pub fn from_serial(serial: &str) -> Self {
        Self(serial.to_string())
    }

    /// Identity from the parent instance id, e.g.
    /// `USB\VID_041E&PID_3260\ABC123` yields `ABC123`.
    pub fn from_parent_id(parent_id: &str) -> Option<Self> {
        trailing_token(parent_id).map(|t| Self(t.to_string()))
    }

    /// Fallback identity from the enumeration instance path. Does not
    /// survive a replug; callers should warn when resorting to this.
    pub fn from_instance_path(instance_path: &str) -> Option<Self> {
        trailing_token(instance_path).map(|t| Self(t.to_string()))
    }

    /// Last-resort random identity for hardware that exposes no usable id
    pub fn random() -> Self {
        Self(format!("anon-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Longest run of `[A-Za-z0-9_&]` at the end of the string, which in a
/// device instance id is the serial segment after the last separator.
fn trailing_token(s: &str) -> Option<&str> {
    let tail = s.trim_end();
    let start = tail
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '&' || *c == '_')
        .last()
        .map(|(i, _)| i)?;
    let token = &tail[start..];
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_id_serial_segment() {
        let id = DeviceIdentity::from_parent_id(r"USB\VID_041E&PID_3260\7&2AB4F9E&0&1").unwrap();
        assert_eq!(id.as_str(), "7&2AB4F9E&0&1");
    }

    #[test]
    fn test_plain_serial() {
        let id = DeviceIdentity::from_parent_id(r"USB\VID_041E&PID_3260\SB0123456").unwrap();
        assert_eq!(id.as_str(), "SB0123456");
    }

    #[test]
    fn test_trailing_separator_yields_none() {
        assert_eq!(DeviceIdentity::from_parent_id(r"USB\VID_041E\"), None);
        assert_eq!(DeviceIdentity::from_parent_id(""), None);
    }

    #[test]
    fn test_random_identities_are_distinct() {
        assert_ne!(DeviceIdentity::random(), DeviceIdentity::random());
    }
}
