//! Device transports
//!
//! A transport is the already-opened write channel to one device. Opening is
//! separated into [`TransportOpener`] so sessions stay independent of how the
//! underlying handle is produced: a serial port for the Katana V2, a
//! character-device handle for the AE-5 control channel, or an in-memory
//! recorder for tests and dry runs.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("simulated transport failure")]
    Simulated,
}

/// Write channel to one device. Exclusively owned by its session while the
/// session is connected.
pub trait Transport: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Opens a transport for an enumeration instance path
pub trait TransportOpener: Send + Sync {
    fn open(&self, instance_path: &str) -> Result<Box<dyn Transport + Send>, TransportError>;
}

/// Serial-port transport (Katana V2 enumerates as a USB CDC serial device)
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl Transport for SerialTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }
}

/// Opens serial ports at a fixed baud rate
pub struct SerialOpener {
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl Default for SerialOpener {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout: Duration::from_millis(500),
        }
    }
}

impl TransportOpener for SerialOpener {
    fn open(&self, instance_path: &str) -> Result<Box<dyn Transport + Send>, TransportError> {
        let port = serialport::new(instance_path, self.baud_rate)
            .timeout(self.timeout)
            .open()?;
        debug!(path = %instance_path, baud = self.baud_rate, "Opened serial port");
        Ok(Box::new(SerialTransport { port }))
    }
}

/// Character-device transport: plain write handle on the device node. The
/// AE-5 control channel is driven through platform ioctl glue outside this
/// crate; this implementation covers device nodes that accept raw frame
/// writes.
pub struct CharDeviceTransport {
    file: std::fs::File,
}

impl Transport for CharDeviceTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.file.write_all(frame)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Opens device nodes for writing
#[derive(Default)]
pub struct CharDeviceOpener;

impl TransportOpener for CharDeviceOpener {
    fn open(&self, instance_path: &str) -> Result<Box<dyn Transport + Send>, TransportError> {
        let file = OpenOptions::new().write(true).open(instance_path)?;
        debug!(path = %instance_path, "Opened device node");
        Ok(Box::new(CharDeviceTransport { file }))
    }
}

/// In-memory transport that records every frame. Useful for tests and for
/// dry-running the bridge without hardware attached.
pub struct MemoryTransport {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_after: Arc<Mutex<Option<usize>>>,
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut fail_after = self
            .fail_after
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(remaining) = fail_after.as_mut() {
            if *remaining == 0 {
                return Err(TransportError::Simulated);
            }
            *remaining -= 1;
        }
        drop(fail_after);

        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(frame.to_vec());
        Ok(())
    }
}

/// Opener producing [`MemoryTransport`]s that share one write log
#[derive(Default)]
pub struct MemoryOpener {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    opened: Arc<Mutex<Vec<String>>>,
    fail_opens: Arc<Mutex<bool>>,
    fail_sends_after: Arc<Mutex<Option<usize>>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// All frames written through transports from this opener, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Instance paths opened so far
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Make every subsequent open attempt fail
    pub fn fail_opens(&self, fail: bool) {
        *self
            .fail_opens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fail;
    }

    /// Let `count` sends succeed per transport, then fail the rest
    pub fn fail_sends_after(&self, count: usize) {
        *self
            .fail_sends_after
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(count);
    }
}

impl TransportOpener for MemoryOpener {
    fn open(&self, instance_path: &str) -> Result<Box<dyn Transport + Send>, TransportError> {
        if *self
            .fail_opens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
        {
            return Err(TransportError::Simulated);
        }
        self.opened
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(instance_path.to_string());
        let fail_after = self
            .fail_sends_after
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(Box::new(MemoryTransport {
            writes: self.writes.clone(),
            fail_after: Arc::new(Mutex::new(*fail_after)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_device_transport_writes_frames() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let opener = CharDeviceOpener;
        let mut transport = opener.open(file.path().to_str().unwrap()).unwrap();
        transport.send(&[0x03, 0x00, 0xFF]).unwrap();
        transport.send(&[0x01]).unwrap();
        let written = std::fs::read(file.path()).unwrap();
        assert_eq!(written, vec![0x03, 0x00, 0xFF, 0x01]);
    }

    #[test]
    fn test_char_device_open_missing_node_fails() {
        let opener = CharDeviceOpener;
        assert!(matches!(
            opener.open("/nonexistent/device/node"),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn test_memory_transport_records_and_fails_on_cue() {
        let opener = MemoryOpener::new();
        opener.fail_sends_after(1);
        let mut transport = opener.open("mem0").unwrap();
        transport.send(&[1, 2, 3]).unwrap();
        assert!(matches!(
            transport.send(&[4, 5, 6]),
            Err(TransportError::Simulated)
        ));
        assert_eq!(opener.writes(), vec![vec![1, 2, 3]]);
        assert_eq!(opener.opened(), vec!["mem0".to_string()]);
    }
}
