//! # Printer Settings
//!
//! Tunables shared by every transport. All fields have defaults, so a
//! settings file only needs the values it changes.
//!
//! ## Defaults
//!
//! | Setting | Default | Used by |
//! |---------|---------|---------|
//! | `image_max_dimension` | 200 | image printing |
//! | `qr_size` | 250 | QR printing |
//! | `scan_ports` | `[9100]` | network scanner |
//! | `probe_timeout_ms` | 100 | network scanner |
//! | `scan_concurrency` | 32 | network scanner |
//! | `net_connect_timeout_ms` | 5000 | TCP channel |
//! | `usb_transfer_timeout_ms` | 100000 | USB bulk transfers |
//! | `bluetooth_chunk_size` | 4096 | RFCOMM writes |
//! | `bluetooth_chunk_delay_ms` | 2 | RFCOMM writes |
//! | `rfcomm_device_index` | 0 | `/dev/rfcommN` binding |
//!
//! ## Usage
//!
//! ```
//! use rollo::printer::PrinterSettings;
//!
//! let settings: PrinterSettings = serde_json::from_str(r#"{"qr_size": 300}"#).unwrap();
//! assert_eq!(settings.qr_size, 300);
//! assert_eq!(settings.image_max_dimension, 200);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DEFAULT_NET_PORT;
use crate::error::PrinterError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterSettings {
    /// Largest side of a printed image, in dots
    pub image_max_dimension: i64,

    /// Side of a printed QR code, in dots
    pub qr_size: i64,

    /// Candidate ports probed on every host during a scan
    pub scan_ports: Vec<u16>,

    /// Connect timeout for a single scan probe
    pub probe_timeout_ms: u64,

    /// Hosts probed at once during a scan
    pub scan_concurrency: usize,

    pub net_connect_timeout_ms: u64,

    pub usb_transfer_timeout_ms: u64,

    pub bluetooth_chunk_size: usize,

    pub bluetooth_chunk_delay_ms: u64,

    /// N in `/dev/rfcommN` when a new binding has to be created
    pub rfcomm_device_index: u8,
}

impl Default for PrinterSettings {
    fn default() -> Self {
        Self {
            image_max_dimension: 200,
            qr_size: 250,
            scan_ports: vec![DEFAULT_NET_PORT],
            probe_timeout_ms: 100,
            scan_concurrency: 32,
            net_connect_timeout_ms: 5000,
            usb_transfer_timeout_ms: 100_000,
            bluetooth_chunk_size: 4096,
            bluetooth_chunk_delay_ms: 2,
            rfcomm_device_index: 0,
        }
    }
}

impl PrinterSettings {
    /// Load settings from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PrinterError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PrinterError::InvalidArgument(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            PrinterError::InvalidArgument(format!("Invalid settings in {}: {}", path.display(), e))
        })
    }

    /// `requested` if positive, otherwise the configured image size.
    pub fn image_dimension_or_default(&self, requested: Option<i64>) -> i64 {
        requested.filter(|&d| d > 0).unwrap_or(self.image_max_dimension)
    }

    /// `requested` if positive, otherwise the configured QR size.
    pub fn qr_size_or_default(&self, requested: Option<i64>) -> i64 {
        requested.filter(|&s| s > 0).unwrap_or(self.qr_size)
    }

    #[inline]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[inline]
    pub fn net_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.net_connect_timeout_ms)
    }

    #[inline]
    pub fn usb_transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.usb_transfer_timeout_ms)
    }

    #[inline]
    pub fn bluetooth_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.bluetooth_chunk_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = PrinterSettings::default();
        assert_eq!(s.image_max_dimension, 200);
        assert_eq!(s.qr_size, 250);
        assert_eq!(s.scan_ports, vec![9100]);
        assert_eq!(s.probe_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_non_positive_requests_fall_back() {
        let s = PrinterSettings::default();
        assert_eq!(s.image_dimension_or_default(None), 200);
        assert_eq!(s.image_dimension_or_default(Some(0)), 200);
        assert_eq!(s.image_dimension_or_default(Some(384)), 384);
        assert_eq!(s.qr_size_or_default(Some(-3)), 250);
        assert_eq!(s.qr_size_or_default(Some(180)), 180);
    }

    #[test]
    fn test_partial_json() {
        let s: PrinterSettings =
            serde_json::from_str(r#"{"scan_ports": [9100, 515], "scan_concurrency": 8}"#).unwrap();
        assert_eq!(s.scan_ports, vec![9100, 515]);
        assert_eq!(s.scan_concurrency, 8);
        assert_eq!(s.qr_size, 250);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(PrinterSettings::load("/nonexistent/rollo.json").is_err());
    }
}
