//! # Device Identity
//!
//! Per-transport identity types. Two identities are equal exactly when they
//! name the same device on the same transport, which is what decides
//! whether a `select_device` call can reuse the live connection.
//!
//! | Transport | Identity | Record fields |
//! |-----------|----------|---------------|
//! | Bluetooth | MAC address | name, mac |
//! | USB | vendor id, product id | name, vendorId, productId |
//! | Network | host, port (default 9100) | host, port |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PrinterError;

/// Raw TCP port used by most network receipt printers
pub const DEFAULT_NET_PORT: u16 = 9100;

/// Transport a device is reachable over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ble,
    Usb,
    Net,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Ble => "ble",
            TransportKind::Usb => "usb",
            TransportKind::Net => "net",
        };
        f.write_str(s)
    }
}

impl FromStr for TransportKind {
    type Err = PrinterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ble" | "bluetooth" => Ok(TransportKind::Ble),
            "usb" => Ok(TransportKind::Usb),
            "net" | "tcp" | "network" => Ok(TransportKind::Net),
            other => Err(PrinterError::InvalidArgument(format!(
                "unknown transport '{}'",
                other
            ))),
        }
    }
}

/// Bluetooth device, keyed by MAC address (stored upper-case).
///
/// Every construction path, deserialization included, goes through
/// [`BleIdentity::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "BleIdentityWire")]
pub struct BleIdentity {
    mac: String,
}

#[derive(Deserialize)]
struct BleIdentityWire {
    mac: String,
}

impl From<BleIdentityWire> for BleIdentity {
    fn from(wire: BleIdentityWire) -> Self {
        Self::new(wire.mac)
    }
}

impl BleIdentity {
    pub fn new(mac: impl AsRef<str>) -> Self {
        Self {
            mac: mac.as_ref().to_uppercase(),
        }
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    /// Parse and validate a `XX:XX:XX:XX:XX:XX` address.
    pub fn parse(mac: &str) -> Result<Self, PrinterError> {
        if !is_valid_mac(mac) {
            return Err(PrinterError::InvalidArgument(format!(
                "'{}' is not a Bluetooth MAC address",
                mac
            )));
        }
        Ok(Self::new(mac))
    }
}

/// USB device, keyed by vendor/product id pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbIdentity {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl FromStr for UsbIdentity {
    type Err = PrinterError;

    /// Parse `VID:PID` in hex, e.g. `0416:5011`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PrinterError::InvalidArgument(format!("'{}' is not VID:PID", s));
        let (vid, pid) = s.split_once(':').ok_or_else(invalid)?;
        let vendor_id = u16::from_str_radix(vid.trim_start_matches("0x"), 16).map_err(|_| invalid())?;
        let product_id = u16::from_str_radix(pid.trim_start_matches("0x"), 16).map_err(|_| invalid())?;
        Ok(Self::new(vendor_id, product_id))
    }
}

/// Network device, keyed by host and TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetIdentity {
    pub host: String,
    pub port: u16,
}

impl NetIdentity {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Identity on the default raw printing port.
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_NET_PORT)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Identity of a device on any transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum DeviceIdentity {
    Ble(BleIdentity),
    Usb(UsbIdentity),
    Net(NetIdentity),
}

impl DeviceIdentity {
    pub fn transport(&self) -> TransportKind {
        match self {
            DeviceIdentity::Ble(_) => TransportKind::Ble,
            DeviceIdentity::Usb(_) => TransportKind::Usb,
            DeviceIdentity::Net(_) => TransportKind::Net,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceIdentity::Ble(id) => write!(f, "ble:{}", id.mac),
            DeviceIdentity::Usb(id) => write!(f, "usb:{:04x}:{:04x}", id.vendor_id, id.product_id),
            DeviceIdentity::Net(id) => write!(f, "net:{}", id.address()),
        }
    }
}

impl From<BleIdentity> for DeviceIdentity {
    fn from(id: BleIdentity) -> Self {
        DeviceIdentity::Ble(id)
    }
}

impl From<UsbIdentity> for DeviceIdentity {
    fn from(id: UsbIdentity) -> Self {
        DeviceIdentity::Usb(id)
    }
}

impl From<NetIdentity> for DeviceIdentity {
    fn from(id: NetIdentity) -> Self {
        DeviceIdentity::Net(id)
    }
}

macro_rules! identity_from_device {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl TryFrom<DeviceIdentity> for $ty {
            type Error = PrinterError;

            fn try_from(identity: DeviceIdentity) -> Result<Self, Self::Error> {
                match identity {
                    DeviceIdentity::$variant(id) => Ok(id),
                    other => Err(PrinterError::InvalidArgument(format!(
                        "expected a {} identity, got {}",
                        $name, other
                    ))),
                }
            }
        }
    };
}

identity_from_device!(BleIdentity, Ble, "ble");
identity_from_device!(UsbIdentity, Usb, "usb");
identity_from_device!(NetIdentity, Net, "net");

/// Discovered or connected device as reported to callers.
///
/// Serializes flat: `{"name": ..., "transport": "usb", "vendorId": ..., "productId": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub name: String,
    #[serde(flatten)]
    pub identity: DeviceIdentity,
}

impl DeviceRecord {
    pub fn new(name: impl Into<String>, identity: impl Into<DeviceIdentity>) -> Self {
        Self {
            name: name.into(),
            identity: identity.into(),
        }
    }
}

/// Validate a Bluetooth MAC address format (XX:XX:XX:XX:XX:XX).
pub fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return false;
    }
    parts
        .iter()
        .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}
