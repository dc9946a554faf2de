//! # Rollo - Thermal Receipt Printer Driver
//!
//! Rollo drives ESC/POS receipt printers over Bluetooth, USB and raw TCP.
//! It provides:
//!
//! - **Encoding**: bit-image raster streams, QR codes and tagged text
//! - **Transport**: one connected channel per transport, opened on demand
//! - **Connection management**: select, print, close with serialized access
//! - **Discovery**: paired Bluetooth devices, USB enumeration, a /24 sweep
//!   for network printers
//!
//! ## Quick Start
//!
//! ```no_run
//! use rollo::{NetIdentity, PrinterRegistry, PrinterSettings};
//!
//! # async fn demo() -> Result<(), rollo::PrinterError> {
//! let registry = PrinterRegistry::new(PrinterSettings::default())?;
//! let printer = registry.net();
//!
//! printer.select_device(NetIdentity::new("192.168.1.20", 9100)).await?;
//! printer.print_bill("<CB>TOTAL</CB>\n12.50").await?;
//! printer.print_qr_code("https://example.com", None).await?;
//! printer.close_connection_if_exists().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | ESC/POS command builders, raster encoder, markup |
//! | [`render`] | Pixel matrices and QR rendering |
//! | [`transport`] | Bluetooth, USB, TCP and in-memory backends |
//! | [`manager`] | Per-transport connection state machine |
//! | [`registry`] | Process-wide managers, one per transport |
//! | [`scanner`] | Network printer discovery |
//! | [`events`] | Scanner and hotplug notifications |
//! | [`printer`] | Settings |
//! | [`error`] | Error types |

pub mod completion;
pub mod device;
pub mod error;
pub mod events;
pub mod fetch;
pub mod manager;
pub mod printer;
pub mod protocol;
pub mod registry;
pub mod render;
pub mod scanner;
pub mod transport;

// Re-exports for convenience
pub use completion::Completion;
pub use device::{BleIdentity, DeviceIdentity, DeviceRecord, NetIdentity, TransportKind, UsbIdentity};
pub use error::{ErrorKind, PrinterError};
pub use events::{EventBus, PrinterEvent};
pub use manager::{ConnectionManager, ConnectionStatus, Printer};
pub use printer::PrinterSettings;
pub use registry::PrinterRegistry;
