//! # Printer Transport Layer
//!
//! Every transport hands the connection manager two things: a [`Backend`]
//! that knows how to find and open devices, and a [`TransportChannel`] that
//! is a connected byte sink. Encoding happens once, above this layer, so
//! transports differ only in the channel they produce.
//!
//! ## Available Transports
//!
//! - [`bluetooth`]: RFCOMM serial profile over a bound `/dev/rfcommN` (Linux)
//! - [`usb`]: bulk-OUT endpoint via libusb
//! - [`net`]: raw TCP, usually port 9100
//! - [`memory`]: in-process sink for tests and dry runs

pub mod bluetooth;
pub mod memory;
pub mod net;
pub mod usb;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::device::{DeviceIdentity, DeviceRecord, TransportKind};
use crate::error::PrinterError;
use crate::protocol::raster::EscPosStream;

pub use bluetooth::BluetoothBackend;
pub use memory::{MemoryBackend, MemoryChannel, MemoryTap};
pub use net::NetBackend;
pub use usb::UsbBackend;

/// A connected byte sink.
///
/// Bytes passed to [`write_chunk`](Self::write_chunk) are written verbatim
/// and in call order.
#[async_trait]
pub trait TransportChannel: Send + 'static {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), PrinterError>;

    async fn flush(&mut self) -> Result<(), PrinterError> {
        Ok(())
    }

    /// Release the underlying socket or interface. Never fails.
    async fn close(&mut self);
}

/// Write every chunk of `stream` in order, then flush.
pub async fn write_stream<C: TransportChannel + ?Sized>(
    channel: &mut C,
    stream: &EscPosStream,
) -> Result<(), PrinterError> {
    for chunk in stream.chunks() {
        channel.write_chunk(chunk).await?;
    }
    channel.flush().await
}

/// Outcome of opening a device
pub enum Link<C> {
    /// Channel established
    Open(C),
    /// The OS must approve access first; open again once granted
    AwaitingPermission(PermissionRequest),
}

impl<C> fmt::Debug for Link<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Open(_) => f.write_str("Link::Open"),
            Link::AwaitingPermission(_) => f.write_str("Link::AwaitingPermission"),
        }
    }
}

/// Device discovery and channel establishment for one transport.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Identity: Clone
        + PartialEq
        + fmt::Debug
        + Send
        + Sync
        + 'static
        + Into<DeviceIdentity>
        + TryFrom<DeviceIdentity>;
    type Channel: TransportChannel;

    fn kind(&self) -> TransportKind;

    /// Check that the radio / bus / socket layer is usable.
    async fn init(&self) -> Result<(), PrinterError>;

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, PrinterError>;

    async fn open(
        &self,
        identity: &Self::Identity,
    ) -> Result<(DeviceRecord, Link<Self::Channel>), PrinterError>;
}

/// Where an OS permission request stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Pending,
    Granted,
    Denied,
}

/// Receiving side of an OS permission prompt.
///
/// Resolved by whoever holds the matching [`PermissionGrant`]; dropping the
/// grant unanswered counts as a denial.
#[derive(Debug)]
pub struct PermissionRequest {
    rx: oneshot::Receiver<bool>,
    settled: Option<bool>,
}

/// Sending side of an OS permission prompt
#[derive(Debug)]
pub struct PermissionGrant {
    tx: oneshot::Sender<bool>,
}

impl PermissionRequest {
    pub fn pair() -> (PermissionGrant, PermissionRequest) {
        let (tx, rx) = oneshot::channel();
        (PermissionGrant { tx }, PermissionRequest { rx, settled: None })
    }

    /// Check the request without waiting.
    pub fn poll_state(&mut self) -> PermissionState {
        if self.settled.is_none() {
            self.settled = match self.rx.try_recv() {
                Ok(granted) => Some(granted),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(false),
            };
        }
        match self.settled {
            None => PermissionState::Pending,
            Some(true) => PermissionState::Granted,
            Some(false) => PermissionState::Denied,
        }
    }

    /// Wait for the answer.
    pub async fn wait(mut self) -> bool {
        match self.settled {
            Some(granted) => granted,
            None => (&mut self.rx).await.unwrap_or(false),
        }
    }
}

impl PermissionGrant {
    pub fn resolve(self, granted: bool) {
        let _ = self.tx.send(granted);
    }
}
