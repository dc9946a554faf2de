//! # Event Bus
//!
//! Hardware notifications that do not belong to any single call: network
//! scan progress and USB hot-plug. Each component that emits events owns
//! its own [`EventBus`]; hosts subscribe and forward events however they
//! like.
//!
//! | Event | Source | Payload |
//! |-------|--------|---------|
//! | `scannerRunning` | network scanner | `bool` |
//! | `scannerResolved` | network scanner | `[{host, port}]` |
//! | `registerError` | network scanner | message |
//! | `deviceAttached` | USB hot-plug | none |
//! | `deviceDetached` | USB hot-plug | `{vendorId, productId}` |

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::device::{NetIdentity, UsbIdentity};

/// Default number of buffered events per subscriber
pub const DEFAULT_CAPACITY: usize = 64;

/// Notification published on an [`EventBus`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum PrinterEvent {
    ScannerRunning(bool),
    ScannerResolved(Vec<NetIdentity>),
    RegisterError(String),
    DeviceAttached,
    DeviceDetached(UsbIdentity),
}

impl PrinterEvent {
    /// Event name as seen by hosts.
    pub fn name(&self) -> &'static str {
        match self {
            PrinterEvent::ScannerRunning(_) => "scannerRunning",
            PrinterEvent::ScannerResolved(_) => "scannerResolved",
            PrinterEvent::RegisterError(_) => "registerError",
            PrinterEvent::DeviceAttached => "deviceAttached",
            PrinterEvent::DeviceDetached(_) => "deviceDetached",
        }
    }
}

/// Broadcast channel for [`PrinterEvent`]s.
///
/// Publishing never blocks and never fails; events sent while nobody is
/// subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PrinterEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: PrinterEvent) {
        trace!(event = event.name(), "publishing");
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(PrinterEvent::ScannerRunning(true));
        bus.publish(PrinterEvent::ScannerRunning(false));
        assert_eq!(rx.recv().await.unwrap(), PrinterEvent::ScannerRunning(true));
        assert_eq!(rx.recv().await.unwrap(), PrinterEvent::ScannerRunning(false));
    }

    #[test]
    fn test_publish_without_subscribers() {
        EventBus::default().publish(PrinterEvent::DeviceAttached);
    }

    #[test]
    fn test_wire_shape() {
        let event = PrinterEvent::ScannerResolved(vec![NetIdentity::new("192.168.1.20", 9100)]);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "scannerResolved", "payload": [{"host": "192.168.1.20", "port": 9100}]})
        );
        assert_eq!(
            serde_json::to_value(PrinterEvent::DeviceAttached).unwrap(),
            json!({"event": "deviceAttached"})
        );
    }
}
