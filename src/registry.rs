//! # Printer Registry
//!
//! Holds the one [`ConnectionManager`] each transport gets for the life of
//! the process. Managers are built on first use and shared by reference;
//! the registry itself is passed explicitly to whoever needs it.
//!
//! ```no_run
//! use rollo::device::TransportKind;
//! use rollo::printer::PrinterSettings;
//! use rollo::registry::PrinterRegistry;
//!
//! # async fn demo() -> Result<(), rollo::error::PrinterError> {
//! let registry = PrinterRegistry::new(PrinterSettings::default())?;
//! let mut events = registry.net_events();
//! registry.printer(TransportKind::Net).list_devices().await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, OnceLock};

use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::device::{TransportKind, UsbIdentity};
use crate::error::PrinterError;
use crate::events::{EventBus, PrinterEvent};
use crate::fetch::{HttpImageFetcher, ImageFetcher};
use crate::manager::{ConnectionManager, Printer};
use crate::printer::PrinterSettings;
use crate::transport::{Backend, BluetoothBackend, NetBackend, UsbBackend};

/// Lazily created per-transport managers
pub struct PrinterRegistry {
    settings: PrinterSettings,
    fetcher: Arc<dyn ImageFetcher>,
    ble: OnceLock<ConnectionManager<BluetoothBackend>>,
    usb: OnceLock<ConnectionManager<UsbBackend>>,
    net: OnceLock<ConnectionManager<NetBackend>>,
}

impl PrinterRegistry {
    pub fn new(settings: PrinterSettings) -> Result<Self, PrinterError> {
        Ok(Self::with_fetcher(settings, Arc::new(HttpImageFetcher::new()?)))
    }

    pub fn with_fetcher(settings: PrinterSettings, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            settings,
            fetcher,
            ble: OnceLock::new(),
            usb: OnceLock::new(),
            net: OnceLock::new(),
        }
    }

    pub fn settings(&self) -> &PrinterSettings {
        &self.settings
    }

    pub fn bluetooth(&self) -> &ConnectionManager<BluetoothBackend> {
        self.ble.get_or_init(|| {
            debug!("creating bluetooth manager");
            ConnectionManager::new(
                BluetoothBackend::new(&self.settings),
                self.settings.clone(),
                self.fetcher.clone(),
            )
        })
    }

    /// USB manager. Creating it also starts closing the connection when the
    /// bound device is unplugged.
    pub fn usb(&self) -> &ConnectionManager<UsbBackend> {
        self.usb.get_or_init(|| {
            debug!("creating usb manager");
            let manager = ConnectionManager::new(
                UsbBackend::new(&self.settings),
                self.settings.clone(),
                self.fetcher.clone(),
            );
            let events = manager.backend().events().clone();
            spawn_detach_watcher(manager.clone(), &events);
            manager
        })
    }

    pub fn net(&self) -> &ConnectionManager<NetBackend> {
        self.net.get_or_init(|| {
            debug!("creating network manager");
            ConnectionManager::new(
                NetBackend::new(&self.settings),
                self.settings.clone(),
                self.fetcher.clone(),
            )
        })
    }

    /// Transport-independent handle to one manager.
    pub fn printer(&self, kind: TransportKind) -> Arc<dyn Printer> {
        match kind {
            TransportKind::Ble => Arc::new(self.bluetooth().clone()),
            TransportKind::Usb => Arc::new(self.usb().clone()),
            TransportKind::Net => Arc::new(self.net().clone()),
        }
    }

    /// `scannerRunning`, `scannerResolved` and `registerError` events.
    pub fn net_events(&self) -> broadcast::Receiver<PrinterEvent> {
        self.net().backend().events().subscribe()
    }

    /// `deviceAttached` and `deviceDetached` events.
    pub fn usb_events(&self) -> broadcast::Receiver<PrinterEvent> {
        self.usb().backend().events().subscribe()
    }
}

/// Close `manager`'s connection whenever its bound USB device detaches.
///
/// Returns `None` outside a tokio runtime.
pub fn spawn_detach_watcher<B>(
    manager: ConnectionManager<B>,
    events: &EventBus,
) -> Option<JoinHandle<()>>
where
    B: Backend,
    B::Identity: From<UsbIdentity>,
{
    let Ok(handle) = Handle::try_current() else {
        debug!("no runtime, USB detach watcher not started");
        return None;
    };
    let mut rx = events.subscribe();
    Some(handle.spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PrinterEvent::DeviceDetached(identity)) => {
                    if manager.close_if_selected(&identity.into()).await {
                        info!(
                            vid = identity.vendor_id,
                            pid = identity.product_id,
                            "selected USB printer detached"
                        );
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "USB event watcher lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRecord;
    use crate::manager::ConnectionStatus;
    use crate::scanner::{NetworkScanner, Probe};
    use crate::transport::MemoryBackend;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Duration;

    #[tokio::test]
    async fn test_detach_closes_selected_device() {
        let printer = DeviceRecord::new("POS-80", UsbIdentity::new(0x0416, 0x5011));
        let other = UsbIdentity::new(0x1111, 0x2222);
        let manager = ConnectionManager::new(
            MemoryBackend::new(TransportKind::Usb, vec![printer.clone()]),
            PrinterSettings::default(),
            Arc::new(HttpImageFetcher::new().unwrap()),
        );
        let events = EventBus::default();
        spawn_detach_watcher(manager.clone(), &events).unwrap();

        manager.select_device(printer.identity.clone()).await.unwrap();

        events.publish(PrinterEvent::DeviceDetached(other));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(manager.status().await, ConnectionStatus::Connected(_)));

        events.publish(PrinterEvent::DeviceDetached(UsbIdentity::new(0x0416, 0x5011)));
        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.status().await != ConnectionStatus::Ready {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(manager.backend().tap().closes(), 1);
    }

    #[test]
    fn test_watcher_needs_runtime() {
        let manager = ConnectionManager::new(
            MemoryBackend::new(TransportKind::Usb, vec![]),
            PrinterSettings::default(),
            Arc::new(HttpImageFetcher::new().unwrap()),
        );
        assert!(spawn_detach_watcher(manager, &EventBus::default()).is_none());
    }

    #[tokio::test]
    async fn test_managers_are_singletons() {
        let registry = PrinterRegistry::new(PrinterSettings::default()).unwrap();
        assert!(std::ptr::eq(registry.net(), registry.net()));
        assert_eq!(registry.printer(TransportKind::Net).kind(), TransportKind::Net);
        assert_eq!(registry.printer(TransportKind::Ble).kind(), TransportKind::Ble);
    }

    /// One printer at 10.0.0.9:9100 on a 10.0.0.0/24 network.
    struct OnePrinterLan;

    #[async_trait::async_trait]
    impl Probe for OnePrinterLan {
        async fn local_ipv4(&self) -> Option<Ipv4Addr> {
            Some(Ipv4Addr::new(10, 0, 0, 1))
        }

        async fn is_reachable(&self, addr: SocketAddrV4, _timeout: Duration) -> bool {
            addr == SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 9100)
        }
    }

    #[tokio::test]
    async fn test_net_list_returns_empty_and_scans() {
        let settings = PrinterSettings::default();
        let scanner = NetworkScanner::new(&settings, EventBus::default()).with_probe(OnePrinterLan);
        let manager = ConnectionManager::new(
            NetBackend::with_scanner(&settings, Arc::new(scanner)),
            settings,
            Arc::new(HttpImageFetcher::new().unwrap()),
        );
        let mut events = manager.backend().events().subscribe();

        let devices = manager.list_devices().await.unwrap();
        assert!(devices.is_empty());

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                PrinterEvent::ScannerRunning(true),
                PrinterEvent::ScannerResolved(vec![crate::device::NetIdentity::new("10.0.0.9", 9100)]),
                PrinterEvent::ScannerRunning(false),
            ]
        );
        assert!(!manager.backend().scanner().is_running());
    }
}
