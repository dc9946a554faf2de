//! # Network Scanner
//!
//! Sweeps the local `/24` for hosts answering on a printer port.
//!
//! ## Sweep
//!
//! ```text
//! local 192.168.1.7  →  192.168.1.0 … 192.168.1.255, skipping .7
//!                       each host: ports in order, first reachable wins
//! ```
//!
//! Hosts are probed with bounded concurrency (`scan_concurrency`, default
//! 32), so a full sweep takes about `255 / 32 × probe_timeout` per port
//! instead of 25 seconds. Results keep ascending octet order.
//!
//! ## Events
//!
//! | When | Event |
//! |------|-------|
//! | scan starts | `scannerRunning(true)` |
//! | no local IPv4 | `registerError(message)` |
//! | sweep done | `scannerResolved([{host, port}])` |
//! | scan ends, always | `scannerRunning(false)` |
//!
//! Only one scan runs at a time; a trigger while a scan is running is
//! ignored.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::device::NetIdentity;
use crate::events::{EventBus, PrinterEvent};
use crate::printer::PrinterSettings;

/// Network primitives used by a sweep.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    /// This machine's IPv4 address on the LAN, if it has one.
    async fn local_ipv4(&self) -> Option<Ipv4Addr>;

    async fn is_reachable(&self, addr: SocketAddrV4, timeout: Duration) -> bool;
}

/// Probe using real sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn local_ipv4(&self) -> Option<Ipv4Addr> {
        // A connected UDP socket reports the outbound interface address
        // without sending anything.
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).await.ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }

    async fn is_reachable(&self, addr: SocketAddrV4, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(SocketAddr::V4(addr))).await,
            Ok(Ok(_))
        )
    }
}

/// Subnet sweeper for network printers
pub struct NetworkScanner {
    ports: Vec<u16>,
    probe_timeout: Duration,
    concurrency: usize,
    running: AtomicBool,
    events: EventBus,
    probe: Arc<dyn Probe>,
}

impl NetworkScanner {
    pub fn new(settings: &PrinterSettings, events: EventBus) -> Self {
        Self {
            ports: settings.scan_ports.clone(),
            probe_timeout: settings.probe_timeout(),
            concurrency: settings.scan_concurrency.max(1),
            running: AtomicBool::new(false),
            events,
            probe: Arc::new(TcpProbe),
        }
    }

    /// Replace the socket probe.
    pub fn with_probe(mut self, probe: impl Probe) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a sweep in the background unless one is already running.
    ///
    /// Returns `false` if the trigger was ignored.
    pub fn trigger(self: &Arc<Self>) -> bool {
        if self.is_running() {
            debug!("scan already running, trigger ignored");
            return false;
        }
        let scanner = Arc::clone(self);
        tokio::spawn(async move {
            scanner.run().await;
        });
        true
    }

    /// Run a full sweep on the current task.
    ///
    /// Returns `None` if another sweep was already running or the local
    /// address could not be determined.
    pub async fn run(&self) -> Option<Vec<NetIdentity>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("scan already running");
            return None;
        }
        let _guard = RunningGuard {
            running: &self.running,
            events: &self.events,
        };
        self.events.publish(PrinterEvent::ScannerRunning(true));

        let Some(local) = self.probe.local_ipv4().await else {
            warn!("no local IPv4 address, aborting scan");
            self.events.publish(PrinterEvent::RegisterError(
                "Unable to determine local IP address".to_string(),
            ));
            return None;
        };

        let [a, b, c, own] = local.octets();
        info!(subnet = %Ipv4Addr::new(a, b, c, 0), ports = ?self.ports, "scanning");

        let found: Vec<NetIdentity> = stream::iter((0..=255u8).filter(|&octet| octet != own))
            .map(|octet| self.probe_host(Ipv4Addr::new(a, b, c, octet)))
            .buffered(self.concurrency)
            .filter_map(|hit| async move { hit })
            .collect()
            .await;

        info!(count = found.len(), "scan finished");
        self.events
            .publish(PrinterEvent::ScannerResolved(found.clone()));
        Some(found)
    }

    async fn probe_host(&self, ip: Ipv4Addr) -> Option<NetIdentity> {
        for &port in &self.ports {
            if self
                .probe
                .is_reachable(SocketAddrV4::new(ip, port), self.probe_timeout)
                .await
            {
                debug!(%ip, port, "printer port open");
                return Some(NetIdentity::new(ip.to_string(), port));
            }
        }
        None
    }
}

/// Clears the running flag however the sweep ends.
struct RunningGuard<'a> {
    running: &'a AtomicBool,
    events: &'a EventBus,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.events.publish(PrinterEvent::ScannerRunning(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct FakeProbe {
        local: Option<Ipv4Addr>,
        open: HashSet<SocketAddrV4>,
        probed: Mutex<Vec<SocketAddrV4>>,
        hold: Option<Arc<Notify>>,
    }

    impl FakeProbe {
        fn new(local: Option<Ipv4Addr>, open: &[(u8, u16)]) -> Self {
            Self {
                local,
                open: open
                    .iter()
                    .map(|&(octet, port)| SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, octet), port))
                    .collect(),
                probed: Mutex::new(Vec::new()),
                hold: None,
            }
        }
    }

    #[async_trait]
    impl Probe for Arc<FakeProbe> {
        async fn local_ipv4(&self) -> Option<Ipv4Addr> {
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            self.local
        }

        async fn is_reachable(&self, addr: SocketAddrV4, _timeout: Duration) -> bool {
            self.probed.lock().unwrap().push(addr);
            self.open.contains(&addr)
        }
    }

    fn settings(ports: Vec<u16>) -> PrinterSettings {
        PrinterSettings {
            scan_ports: ports,
            ..PrinterSettings::default()
        }
    }

    #[tokio::test]
    async fn test_sweep_skips_own_address_and_reports_first_open_port() {
        let probe = Arc::new(FakeProbe::new(
            Some(Ipv4Addr::new(192, 168, 1, 7)),
            &[(20, 9100), (30, 515), (30, 9100), (40, 631)],
        ));
        let scanner = NetworkScanner::new(&settings(vec![9100, 515]), EventBus::default())
            .with_probe(probe.clone());

        let found = scanner.run().await.unwrap();
        assert_eq!(
            found,
            vec![
                NetIdentity::new("192.168.1.20", 9100),
                NetIdentity::new("192.168.1.30", 9100),
            ]
        );

        let probed = probe.probed.lock().unwrap();
        assert!(probed.iter().all(|addr| addr.ip().octets()[3] != 7));
        let hosts: HashSet<u8> = probed.iter().map(|addr| addr.ip().octets()[3]).collect();
        assert_eq!(hosts.len(), 255);
    }

    #[tokio::test]
    async fn test_events_bracket_the_sweep() {
        let probe = Arc::new(FakeProbe::new(Some(Ipv4Addr::new(192, 168, 1, 7)), &[(9, 9100)]));
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let scanner = NetworkScanner::new(&settings(vec![9100]), bus).with_probe(probe);

        scanner.run().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), PrinterEvent::ScannerRunning(true));
        assert_eq!(
            rx.recv().await.unwrap(),
            PrinterEvent::ScannerResolved(vec![NetIdentity::new("192.168.1.9", 9100)])
        );
        assert_eq!(rx.recv().await.unwrap(), PrinterEvent::ScannerRunning(false));
        assert!(!scanner.is_running());
    }

    #[tokio::test]
    async fn test_no_local_address_aborts_cleanly() {
        let probe = Arc::new(FakeProbe::new(None, &[]));
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let scanner = NetworkScanner::new(&settings(vec![9100]), bus).with_probe(probe.clone());

        assert!(scanner.run().await.is_none());
        assert!(!scanner.is_running());
        assert!(probe.probed.lock().unwrap().is_empty());

        assert_eq!(rx.recv().await.unwrap(), PrinterEvent::ScannerRunning(true));
        assert!(matches!(rx.recv().await.unwrap(), PrinterEvent::RegisterError(_)));
        assert_eq!(rx.recv().await.unwrap(), PrinterEvent::ScannerRunning(false));
    }

    #[tokio::test]
    async fn test_single_flight() {
        let hold = Arc::new(Notify::new());
        let mut fake = FakeProbe::new(Some(Ipv4Addr::new(192, 168, 1, 7)), &[]);
        fake.hold = Some(hold.clone());
        let scanner = Arc::new(
            NetworkScanner::new(&settings(vec![9100]), EventBus::default()).with_probe(Arc::new(fake)),
        );

        let first = tokio::spawn({
            let scanner = scanner.clone();
            async move { scanner.run().await }
        });
        while !scanner.is_running() {
            tokio::task::yield_now().await;
        }

        assert!(scanner.run().await.is_none());
        assert!(!scanner.trigger());

        hold.notify_one();
        assert_eq!(first.await.unwrap(), Some(vec![]));
        assert!(!scanner.is_running());
    }
}
