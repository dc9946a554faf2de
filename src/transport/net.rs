//! # Network Transport
//!
//! Raw TCP printing, usually to port 9100. Discovery is not a return value:
//! `list_devices` kicks off a [`NetworkScanner`] sweep and answers with an
//! empty list, and results arrive as `scannerResolved` events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use super::{Backend, Link, TransportChannel};
use crate::device::{DeviceRecord, NetIdentity, TransportKind};
use crate::error::PrinterError;
use crate::events::EventBus;
use crate::printer::PrinterSettings;
use crate::scanner::NetworkScanner;

/// Connected TCP socket
#[derive(Debug)]
pub struct NetChannel {
    address: String,
    stream: Option<TcpStream>,
}

#[async_trait]
impl TransportChannel for NetChannel {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), PrinterError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PrinterError::IoFailure(format!("{} is closed", self.address)))?;
        stream.write_all(chunk).await.map_err(|e| {
            error!(address = %self.address, "Failed to write to printer: {}", e);
            PrinterError::IoFailure(e.to_string())
        })
    }

    async fn flush(&mut self) -> Result<(), PrinterError> {
        if let Some(stream) = &mut self.stream {
            stream.flush().await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(address = %self.address, "socket closed");
        }
    }
}

/// TCP backend
pub struct NetBackend {
    scanner: Arc<NetworkScanner>,
    connect_timeout: Duration,
}

impl NetBackend {
    pub fn new(settings: &PrinterSettings) -> Self {
        Self::with_scanner(
            settings,
            Arc::new(NetworkScanner::new(settings, EventBus::default())),
        )
    }

    pub fn with_scanner(settings: &PrinterSettings, scanner: Arc<NetworkScanner>) -> Self {
        Self {
            scanner,
            connect_timeout: settings.net_connect_timeout(),
        }
    }

    /// Bus carrying `scannerRunning` / `scannerResolved`.
    pub fn events(&self) -> &EventBus {
        self.scanner.events()
    }

    pub fn scanner(&self) -> &Arc<NetworkScanner> {
        &self.scanner
    }
}

#[async_trait]
impl Backend for NetBackend {
    type Identity = NetIdentity;
    type Channel = NetChannel;

    fn kind(&self) -> TransportKind {
        TransportKind::Net
    }

    async fn init(&self) -> Result<(), PrinterError> {
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, PrinterError> {
        self.scanner.trigger();
        Ok(Vec::new())
    }

    async fn open(
        &self,
        identity: &NetIdentity,
    ) -> Result<(DeviceRecord, Link<NetChannel>), PrinterError> {
        let address = identity.address();
        info!("Connecting to printer at {}", address);
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(PrinterError::ConnectionFailed(format!("{}: {}", address, e))),
            Err(_) => {
                return Err(PrinterError::ConnectionFailed(format!(
                    "{}: connection timed out",
                    address
                )));
            }
        };
        let _ = stream.set_nodelay(true);

        let record = DeviceRecord::new(address.clone(), identity.clone());
        Ok((
            record,
            Link::Open(NetChannel {
                address,
                stream: Some(stream),
            }),
        ))
    }
}
