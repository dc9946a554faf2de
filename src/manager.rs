//! # Connection Manager
//!
//! One manager per transport. It owns the transport's only connection and
//! serializes every state change and every print behind a single
//! `tokio::sync::Mutex`, so a print job's chunks never interleave with
//! another writer's.
//!
//! ## States
//!
//! ```text
//!            select(id)                        select(id) / print
//!   Ready ──────────────> Connected(id) ───────────────────────────┐
//!     ^  \                   │   ^                                 │
//!     │   \ needs consent    │   └──── same id: returned as-is ────┘
//!     │    v                 │
//!     │  AwaitingPermission ─┤ granted: reopen on next print
//!     │    │ denied          │
//!     └────┴─────────────────┘ close / write failure / detach
//! ```
//!
//! Every operation returns a [`Completion`]; the work runs on the tokio
//! runtime and never blocks the caller.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rollo::device::NetIdentity;
//! use rollo::fetch::HttpImageFetcher;
//! use rollo::manager::ConnectionManager;
//! use rollo::printer::PrinterSettings;
//! use rollo::transport::NetBackend;
//!
//! # async fn demo() -> Result<(), rollo::error::PrinterError> {
//! let settings = PrinterSettings::default();
//! let printer = ConnectionManager::new(
//!     NetBackend::new(&settings),
//!     settings,
//!     Arc::new(HttpImageFetcher::new()?),
//! );
//! printer.select_device(NetIdentity::new("10.0.0.5", 9100)).await?;
//! printer.print_qr_code("https://example.com", None).await?;
//! printer.close_connection_if_exists().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::completion::Completion;
use crate::device::{DeviceIdentity, DeviceRecord, TransportKind};
use crate::error::PrinterError;
use crate::fetch::ImageFetcher;
use crate::printer::PrinterSettings;
use crate::protocol::markup::{self, PrintOptions};
use crate::protocol::raster::{self, EscPosStream};
use crate::render::{PixelMatrix, qr};
use crate::transport::{
    Backend, Link, PermissionRequest, PermissionState, TransportChannel, write_stream,
};

/// Standard alphabet; padding optional, trailing bits ignored.
const RAW_PAYLOAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Snapshot of a manager's state, safe to hand to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "device", rename_all = "camelCase")]
pub enum ConnectionStatus {
    Ready,
    AwaitingPermission(DeviceRecord),
    Connected(DeviceRecord),
}

enum ConnectionState<B: Backend> {
    Ready,
    AwaitingPermission {
        identity: B::Identity,
        record: DeviceRecord,
        request: PermissionRequest,
    },
    Connected {
        identity: B::Identity,
        record: DeviceRecord,
        channel: B::Channel,
    },
}

struct Shared<B: Backend> {
    backend: B,
    settings: PrinterSettings,
    fetcher: Arc<dyn ImageFetcher>,
    state: Mutex<ConnectionState<B>>,
    initialized: AtomicBool,
}

/// Connection state machine for one transport
pub struct ConnectionManager<B: Backend> {
    inner: Arc<Shared<B>>,
}

impl<B: Backend> Clone for ConnectionManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> ConnectionManager<B> {
    pub fn new(backend: B, settings: PrinterSettings, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            inner: Arc::new(Shared {
                backend,
                settings,
                fetcher,
                state: Mutex::new(ConnectionState::Ready),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn settings(&self) -> &PrinterSettings {
        &self.inner.settings
    }

    /// Check that the transport is usable. Selects nothing.
    pub fn init(&self) -> Completion<()> {
        let inner = Arc::clone(&self.inner);
        Completion::spawn(async move {
            inner.backend.init().await?;
            inner.initialized.store(true, Ordering::SeqCst);
            info!(transport = %inner.backend.kind(), "transport ready");
            Ok(())
        })
    }

    /// Paired (BLE) or enumerated (USB) devices. Network returns an empty
    /// list and starts a scan whose results arrive as events.
    pub fn list_devices(&self) -> Completion<Vec<DeviceRecord>> {
        let inner = Arc::clone(&self.inner);
        Completion::spawn(async move {
            inner.ensure_init().await?;
            inner.backend.list_devices().await
        })
    }

    /// Bind `identity`, reusing the live connection if it is the same device.
    pub fn select_device(&self, identity: impl Into<B::Identity>) -> Completion<DeviceRecord> {
        let inner = Arc::clone(&self.inner);
        let identity = identity.into();
        Completion::spawn(async move {
            inner.ensure_init().await?;
            let mut state = inner.state.lock().await;

            let reusable = match &mut *state {
                ConnectionState::Connected {
                    identity: current,
                    record,
                    ..
                } if *current == identity => Some(record.clone()),
                ConnectionState::AwaitingPermission {
                    identity: current,
                    record,
                    request,
                } if *current == identity => {
                    (request.poll_state() == PermissionState::Pending).then(|| record.clone())
                }
                _ => None,
            };
            if let Some(record) = reusable {
                debug!(device = %record.identity, "already selected, reusing");
                return Ok(record);
            }

            inner.close_locked(&mut state).await;
            inner.open_locked(&mut state, identity).await
        })
    }

    /// Release the current channel, if any. Never fails.
    pub fn close_connection_if_exists(&self) -> Completion<()> {
        let inner = Arc::clone(&self.inner);
        Completion::spawn(async move {
            let mut state = inner.state.lock().await;
            inner.close_locked(&mut state).await;
            Ok(())
        })
    }

    /// Close the connection only if it is bound to `identity`.
    ///
    /// Returns whether a connection was closed.
    pub async fn close_if_selected(&self, identity: &B::Identity) -> bool {
        let mut state = self.inner.state.lock().await;
        let selected = match &*state {
            ConnectionState::Connected { identity: current, .. }
            | ConnectionState::AwaitingPermission { identity: current, .. } => current == identity,
            ConnectionState::Ready => false,
        };
        if selected {
            self.inner.close_locked(&mut state).await;
        }
        selected
    }

    pub async fn status(&self) -> ConnectionStatus {
        match &*self.inner.state.lock().await {
            ConnectionState::Ready => ConnectionStatus::Ready,
            ConnectionState::AwaitingPermission { record, .. } => {
                ConnectionStatus::AwaitingPermission(record.clone())
            }
            ConnectionState::Connected { record, .. } => ConnectionStatus::Connected(record.clone()),
        }
    }

    /// Decode a base64 payload and write it verbatim.
    ///
    /// Whitespace anywhere in the payload is skipped and padding is optional.
    pub fn print_raw_data(&self, payload: &str) -> Completion<()> {
        let compact: Vec<u8> = payload
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let bytes = match RAW_PAYLOAD.decode(&compact) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Completion::ready(Err(PrinterError::InvalidArgument(format!(
                    "invalid base64 payload: {}",
                    e
                ))));
            }
        };
        self.print_bytes(bytes)
    }

    /// Write `bytes` verbatim.
    pub fn print_bytes(&self, bytes: Vec<u8>) -> Completion<()> {
        let inner = Arc::clone(&self.inner);
        Completion::spawn(async move {
            let mut stream = EscPosStream::new();
            stream.push(bytes);
            inner.write(stream).await
        })
    }

    /// Print tagged text with the given trailer options.
    pub fn print_markup(&self, text: &str, options: PrintOptions) -> Completion<()> {
        self.print_bytes(markup::convert(text, options))
    }

    /// Print tagged text, no cut or beep.
    pub fn print_text(&self, text: &str) -> Completion<()> {
        self.print_markup(text, PrintOptions::text())
    }

    /// Print tagged text, then feed, cut and beep.
    pub fn print_bill(&self, text: &str) -> Completion<()> {
        self.print_markup(text, PrintOptions::bill())
    }

    /// Fetch an image, fit it in `max_dimension` (default from settings) and
    /// print it as one uninterrupted job.
    pub fn print_image_data(&self, locator: &str, max_dimension: Option<i64>) -> Completion<()> {
        let inner = Arc::clone(&self.inner);
        let locator = locator.to_string();
        Completion::spawn(async move {
            inner.preflight().await?;
            let dimension = inner.settings.image_dimension_or_default(max_dimension);
            let image = inner.fetcher.fetch(&locator).await?;
            let stream = tokio::task::spawn_blocking(move || {
                raster::encode(&PixelMatrix::from_image(&image), dimension)
            })
            .await??;
            debug!(%locator, chunks = stream.chunks().len(), bytes = stream.len(), "image encoded");
            inner.write(stream).await
        })
    }

    /// Render `text` as a `size`×`size` QR code (default from settings) and
    /// print it as one uninterrupted job.
    pub fn print_qr_code(&self, text: &str, size: Option<i64>) -> Completion<()> {
        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        Completion::spawn(async move {
            inner.preflight().await?;
            let size = inner.settings.qr_size_or_default(size);
            let stream = tokio::task::spawn_blocking(move || {
                let matrix = qr::encode(&text, size)?;
                raster::encode(&matrix, size)
            })
            .await??;
            inner.write(stream).await
        })
    }
}

impl<B: Backend> Shared<B> {
    async fn ensure_init(&self) -> Result<(), PrinterError> {
        if !self.initialized.load(Ordering::SeqCst) {
            self.backend.init().await?;
            self.initialized.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close_locked(&self, state: &mut ConnectionState<B>) {
        match std::mem::replace(state, ConnectionState::Ready) {
            ConnectionState::Connected {
                record,
                mut channel,
                ..
            } => {
                channel.close().await;
                info!(device = %record.identity, "connection closed");
            }
            ConnectionState::AwaitingPermission { record, .. } => {
                info!(device = %record.identity, "pending permission dropped");
            }
            ConnectionState::Ready => {}
        }
    }

    async fn open_locked(
        &self,
        state: &mut ConnectionState<B>,
        identity: B::Identity,
    ) -> Result<DeviceRecord, PrinterError> {
        let (record, link) = self.backend.open(&identity).await.inspect_err(|e| {
            warn!(transport = %self.backend.kind(), ?identity, "connect failed: {}", e);
        })?;
        *state = match link {
            Link::Open(channel) => {
                info!(device = %record.identity, "connected");
                ConnectionState::Connected {
                    identity,
                    record: record.clone(),
                    channel,
                }
            }
            Link::AwaitingPermission(request) => {
                info!(device = %record.identity, "waiting for permission");
                ConnectionState::AwaitingPermission {
                    identity,
                    record: record.clone(),
                    request,
                }
            }
        };
        Ok(record)
    }

    /// The live channel, reopening first if a pending permission was granted.
    async fn connected_channel<'s>(
        &self,
        state: &'s mut ConnectionState<B>,
    ) -> Result<&'s mut B::Channel, PrinterError> {
        if let ConnectionState::AwaitingPermission {
            identity, request, ..
        } = &mut *state
        {
            match request.poll_state() {
                PermissionState::Pending => {}
                PermissionState::Denied => {
                    *state = ConnectionState::Ready;
                    return Err(PrinterError::PermissionDenied(
                        "access to the device was refused".to_string(),
                    ));
                }
                PermissionState::Granted => {
                    let identity = identity.clone();
                    *state = ConnectionState::Ready;
                    self.open_locked(state, identity).await?;
                }
            }
        }
        match state {
            ConnectionState::Connected { channel, .. } => Ok(channel),
            ConnectionState::AwaitingPermission { .. } => Err(PrinterError::PermissionDenied(
                "waiting for the user to grant access".to_string(),
            )),
            ConnectionState::Ready => Err(PrinterError::NotConnected),
        }
    }

    /// Fail fast before fetching or encoding anything.
    async fn preflight(&self) -> Result<(), PrinterError> {
        let mut state = self.state.lock().await;
        self.connected_channel(&mut state).await.map(|_| ())
    }

    /// Write a whole stream while holding the lock.
    ///
    /// A failed write closes the channel and returns the manager to `Ready`.
    async fn write(&self, stream: EscPosStream) -> Result<(), PrinterError> {
        let mut state = self.state.lock().await;
        let result = match self.connected_channel(&mut state).await {
            Ok(channel) => write_stream(channel, &stream).await,
            Err(e) => return Err(e),
        };
        match result {
            Ok(()) => {
                debug!(bytes = stream.len(), chunks = stream.chunks().len(), "print job written");
                Ok(())
            }
            Err(e) => {
                warn!("write failed, dropping connection: {}", e);
                self.close_locked(&mut state).await;
                Err(e)
            }
        }
    }
}

/// Transport-independent view of a [`ConnectionManager`].
///
/// Lets callers hold managers for different transports side by side and
/// select devices by [`DeviceIdentity`].
pub trait Printer: Send + Sync {
    fn kind(&self) -> TransportKind;
    fn init(&self) -> Completion<()>;
    fn list_devices(&self) -> Completion<Vec<DeviceRecord>>;
    fn select_device(&self, identity: DeviceIdentity) -> Completion<DeviceRecord>;
    fn close_connection_if_exists(&self) -> Completion<()>;
    fn print_raw_data(&self, payload: &str) -> Completion<()>;
    fn print_bytes(&self, bytes: Vec<u8>) -> Completion<()>;
    fn print_markup(&self, text: &str, options: PrintOptions) -> Completion<()>;
    fn print_image_data(&self, locator: &str, max_dimension: Option<i64>) -> Completion<()>;
    fn print_qr_code(&self, text: &str, size: Option<i64>) -> Completion<()>;
    fn status(&self) -> Completion<ConnectionStatus>;
}

impl<B: Backend> Printer for ConnectionManager<B> {
    fn kind(&self) -> TransportKind {
        self.inner.backend.kind()
    }

    fn init(&self) -> Completion<()> {
        ConnectionManager::init(self)
    }

    fn list_devices(&self) -> Completion<Vec<DeviceRecord>> {
        ConnectionManager::list_devices(self)
    }

    fn select_device(&self, identity: DeviceIdentity) -> Completion<DeviceRecord> {
        let description = identity.to_string();
        match <B::Identity as TryFrom<DeviceIdentity>>::try_from(identity) {
            Ok(identity) => ConnectionManager::select_device(self, identity),
            Err(_) => Completion::ready(Err(PrinterError::InvalidArgument(format!(
                "{} cannot be used on the {} transport",
                description,
                self.inner.backend.kind()
            )))),
        }
    }

    fn close_connection_if_exists(&self) -> Completion<()> {
        ConnectionManager::close_connection_if_exists(self)
    }

    fn print_raw_data(&self, payload: &str) -> Completion<()> {
        ConnectionManager::print_raw_data(self, payload)
    }

    fn print_bytes(&self, bytes: Vec<u8>) -> Completion<()> {
        ConnectionManager::print_bytes(self, bytes)
    }

    fn print_markup(&self, text: &str, options: PrintOptions) -> Completion<()> {
        ConnectionManager::print_markup(self, text, options)
    }

    fn print_image_data(&self, locator: &str, max_dimension: Option<i64>) -> Completion<()> {
        ConnectionManager::print_image_data(self, locator, max_dimension)
    }

    fn print_qr_code(&self, text: &str, size: Option<i64>) -> Completion<()> {
        ConnectionManager::print_qr_code(self, text, size)
    }

    fn status(&self) -> Completion<ConnectionStatus> {
        let manager = self.clone();
        Completion::spawn(async move { Ok(manager.status().await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NetIdentity;
    use crate::fetch::HttpImageFetcher;
    use crate::transport::MemoryBackend;
    use pretty_assertions::assert_eq;

    fn device(port: u16) -> DeviceRecord {
        DeviceRecord::new(format!("mem-{}", port), NetIdentity::new("10.0.0.5", port))
    }

    fn manager(backend: MemoryBackend) -> ConnectionManager<MemoryBackend> {
        ConnectionManager::new(
            backend,
            PrinterSettings::default(),
            Arc::new(HttpImageFetcher::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_print_requires_connection() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        assert_eq!(mgr.print_raw_data("SGVsbG8=").await, Err(PrinterError::NotConnected));
        assert_eq!(
            mgr.print_qr_code("x", None).await,
            Err(PrinterError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_select_auto_inits() {
        let backend = MemoryBackend::new(TransportKind::Net, vec![device(9100)]);
        backend.set_ready(false);
        let mgr = manager(backend);
        let err = mgr.select_device(device(9100).identity).await.unwrap_err();
        assert!(matches!(err, PrinterError::AdapterNotReady(_)));

        mgr.backend().set_ready(true);
        mgr.select_device(device(9100).identity).await.unwrap();
        assert!(matches!(mgr.status().await, ConnectionStatus::Connected(_)));
    }

    #[tokio::test]
    async fn test_switching_devices_closes_previous() {
        let mgr = manager(MemoryBackend::new(
            TransportKind::Net,
            vec![device(9100), device(9101)],
        ));
        mgr.select_device(device(9100).identity).await.unwrap();
        let record = mgr.select_device(device(9101).identity).await.unwrap();
        assert_eq!(record, device(9101));
        assert_eq!(mgr.backend().opens(), 2);
        assert_eq!(mgr.backend().tap().closes(), 1);
    }

    #[tokio::test]
    async fn test_failed_select_leaves_ready() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        mgr.select_device(device(9100).identity).await.unwrap();
        mgr.backend()
            .fail_next_open(PrinterError::ConnectionFailed("refused".into()));
        let err = mgr.select_device(device(9101).identity).await.unwrap_err();
        assert!(matches!(err, PrinterError::ConnectionFailed(_)));
        assert_eq!(mgr.status().await, ConnectionStatus::Ready);
        assert_eq!(mgr.backend().tap().closes(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_reverts_to_ready() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        mgr.select_device(device(9100).identity).await.unwrap();
        mgr.backend().tap().fail_writes(true);

        let err = mgr.print_text("hi").await.unwrap_err();
        assert!(matches!(err, PrinterError::IoFailure(_)));
        assert_eq!(mgr.status().await, ConnectionStatus::Ready);
        assert_eq!(mgr.print_text("hi").await, Err(PrinterError::NotConnected));
    }

    #[tokio::test]
    async fn test_bad_base64() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        mgr.select_device(device(9100).identity).await.unwrap();
        let err = mgr.print_raw_data("not base64!").await.unwrap_err();
        assert!(matches!(err, PrinterError::InvalidArgument(_)));
        assert!(mgr.backend().tap().chunks().is_empty());
    }

    #[tokio::test]
    async fn test_raw_payload_without_padding() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        mgr.select_device(device(9100).identity).await.unwrap();
        mgr.print_raw_data("SGVsbG8").await.unwrap();
        assert_eq!(mgr.backend().tap().bytes(), b"Hello".to_vec());
    }

    #[tokio::test]
    async fn test_raw_payload_with_line_breaks() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        mgr.select_device(device(9100).identity).await.unwrap();
        mgr.print_raw_data("SGVs\nbG8=\r\n").await.unwrap();
        mgr.print_raw_data(" SGVs bG8 ").await.unwrap();
        assert_eq!(mgr.backend().tap().bytes(), b"HelloHello".to_vec());
    }

    #[tokio::test]
    async fn test_qr_job_is_single_raster_stream() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        mgr.select_device(device(9100).identity).await.unwrap();
        mgr.print_qr_code("rollo", Some(120)).await.unwrap();

        let expected = raster::encode(&qr::encode("rollo", 120).unwrap(), 120).unwrap();
        assert_eq!(mgr.backend().tap().chunks(), expected.chunks().to_vec());
    }

    #[tokio::test]
    async fn test_qr_size_too_small() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        mgr.select_device(device(9100).identity).await.unwrap();
        let err = mgr.print_qr_code("rollo", Some(10)).await.unwrap_err();
        assert!(matches!(err, PrinterError::EncodingFailed(_)));
        // encoding failures leave the connection alone
        assert!(matches!(mgr.status().await, ConnectionStatus::Connected(_)));
    }

    #[tokio::test]
    async fn test_qr_size_too_large() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        mgr.select_device(device(9100).identity).await.unwrap();
        let err = mgr.print_qr_code("rollo", Some(60_000)).await.unwrap_err();
        assert!(matches!(err, PrinterError::EncodingFailed(_)));
        assert!(mgr.backend().tap().chunks().is_empty());
        assert!(matches!(mgr.status().await, ConnectionStatus::Connected(_)));
    }

    #[tokio::test]
    async fn test_bill_trailer_reaches_channel() {
        let mgr = manager(MemoryBackend::new(TransportKind::Net, vec![device(9100)]));
        mgr.select_device(device(9100).identity).await.unwrap();
        mgr.print_bill("x").await.unwrap();
        let bytes = mgr.backend().tap().bytes();
        assert!(bytes.ends_with(&[0x1B, 0x69, 0x1B, 0x42, 3, 2]));
    }

    #[tokio::test]
    async fn test_close_if_selected() {
        let mgr = manager(MemoryBackend::new(
            TransportKind::Net,
            vec![device(9100), device(9101)],
        ));
        mgr.select_device(device(9100).identity).await.unwrap();
        assert!(!mgr.close_if_selected(&device(9101).identity).await);
        assert!(mgr.close_if_selected(&device(9100).identity).await);
        assert_eq!(mgr.status().await, ConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn test_printer_trait_rejects_foreign_identity() {
        let backend = crate::transport::NetBackend::new(&PrinterSettings::default());
        let mgr = ConnectionManager::new(
            backend,
            PrinterSettings::default(),
            Arc::new(HttpImageFetcher::new().unwrap()),
        );
        let printer: &dyn Printer = &mgr;
        let err = printer
            .select_device(crate::device::UsbIdentity::new(1, 2).into())
            .await
            .unwrap_err();
        assert!(matches!(err, PrinterError::InvalidArgument(_)));
    }

    #[test]
    fn test_status_wire_shape() {
        let status = ConnectionStatus::Connected(device(9100));
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({
                "state": "connected",
                "device": {"name": "mem-9100", "transport": "net", "host": "10.0.0.5", "port": 9100}
            })
        );
        assert_eq!(
            serde_json::to_value(ConnectionStatus::Ready).unwrap(),
            serde_json::json!({"state": "ready"})
        );
    }
}
