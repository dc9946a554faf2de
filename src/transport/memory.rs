//! # In-Memory Transport
//!
//! A [`Backend`] whose channels append every chunk to a shared buffer.
//! Useful for exercising the connection manager without hardware, and for
//! inspecting the exact bytes a print job produces.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Backend, Link, PermissionGrant, PermissionRequest, TransportChannel};
use crate::device::{DeviceIdentity, DeviceRecord, TransportKind};
use crate::error::PrinterError;

#[derive(Debug, Default)]
struct TapState {
    chunks: Mutex<Vec<Vec<u8>>>,
    closes: AtomicUsize,
    fail_writes: AtomicBool,
}

/// Observer for everything written through memory channels.
#[derive(Debug, Clone, Default)]
pub struct MemoryTap {
    state: Arc<TapState>,
}

impl MemoryTap {
    /// Every chunk written so far, in order.
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.state.chunks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// All bytes written so far, concatenated.
    pub fn bytes(&self) -> Vec<u8> {
        self.chunks().concat()
    }

    pub fn clear(&self) {
        if let Ok(mut chunks) = self.state.chunks.lock() {
            chunks.clear();
        }
    }

    /// Number of channels closed so far.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }
}

/// Channel that records writes into a [`MemoryTap`]
#[derive(Debug)]
pub struct MemoryChannel {
    tap: MemoryTap,
    open: bool,
}

impl MemoryChannel {
    pub fn new(tap: MemoryTap) -> Self {
        Self { tap, open: true }
    }
}

#[async_trait]
impl TransportChannel for MemoryChannel {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), PrinterError> {
        if !self.open {
            return Err(PrinterError::IoFailure("channel closed".to_string()));
        }
        if self.tap.state.fail_writes.load(Ordering::SeqCst) {
            return Err(PrinterError::IoFailure("broken pipe".to_string()));
        }
        // Yield so concurrent writers would interleave if not serialized.
        tokio::task::yield_now().await;
        self.tap
            .state
            .chunks
            .lock()
            .map_err(|_| PrinterError::IoFailure("tap poisoned".to_string()))?
            .push(chunk.to_vec());
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.tap.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Default)]
enum Gate {
    #[default]
    Open,
    Required {
        granted: bool,
        pending: Option<PermissionGrant>,
    },
}

/// Backend serving a fixed device list through memory channels.
#[derive(Debug)]
pub struct MemoryBackend {
    kind: TransportKind,
    devices: Vec<DeviceRecord>,
    tap: MemoryTap,
    opens: AtomicUsize,
    prompts: AtomicUsize,
    ready: AtomicBool,
    fail_open: Mutex<Option<PrinterError>>,
    gate: Mutex<Gate>,
}

impl MemoryBackend {
    pub fn new(kind: TransportKind, devices: Vec<DeviceRecord>) -> Self {
        Self {
            kind,
            devices,
            tap: MemoryTap::default(),
            opens: AtomicUsize::new(0),
            prompts: AtomicUsize::new(0),
            ready: AtomicBool::new(true),
            fail_open: Mutex::new(None),
            gate: Mutex::new(Gate::Open),
        }
    }

    /// Require a permission grant before channels open.
    pub fn with_permission_gate(self) -> Self {
        if let Ok(mut gate) = self.gate.lock() {
            *gate = Gate::Required {
                granted: false,
                pending: None,
            };
        }
        self
    }

    pub fn tap(&self) -> MemoryTap {
        self.tap.clone()
    }

    /// Number of channels created so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of permission prompts issued so far.
    pub fn permission_requests(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Simulate a missing or disabled adapter.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: PrinterError) {
        if let Ok(mut slot) = self.fail_open.lock() {
            *slot = Some(error);
        }
    }

    /// Answer the outstanding permission prompt, if any.
    pub fn answer_permission(&self, granted: bool) {
        if let Ok(mut gate) = self.gate.lock()
            && let Gate::Required {
                granted: g,
                pending,
            } = &mut *gate
        {
            *g = granted;
            if let Some(grant) = pending.take() {
                grant.resolve(granted);
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Identity = DeviceIdentity;
    type Channel = MemoryChannel;

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn init(&self) -> Result<(), PrinterError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PrinterError::AdapterNotReady(format!(
                "{} adapter disabled",
                self.kind
            )))
        }
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, PrinterError> {
        Ok(self.devices.clone())
    }

    async fn open(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<(DeviceRecord, Link<MemoryChannel>), PrinterError> {
        if let Some(err) = self.fail_open.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(err);
        }
        let record = self
            .devices
            .iter()
            .find(|d| &d.identity == identity)
            .cloned()
            .ok_or_else(|| PrinterError::DeviceNotFound(identity.to_string()))?;

        if let Ok(mut gate) = self.gate.lock()
            && let Gate::Required { granted, pending } = &mut *gate
            && !*granted
        {
            let (grant, request) = PermissionRequest::pair();
            *pending = Some(grant);
            self.prompts.fetch_add(1, Ordering::SeqCst);
            return Ok((record, Link::AwaitingPermission(request)));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok((record, Link::Open(MemoryChannel::new(self.tap.clone()))))
    }
}
