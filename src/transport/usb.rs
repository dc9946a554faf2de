//! # USB Transport
//!
//! Sends print data to the first bulk-OUT endpoint of a USB printer using
//! libusb (through `rusb`).
//!
//! ## Opening a Device
//!
//! ```text
//! enumerate ── vid:pid match? ── no ──> DeviceNotFound
//!                  │
//!            permission? ── no ──> Link::AwaitingPermission
//!                  │
//!        detach kernel driver, claim interface, pick bulk OUT
//!                  │
//!             Link::Open(UsbChannel)
//! ```
//!
//! On Linux, access is governed by udev rules rather than a prompt, so the
//! default [`UsbPermissions`] answers pending requests with a denial and a
//! hint. Hosts with a real consent dialog plug in their own broker.
//!
//! ## Hot-plug
//!
//! When libusb supports it, [`UsbBackend::watch_hotplug`] starts a thread
//! that publishes `deviceAttached` and `deviceDetached` on the backend's
//! [`EventBus`].

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rusb::{
    Context, Device, DeviceHandle, Direction, Hotplug, HotplugBuilder, TransferType, UsbContext,
};
use tracing::{debug, error, info, warn};

use super::{Backend, Link, PermissionRequest, TransportChannel};
use crate::device::{DeviceRecord, TransportKind, UsbIdentity};
use crate::error::PrinterError;
use crate::events::{EventBus, PrinterEvent};
use crate::printer::PrinterSettings;

/// `bDeviceClass` of USB hubs, never printers
const HUB_CLASS: u8 = 0x09;

/// How long the hot-plug thread blocks in libusb per iteration
const EVENT_POLL: Duration = Duration::from_secs(1);

/// Access broker for USB devices.
pub trait UsbPermissions: Send + Sync + 'static {
    fn has_permission(&self, device: &Device<Context>) -> bool;

    /// Ask for access. The returned request resolves once the user answers.
    fn request(&self, identity: UsbIdentity) -> PermissionRequest;
}

/// Permission check by trying to open the device node.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodePermissions;

impl UsbPermissions for NodePermissions {
    fn has_permission(&self, device: &Device<Context>) -> bool {
        device.open().is_ok()
    }

    fn request(&self, identity: UsbIdentity) -> PermissionRequest {
        warn!(
            "no access to {:04x}:{:04x}; add a udev rule granting the device to this user",
            identity.vendor_id, identity.product_id
        );
        let (grant, request) = PermissionRequest::pair();
        grant.resolve(false);
        request
    }
}

/// Claimed bulk-OUT endpoint
pub struct UsbChannel {
    identity: UsbIdentity,
    handle: Option<Arc<DeviceHandle<Context>>>,
    interface: u8,
    endpoint: u8,
    timeout: Duration,
}

impl std::fmt::Debug for UsbChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbChannel")
            .field("identity", &self.identity)
            .field("interface", &self.interface)
            .field("endpoint", &format_args!("{:#04x}", self.endpoint))
            .field("open", &self.handle.is_some())
            .finish()
    }
}

#[async_trait]
impl TransportChannel for UsbChannel {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), PrinterError> {
        let handle = self
            .handle
            .clone()
            .ok_or_else(|| PrinterError::IoFailure("USB channel closed".to_string()))?;
        let data = chunk.to_vec();
        let endpoint = self.endpoint;
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut offset = 0;
            while offset < data.len() {
                let written = handle
                    .write_bulk(endpoint, &data[offset..], timeout)
                    .map_err(|e| PrinterError::IoFailure(format!("bulk transfer failed: {}", e)))?;
                if written == 0 {
                    return Err(PrinterError::IoFailure(
                        "bulk transfer accepted no data".to_string(),
                    ));
                }
                offset += written;
            }
            Ok(())
        })
        .await?
    }

    async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let interface = self.interface;
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(handle) = Arc::try_unwrap(handle) {
                let _ = handle.release_interface(interface);
            }
        })
        .await;
        debug!(vid = self.identity.vendor_id, pid = self.identity.product_id, "interface released");
    }
}

/// USB backend over libusb
pub struct UsbBackend {
    context: OnceLock<Context>,
    transfer_timeout: Duration,
    permissions: Arc<dyn UsbPermissions>,
    events: EventBus,
    watching: Arc<AtomicBool>,
}

impl UsbBackend {
    pub fn new(settings: &PrinterSettings) -> Self {
        Self {
            context: OnceLock::new(),
            transfer_timeout: settings.usb_transfer_timeout(),
            permissions: Arc::new(NodePermissions),
            events: EventBus::default(),
            watching: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the permission broker.
    pub fn with_permissions(mut self, permissions: impl UsbPermissions) -> Self {
        self.permissions = Arc::new(permissions);
        self
    }

    /// Bus carrying `deviceAttached` / `deviceDetached`.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn context(&self) -> Result<Context, PrinterError> {
        if let Some(context) = self.context.get() {
            return Ok(context.clone());
        }
        let context = Context::new()
            .map_err(|e| PrinterError::AdapterNotReady(format!("libusb unavailable: {}", e)))?;
        Ok(self.context.get_or_init(|| context).clone())
    }

    /// Start publishing hot-plug events. Idempotent.
    ///
    /// Returns `false` when libusb has no hot-plug support on this platform.
    pub fn watch_hotplug(&self) -> Result<bool, PrinterError> {
        if !rusb::has_hotplug() {
            warn!("libusb has no hot-plug support here");
            return Ok(false);
        }
        if self.watching.swap(true, Ordering::SeqCst) {
            return Ok(true);
        }
        let context = self.context()?;
        let events = self.events.clone();
        let watching = self.watching.clone();

        std::thread::Builder::new()
            .name("rollo-usb-hotplug".to_string())
            .spawn(move || {
                let callback: Box<dyn Hotplug<Context>> = Box::new(HotplugWatcher { events });
                let _registration = match HotplugBuilder::new()
                    .enumerate(false)
                    .register(&context, callback)
                {
                    Ok(registration) => registration,
                    Err(e) => {
                        error!("hot-plug registration failed: {}", e);
                        watching.store(false, Ordering::SeqCst);
                        return;
                    }
                };
                info!("watching USB hot-plug");
                loop {
                    if let Err(e) = context.handle_events(Some(EVENT_POLL)) {
                        error!("libusb event loop stopped: {}", e);
                        watching.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            })
            .map_err(|e| {
                self.watching.store(false, Ordering::SeqCst);
                PrinterError::AdapterNotReady(format!("Failed to start hot-plug thread: {}", e))
            })?;
        Ok(true)
    }
}

#[async_trait]
impl Backend for UsbBackend {
    type Identity = UsbIdentity;
    type Channel = UsbChannel;

    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    async fn init(&self) -> Result<(), PrinterError> {
        self.context()?;
        if let Err(e) = self.watch_hotplug() {
            warn!("{}", e);
        }
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, PrinterError> {
        let context = self.context()?;
        tokio::task::spawn_blocking(move || enumerate(&context)).await?
    }

    async fn open(
        &self,
        identity: &UsbIdentity,
    ) -> Result<(DeviceRecord, Link<UsbChannel>), PrinterError> {
        let context = self.context()?;
        let permissions = self.permissions.clone();
        let identity = *identity;
        let timeout = self.transfer_timeout;

        tokio::task::spawn_blocking(move || {
            let device = find_device(&context, identity)?;
            let record = DeviceRecord::new(product_name(&device, identity), identity);

            if !permissions.has_permission(&device) {
                info!(vid = identity.vendor_id, pid = identity.product_id, "requesting USB permission");
                return Ok((record, Link::AwaitingPermission(permissions.request(identity))));
            }

            let channel = claim(&device, identity, timeout)?;
            info!(
                vid = identity.vendor_id,
                pid = identity.product_id,
                endpoint = channel.endpoint,
                "USB interface claimed"
            );
            Ok((record, Link::Open(channel)))
        })
        .await?
    }
}

struct HotplugWatcher {
    events: EventBus,
}

impl Hotplug<Context> for HotplugWatcher {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(bus = device.bus_number(), address = device.address(), "USB device attached");
        self.events.publish(PrinterEvent::DeviceAttached);
    }

    fn device_left(&mut self, device: Device<Context>) {
        if let Ok(desc) = device.device_descriptor() {
            let identity = UsbIdentity::new(desc.vendor_id(), desc.product_id());
            debug!(vid = identity.vendor_id, pid = identity.product_id, "USB device detached");
            self.events.publish(PrinterEvent::DeviceDetached(identity));
        }
    }
}

/// Bulk-OUT endpoint candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EndpointInfo {
    interface: u8,
    setting: u8,
    address: u8,
    direction: Direction,
    transfer_type: TransferType,
}

fn pick_bulk_out(endpoints: impl IntoIterator<Item = EndpointInfo>) -> Option<EndpointInfo> {
    endpoints
        .into_iter()
        .find(|ep| ep.direction == Direction::Out && ep.transfer_type == TransferType::Bulk)
}

fn fallback_name(identity: UsbIdentity) -> String {
    format!("USB {:04x}:{:04x}", identity.vendor_id, identity.product_id)
}

fn product_name(device: &Device<Context>, identity: UsbIdentity) -> String {
    device
        .device_descriptor()
        .ok()
        .and_then(|desc| {
            let handle = device.open().ok()?;
            handle.read_product_string_ascii(&desc).ok()
        })
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| fallback_name(identity))
}

fn enumerate(context: &Context) -> Result<Vec<DeviceRecord>, PrinterError> {
    let devices = context
        .devices()
        .map_err(|e| PrinterError::AdapterNotReady(format!("USB enumeration failed: {}", e)))?;
    let mut records = Vec::new();
    for device in devices.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.class_code() == HUB_CLASS {
            continue;
        }
        let identity = UsbIdentity::new(desc.vendor_id(), desc.product_id());
        records.push(DeviceRecord::new(product_name(&device, identity), identity));
    }
    debug!(count = records.len(), "USB devices enumerated");
    Ok(records)
}

fn find_device(context: &Context, identity: UsbIdentity) -> Result<Device<Context>, PrinterError> {
    let devices = context
        .devices()
        .map_err(|e| PrinterError::AdapterNotReady(format!("USB enumeration failed: {}", e)))?;
    devices
        .iter()
        .find(|device| {
            device.device_descriptor().is_ok_and(|desc| {
                desc.vendor_id() == identity.vendor_id && desc.product_id() == identity.product_id
            })
        })
        .ok_or_else(|| PrinterError::DeviceNotFound(fallback_name(identity)))
}

fn connect_error(e: rusb::Error) -> PrinterError {
    match e {
        rusb::Error::Access | rusb::Error::NoDevice | rusb::Error::NotFound => e.into(),
        _ => PrinterError::ConnectionFailed(e.to_string()),
    }
}

fn claim(
    device: &Device<Context>,
    identity: UsbIdentity,
    timeout: Duration,
) -> Result<UsbChannel, PrinterError> {
    let config = device.active_config_descriptor().map_err(connect_error)?;
    let endpoints = config.interfaces().flat_map(|interface| {
        interface
            .descriptors()
            .flat_map(|desc| {
                let (interface, setting) = (desc.interface_number(), desc.setting_number());
                desc.endpoint_descriptors()
                    .map(|ep| EndpointInfo {
                        interface,
                        setting,
                        address: ep.address(),
                        direction: ep.direction(),
                        transfer_type: ep.transfer_type(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
    });
    let endpoint = pick_bulk_out(endpoints).ok_or_else(|| {
        PrinterError::ConnectionFailed(format!("{} has no bulk OUT endpoint", fallback_name(identity)))
    })?;

    let handle = device.open().map_err(connect_error)?;
    // Not supported on every platform; claiming still works where a driver is absent.
    let _ = handle.set_auto_detach_kernel_driver(true);
    handle
        .claim_interface(endpoint.interface)
        .map_err(connect_error)?;
    if endpoint.setting != 0 {
        handle
            .set_alternate_setting(endpoint.interface, endpoint.setting)
            .map_err(connect_error)?;
    }

    Ok(UsbChannel {
        identity,
        handle: Some(Arc::new(handle)),
        interface: endpoint.interface,
        endpoint: endpoint.address,
        timeout,
    })
}
