//! # Bluetooth RFCOMM Transport
//!
//! Talks to paired printers over the Serial Port Profile (SPP) through a
//! bound `/dev/rfcommN` TTY. Uses the BlueZ command line tools, so it works
//! on any Linux box with `bluetoothctl` and `rfcomm` installed.
//!
//! ## Connection Steps
//!
//! ```text
//! bluetoothctl show            adapter present and powered?
//! bluetoothctl devices Paired  is the MAC paired?
//! /proc/net/rfcomm             already bound to /dev/rfcommN?
//!   └ no: sdptool search       SPP channel for 00001101-0000-1000-8000-00805f9b34fb
//!         bluetoothctl connect
//!         rfcomm bind N MAC channel
//! open /dev/rfcommN raw
//! ```
//!
//! ## TTY Configuration
//!
//! The RFCOMM device is opened in raw mode so binary data is transmitted
//! without modification:
//!
//! - **No input processing**: IGNBRK, BRKINT, PARMRK, ISTRIP, … cleared
//! - **No output processing**: OPOST cleared (no CR/LF translation)
//! - **8-bit characters**: CS8, no parity
//! - **No echo, non-canonical**: ECHO, ECHONL, ICANON cleared
//!
//! A binding this backend creates is released (`rfcomm release N`) when the
//! channel closes. Bindings that already existed are left alone.
//!
//! ## Chunked Writes
//!
//! Each chunk handed to the channel is split into `bluetooth_chunk_size`
//! pieces with `bluetooth_chunk_delay_ms` between them so the printer's
//! buffer keeps up.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Backend, Link, TransportChannel};
use crate::device::{BleIdentity, DeviceIdentity, DeviceRecord, TransportKind, is_valid_mac};
use crate::error::PrinterError;
use crate::printer::PrinterSettings;

/// Serial Port Profile service class
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// RFCOMM channel used when SDP gives no answer
const FALLBACK_RFCOMM_CHANNEL: u8 = 1;

/// Time for a fresh binding's device node to appear
const BIND_SETTLE: Duration = Duration::from_millis(500);

/// Open RFCOMM TTY
#[derive(Debug)]
pub struct BluetoothChannel {
    path: String,
    file: Option<tokio::fs::File>,
    chunk_size: usize,
    chunk_delay: Duration,
    /// `/dev/rfcommN` index bound by this channel's open
    bound: Option<u8>,
}

#[async_trait]
impl TransportChannel for BluetoothChannel {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), PrinterError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| PrinterError::IoFailure(format!("{} is closed", self.path)))?;

        if chunk.len() <= self.chunk_size {
            file.write_all(chunk).await?;
            return Ok(());
        }
        for piece in chunk.chunks(self.chunk_size) {
            file.write_all(piece).await?;
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), PrinterError> {
        if let Some(file) = &mut self.file {
            file.flush().await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush().await;
            debug!(path = %self.path, "rfcomm closed");
        }
        if let Some(index) = self.bound.take() {
            match run("rfcomm", &["release", &index.to_string()]).await {
                Ok(_) => debug!(index, "rfcomm binding released"),
                Err(e) => warn!("rfcomm release {} failed: {}", index, e),
            }
        }
    }
}

/// Bluetooth backend driven by the BlueZ tools
#[derive(Debug, Clone)]
pub struct BluetoothBackend {
    chunk_size: usize,
    chunk_delay: Duration,
    device_index: u8,
}

impl BluetoothBackend {
    pub fn new(settings: &PrinterSettings) -> Self {
        Self {
            chunk_size: settings.bluetooth_chunk_size.max(1),
            chunk_delay: settings.bluetooth_chunk_delay(),
            device_index: settings.rfcomm_device_index,
        }
    }

    async fn paired(&self) -> Result<Vec<DeviceRecord>, PrinterError> {
        match run("bluetoothctl", &["devices", "Paired"]).await {
            Ok(out) => Ok(parse_device_list(&out)),
            Err(e) => {
                // Older BlueZ only knows `paired-devices`.
                debug!("devices Paired failed, trying paired-devices: {}", e);
                let out = run("bluetoothctl", &["paired-devices"]).await.map_err(|e| {
                    PrinterError::AdapterNotReady(format!("Failed to list paired devices: {}", e))
                })?;
                Ok(parse_device_list(&out))
            }
        }
    }
}

#[async_trait]
impl Backend for BluetoothBackend {
    type Identity = BleIdentity;
    type Channel = BluetoothChannel;

    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    async fn init(&self) -> Result<(), PrinterError> {
        let out = run("bluetoothctl", &["show"]).await.map_err(|e| {
            PrinterError::AdapterNotReady(format!("Failed to run bluetoothctl: {}", e))
        })?;
        if is_powered(&out) {
            Ok(())
        } else {
            Err(PrinterError::AdapterNotReady(
                "Bluetooth adapter missing or powered off".to_string(),
            ))
        }
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, PrinterError> {
        self.paired().await
    }

    async fn open(
        &self,
        identity: &BleIdentity,
    ) -> Result<(DeviceRecord, Link<BluetoothChannel>), PrinterError> {
        if !is_valid_mac(identity.mac()) {
            return Err(PrinterError::InvalidArgument(format!(
                "'{}' is not a Bluetooth MAC address",
                identity.mac()
            )));
        }
        let wanted = DeviceIdentity::from(identity.clone());
        let record = self
            .paired()
            .await?
            .into_iter()
            .find(|d| d.identity == wanted)
            .ok_or_else(|| PrinterError::DeviceNotFound(format!("{} is not paired", identity.mac())))?;

        let (path, bound) = match find_rfcomm_for_mac(identity.mac()).await {
            Some(path) => {
                debug!(%path, "reusing rfcomm binding");
                (path, None)
            }
            None => {
                let channel = spp_channel(identity.mac()).await;
                let path = setup_rfcomm(identity.mac(), self.device_index, channel).await?;
                (path, Some(self.device_index))
            }
        };

        let file = match open_raw(&path).await {
            Ok(file) => file,
            Err(e) => {
                if let Some(index) = bound {
                    let _ = run("rfcomm", &["release", &index.to_string()]).await;
                }
                return Err(PrinterError::ConnectionFailed(format!(
                    "Failed to open {}: {}",
                    path, e
                )));
            }
        };
        info!(mac = %identity.mac(), %path, "rfcomm open");

        Ok((
            record,
            Link::Open(BluetoothChannel {
                path,
                file: Some(file),
                chunk_size: self.chunk_size,
                chunk_delay: self.chunk_delay,
                bound,
            }),
        ))
    }
}

async fn run(program: &str, args: &[&str]) -> io::Result<String> {
    let output = Command::new(program).args(args).output().await?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "{} {} exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Open a TTY for writing and switch it to raw mode.
async fn open_raw(path: &str) -> io::Result<tokio::fs::File> {
    let path = path.to_string();
    let file = tokio::task::spawn_blocking(move || {
        let file = OpenOptions::new().write(true).open(&path)?;
        configure_tty_raw(&file)?;
        Ok::<_, io::Error>(file)
    })
    .await
    .map_err(io::Error::other)??;
    Ok(tokio::fs::File::from_std(file))
}

/// `bluetoothctl show` reports a usable controller.
fn is_powered(show: &str) -> bool {
    show.lines().any(|line| line.trim() == "Powered: yes")
}

/// Parse `Device XX:XX:XX:XX:XX:XX Name` lines.
fn parse_device_list(output: &str) -> Vec<DeviceRecord> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (mac, name) = rest.split_once(' ').unwrap_or((rest, ""));
            if !is_valid_mac(mac) {
                return None;
            }
            let name = if name.trim().is_empty() { mac } else { name.trim() };
            Some(DeviceRecord::new(name, BleIdentity::new(mac)))
        })
        .collect()
}

/// Extract `Channel: N` from `sdptool search` output.
fn parse_sdp_channel(output: &str) -> Option<u8> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Channel:")
            .and_then(|n| n.trim().parse().ok())
    })
}

/// Find the `/dev/rfcommN` entry bound to `mac` in `/proc/net/rfcomm` or
/// `rfcomm -a` output (`rfcomm0: XX:XX:XX:XX:XX:XX channel N ...`).
fn parse_rfcomm_binding(listing: &str, mac: &str) -> Option<String> {
    let mac_upper = mac.to_uppercase();
    listing
        .lines()
        .filter(|line| line.to_uppercase().contains(&mac_upper))
        .find_map(|line| line.split(':').next())
        .map(|dev| format!("/dev/{}", dev.trim()))
}

/// Look up the SPP channel over SDP, falling back to channel 1.
async fn spp_channel(mac: &str) -> u8 {
    let short = format!("0x{:04X}", (SPP_UUID.as_u128() >> 96) as u16);
    match run("sdptool", &["search", "--bdaddr", mac, &short]).await {
        Ok(out) => parse_sdp_channel(&out).unwrap_or(FALLBACK_RFCOMM_CHANNEL),
        Err(e) => {
            debug!("sdptool unavailable, assuming channel {}: {}", FALLBACK_RFCOMM_CHANNEL, e);
            FALLBACK_RFCOMM_CHANNEL
        }
    }
}

/// Find an existing RFCOMM device bound to the given MAC address.
///
/// Checks `/proc/net/rfcomm` and falls back to `rfcomm -a`.
async fn find_rfcomm_for_mac(mac: &str) -> Option<String> {
    if let Ok(contents) = tokio::fs::read_to_string("/proc/net/rfcomm").await
        && let Some(path) = parse_rfcomm_binding(&contents, mac)
        && Path::new(&path).exists()
    {
        return Some(path);
    }
    let listing = run("rfcomm", &["-a"]).await.ok()?;
    parse_rfcomm_binding(&listing, mac).filter(|path| Path::new(path).exists())
}

/// Bind `/dev/rfcomm{index}` to `mac` on `channel`.
///
/// **Requires root privileges** for `rfcomm bind`.
async fn setup_rfcomm(mac: &str, index: u8, channel: u8) -> Result<String, PrinterError> {
    let mac_upper = mac.to_uppercase();
    let device_path = format!("/dev/rfcomm{}", index);

    // May fail if already connected; the bind below is what matters.
    match run("bluetoothctl", &["connect", &mac_upper]).await {
        Ok(out) if out.contains("Connection successful") => info!(mac = %mac_upper, "connected"),
        Ok(out) => debug!("bluetoothctl returned: {}", out.trim()),
        Err(e) => warn!("bluetoothctl connect failed: {}", e),
    }
    tokio::time::sleep(BIND_SETTLE).await;

    info!(mac = %mac_upper, channel, "binding {}", device_path);
    run(
        "rfcomm",
        &["bind", &index.to_string(), &mac_upper, &channel.to_string()],
    )
    .await
    .map_err(|e| PrinterError::ConnectionFailed(format!("rfcomm bind failed: {}", e)))?;

    tokio::time::sleep(BIND_SETTLE).await;
    if !Path::new(&device_path).exists() {
        return Err(PrinterError::ConnectionFailed(format!(
            "Device {} was not created",
            device_path
        )));
    }
    Ok(device_path)
}

/// Configure a TTY for raw binary I/O.
///
/// IXON/IXOFF/IXANY must be cleared: 0x11 and 0x13 appear in raster data.
#[cfg(unix)]
fn configure_tty_raw(file: &std::fs::File) -> io::Result<()> {
    use std::mem::MaybeUninit;
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let mut termios = MaybeUninit::uninit();
    // SAFETY: fd is open for the lifetime of `file`; tcgetattr fills termios on success.
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;

    // SAFETY: termios was initialized by tcgetattr above.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn configure_tty_raw(_file: &std::fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spp_uuid() {
        assert_eq!(SPP_UUID.to_string(), "00001101-0000-1000-8000-00805f9b34fb");
        assert_eq!((SPP_UUID.as_u128() >> 96) as u16, 0x1101);
    }

    #[test]
    fn test_is_powered() {
        let show = "Controller 00:1A:7D:DA:71:13 (public)\n\tName: host\n\tPowered: yes\n";
        assert!(is_powered(show));
        assert!(!is_powered("Controller 00:1A:7D:DA:71:13\n\tPowered: no\n"));
        assert!(!is_powered("No default controller available\n"));
    }

    #[test]
    fn test_parse_device_list() {
        let out = "Device 00:11:62:AA:BB:CC Star TSP100\nDevice 66:22:e0:01:02:03 MTP-II\ngarbage\nDevice nope Thing\n";
        let devices = parse_device_list(out);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Star TSP100");
        assert_eq!(
            devices[1].identity,
            DeviceIdentity::Ble(BleIdentity::new("66:22:E0:01:02:03"))
        );
    }

    #[test]
    fn test_unnamed_device_uses_mac() {
        let devices = parse_device_list("Device 00:11:62:AA:BB:CC\n");
        assert_eq!(devices[0].name, "00:11:62:AA:BB:CC");
    }

    #[test]
    fn test_parse_sdp_channel() {
        let out = "Searching for 0x1101 on 00:11:62:AA:BB:CC ...\nService Name: Serial Port\n  Protocol Descriptor List:\n    \"RFCOMM\" (0x0003)\n      Channel: 3\n";
        assert_eq!(parse_sdp_channel(out), Some(3));
        assert_eq!(parse_sdp_channel("Failed to connect to SDP server"), None);
    }

    #[test]
    fn test_parse_rfcomm_binding() {
        let listing = "rfcomm0: 00:11:62:AA:BB:CC channel 1 clean\nrfcomm1: 11:22:33:44:55:66 channel 1 connected\n";
        assert_eq!(
            parse_rfcomm_binding(listing, "11:22:33:44:55:66"),
            Some("/dev/rfcomm1".to_string())
        );
        assert_eq!(
            parse_rfcomm_binding(listing, "00:11:62:aa:bb:cc"),
            Some("/dev/rfcomm0".to_string())
        );
        assert_eq!(parse_rfcomm_binding(listing, "AA:AA:AA:AA:AA:AA"), None);
    }

    #[tokio::test]
    async fn test_chunked_writes_reach_file() {
        let path = std::env::temp_dir().join(format!("rollo-rfcomm-{}", std::process::id()));
        let file = tokio::fs::File::create(&path).await.unwrap();
        let mut channel = BluetoothChannel {
            path: path.display().to_string(),
            file: Some(file),
            chunk_size: 4,
            chunk_delay: Duration::ZERO,
            bound: None,
        };
        channel.write_chunk(b"0123456789").await.unwrap();
        channel.flush().await.unwrap();
        channel.close().await;
        assert!(channel.write_chunk(b"x").await.is_err());

        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_close_releases_own_binding_once() {
        let path = std::env::temp_dir().join(format!("rollo-rfcomm-bound-{}", std::process::id()));
        let file = tokio::fs::File::create(&path).await.unwrap();
        let mut channel = BluetoothChannel {
            path: path.display().to_string(),
            file: Some(file),
            chunk_size: 4,
            chunk_delay: Duration::ZERO,
            bound: Some(250),
        };
        // Release failures (no rfcomm tool, no binding) are logged, not raised.
        channel.close().await;
        assert!(channel.bound.is_none());
        assert!(channel.file.is_none());
        channel.close().await;

        std::fs::remove_file(&path).unwrap();
    }
}
