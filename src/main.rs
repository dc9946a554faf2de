//! # Rollo CLI
//!
//! Command-line interface for ESC/POS receipt printers.
//!
//! ## Usage
//!
//! ```bash
//! # Paired Bluetooth printers / attached USB printers
//! rollo list ble
//! rollo list usb
//!
//! # Sweep the local /24 for network printers
//! rollo scan
//!
//! # Print markup on a network printer, then cut
//! rollo print-text --host 192.168.1.20 --bill "<CB>TOTAL</CB>\n12.50"
//!
//! # Print an image on a USB printer
//! rollo print-image --usb 0416:5011 --max-dimension 384 logo.png
//!
//! # Print a QR code over Bluetooth
//! rollo print-qr --mac 00:11:62:AA:BB:CC --size 300 https://example.com
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info,rollo=debug`).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use rollo::{
    BleIdentity, DeviceIdentity, DeviceRecord, NetIdentity, PrinterError, PrinterEvent,
    PrinterRegistry, PrinterSettings, TransportKind, UsbIdentity, device::DEFAULT_NET_PORT,
    protocol::markup::PrintOptions,
};

/// Rollo - ESC/POS receipt printer utility
#[derive(Parser, Debug)]
#[command(name = "rollo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Which printer to talk to. Exactly one of --mac, --usb, --host.
#[derive(Args, Debug)]
struct Target {
    /// Bluetooth MAC address
    #[arg(long, conflicts_with_all = ["usb", "host"])]
    mac: Option<String>,

    /// USB vendor and product id in hex, e.g. 0416:5011
    #[arg(long, value_name = "VID:PID", conflicts_with = "host")]
    usb: Option<String>,

    /// Network printer host
    #[arg(long)]
    host: Option<String>,

    /// Network printer port
    #[arg(long, default_value_t = DEFAULT_NET_PORT, requires = "host")]
    port: u16,
}

impl Target {
    fn identity(&self) -> Result<DeviceIdentity, PrinterError> {
        match (&self.mac, &self.usb, &self.host) {
            (Some(mac), None, None) => Ok(BleIdentity::parse(mac)?.into()),
            (None, Some(usb), None) => Ok(usb.parse::<UsbIdentity>()?.into()),
            (None, None, Some(host)) => Ok(NetIdentity::new(host.clone(), self.port).into()),
            _ => Err(PrinterError::InvalidArgument(
                "choose a printer with exactly one of --mac, --usb or --host".to_string(),
            )),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List devices on a transport (ble, usb or net)
    List {
        transport: TransportKind,

        /// How long to wait for a network scan, in seconds
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },

    /// Sweep the local network for printers
    Scan,

    /// Send raw bytes, given as base64 or read from a file
    PrintRaw {
        #[command(flatten)]
        target: Target,

        /// Base64 payload
        #[arg(required_unless_present = "file")]
        base64: Option<String>,

        /// Send this file's bytes verbatim
        #[arg(long, conflicts_with = "base64")]
        file: Option<PathBuf>,
    },

    /// Print tagged text (<C>, <B>, <CB>, ...)
    PrintText {
        #[command(flatten)]
        target: Target,

        text: String,

        /// Feed, cut and beep afterwards
        #[arg(long)]
        bill: bool,
    },

    /// Print an image from a URL or file
    PrintImage {
        #[command(flatten)]
        target: Target,

        locator: String,

        /// Largest side in dots
        #[arg(long)]
        max_dimension: Option<i64>,
    },

    /// Print a QR code
    PrintQr {
        #[command(flatten)]
        target: Target,

        text: String,

        /// Side length in dots
        #[arg(long)]
        size: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rollo=debug")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), PrinterError> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => PrinterSettings::load(path)?,
        None => PrinterSettings::default(),
    };
    let registry = PrinterRegistry::new(settings)?;

    match cli.command {
        Commands::List { transport, wait } => match transport {
            TransportKind::Net => {
                let found = scan_via_events(&registry, Duration::from_secs(wait)).await?;
                print_records(found.into_iter().map(|id| DeviceRecord::new(id.address(), id)));
            }
            kind => {
                let devices = registry.printer(kind).list_devices().await?;
                print_records(devices);
            }
        },

        Commands::Scan => {
            let scanner = registry.net().backend().scanner().clone();
            match scanner.run().await {
                Some(found) => {
                    print_records(found.into_iter().map(|id| DeviceRecord::new(id.address(), id)))
                }
                None => {
                    return Err(PrinterError::AdapterNotReady(
                        "no local network address".to_string(),
                    ));
                }
            }
        }

        Commands::PrintRaw {
            target,
            base64,
            file,
        } => {
            let printer = connect(&registry, &target).await?;
            let job = match (base64, file) {
                (_, Some(path)) => printer.print_bytes(std::fs::read(&path)?),
                (Some(payload), None) => printer.print_raw_data(&payload),
                (None, None) => {
                    return Err(PrinterError::InvalidArgument("nothing to print".to_string()));
                }
            };
            finish(printer, job.await).await?;
        }

        Commands::PrintText { target, text, bill } => {
            let printer = connect(&registry, &target).await?;
            let options = if bill {
                PrintOptions::bill()
            } else {
                PrintOptions::text()
            };
            // Shells pass "\n" literally.
            let text = text.replace("\\n", "\n");
            let result = printer.print_markup(&text, options).await;
            finish(printer, result).await?;
        }

        Commands::PrintImage {
            target,
            locator,
            max_dimension,
        } => {
            let printer = connect(&registry, &target).await?;
            let result = printer.print_image_data(&locator, max_dimension).await;
            finish(printer, result).await?;
        }

        Commands::PrintQr { target, text, size } => {
            let printer = connect(&registry, &target).await?;
            let result = printer.print_qr_code(&text, size).await;
            finish(printer, result).await?;
        }
    }

    Ok(())
}

async fn connect(
    registry: &PrinterRegistry,
    target: &Target,
) -> Result<std::sync::Arc<dyn rollo::Printer>, PrinterError> {
    let identity = target.identity()?;
    let printer = registry.printer(identity.transport());
    let record = printer.select_device(identity).await?;
    info!("Using {} ({})", record.name, record.identity);
    Ok(printer)
}

/// Close the connection and report the print result.
async fn finish(
    printer: std::sync::Arc<dyn rollo::Printer>,
    result: Result<(), PrinterError>,
) -> Result<(), PrinterError> {
    printer.close_connection_if_exists().await?;
    result?;
    println!("Printed successfully!");
    Ok(())
}

/// Trigger a scan through `list_devices` and wait for its result event.
async fn scan_via_events(
    registry: &PrinterRegistry,
    wait: Duration,
) -> Result<Vec<NetIdentity>, PrinterError> {
    let mut events = registry.net_events();
    registry.net().list_devices().await?;

    let outcome = tokio::time::timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(PrinterEvent::ScannerResolved(found)) => return Ok(found),
                Ok(PrinterEvent::RegisterError(message)) => {
                    return Err(PrinterError::AdapterNotReady(message));
                }
                Ok(_) => {}
                Err(e) => return Err(PrinterError::IoFailure(e.to_string())),
            }
        }
    })
    .await;
    outcome.map_err(|_| PrinterError::IoFailure("scan timed out".to_string()))?
}

fn print_records(records: impl IntoIterator<Item = DeviceRecord>) {
    let mut count = 0;
    for record in records {
        println!("{:<28} {}", record.name, record.identity);
        count += 1;
    }
    if count == 0 {
        println!("No devices found.");
    }
}
