//! # Printer Module
//!
//! Settings shared by all transports.
//!
//! ## Modules
//!
//! - [`config`]: Defaults and JSON loading

pub mod config;

pub use config::PrinterSettings;
