//! # ESC/POS Protocol Implementation
//!
//! Byte-level builders for the ESC/POS command set used by generic thermal
//! receipt printers.
//!
//! ## Module Structure
//!
//! - [`commands`]: Escape constants and fixed commands (init, cut, beep, feed)
//! - [`raster`]: Bit-image encoder turning a [`PixelMatrix`](crate::render::PixelMatrix) into bands
//! - [`markup`]: Tagged text for receipts and bills
//!
//! ## Usage Example
//!
//! ```
//! use rollo::protocol::{markup, raster};
//! use rollo::render::qr;
//!
//! let receipt = markup::convert("<CB>THANKS</CB>\n", markup::PrintOptions::bill());
//! assert_eq!(&receipt[..2], &[0x1B, 0x40]);
//!
//! let code = qr::encode("order-42", 120).unwrap();
//! let stream = raster::encode(&code, 200).unwrap();
//! assert_eq!(&stream.to_bytes()[..3], &[0x1B, 0x33, 24]);
//! ```

pub mod commands;
pub mod markup;
pub mod raster;
