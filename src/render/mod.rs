//! # Rendering Module
//!
//! Everything that produces a [`PixelMatrix`] for the raster encoder.
//!
//! ## Modules
//!
//! - [`pixels`]: ARGB matrix, image conversion, resize, binarization
//! - [`qr`]: QR code rendering

pub mod pixels;
pub mod qr;

pub use pixels::PixelMatrix;
