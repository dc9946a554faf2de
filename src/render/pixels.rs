//! # Pixel Matrix
//!
//! Row-major ARGB32 pixel buffer, origin top-left. This is the common input
//! of the raster encoder, produced either from a decoded image or from the
//! QR encoder.
//!
//! ## Pixel Layout
//!
//! ```text
//! bits 31..24  alpha   (0xFF = fully opaque)
//! bits 23..16  red
//! bits 15..8   green
//! bits 7..0    blue
//! ```

use image::{DynamicImage, RgbaImage, imageops::FilterType};

use crate::error::PrinterError;

/// Opaque black
pub const BLACK: u32 = 0xFF00_0000;

/// Opaque white
pub const WHITE: u32 = 0xFFFF_FFFF;

/// Luminance values strictly below this print as black.
pub const LUMINANCE_THRESHOLD: i32 = 127;

/// Immutable ARGB32 bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMatrix {
    width: usize,
    height: usize,
    pixels: Vec<u32>,
}

impl PixelMatrix {
    /// Build a matrix from raw row-major ARGB values.
    ///
    /// Fails if `pixels.len() != width * height`.
    pub fn from_argb(width: usize, height: usize, pixels: Vec<u32>) -> Result<Self, PrinterError> {
        if pixels.len() != width * height {
            return Err(PrinterError::InvalidArgument(format!(
                "pixel buffer holds {} values, expected {}x{} = {}",
                pixels.len(),
                width,
                height,
                width * height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Build a matrix by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> u32) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Convert a decoded image, keeping its alpha channel.
    pub fn from_image(image: &DynamicImage) -> Self {
        Self::from_rgba(&image.to_rgba8())
    }

    fn from_rgba(rgba: &RgbaImage) -> Self {
        let pixels = rgba
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                u32::from_be_bytes([a, r, g, b])
            })
            .collect();
        Self {
            width: rgba.width() as usize,
            height: rgba.height() as usize,
            pixels,
        }
    }

    fn to_rgba(&self) -> RgbaImage {
        let mut buf = Vec::with_capacity(self.pixels.len() * 4);
        for &argb in &self.pixels {
            let [a, r, g, b] = argb.to_be_bytes();
            buf.extend_from_slice(&[r, g, b, a]);
        }
        // Dimensions and buffer length agree by construction.
        RgbaImage::from_raw(self.width as u32, self.height as u32, buf)
            .unwrap_or_else(|| RgbaImage::new(self.width as u32, self.height as u32))
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// ARGB value at `(x, y)`. Panics when out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u32 {
        self.pixels[y * self.width + x]
    }

    /// Scale down so the larger side equals `max_dimension`.
    ///
    /// Images that already fit are returned unchanged. The smaller side is
    /// truncated and never drops below one pixel.
    ///
    /// ```
    /// use rollo::render::pixels::{PixelMatrix, WHITE};
    ///
    /// let wide = PixelMatrix::from_fn(400, 200, |_, _| WHITE);
    /// let fitted = wide.resize_to_fit(200).unwrap();
    /// assert_eq!((fitted.width(), fitted.height()), (200, 100));
    /// ```
    pub fn resize_to_fit(&self, max_dimension: i64) -> Result<PixelMatrix, PrinterError> {
        if max_dimension <= 0 {
            return Err(PrinterError::InvalidArgument(format!(
                "max dimension must be positive, got {}",
                max_dimension
            )));
        }
        let max = max_dimension as usize;
        let larger = self.width.max(self.height);
        if larger <= max {
            return Ok(self.clone());
        }

        let scale = max as f64 / larger as f64;
        let scaled = |side: usize| -> usize {
            if side == larger {
                max
            } else {
                ((side as f64 * scale) as usize).max(1)
            }
        };
        let (new_width, new_height) = (scaled(self.width), scaled(self.height));

        let resized = image::imageops::resize(
            &self.to_rgba(),
            new_width as u32,
            new_height as u32,
            FilterType::Triangle,
        );
        Ok(Self::from_rgba(&resized))
    }
}

/// Integer luminance of an ARGB pixel.
///
/// Evaluated in `f64` with the standard weights and truncated toward zero.
#[inline]
pub fn luminance(argb: u32) -> i32 {
    let [_, r, g, b] = argb.to_be_bytes();
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64) as i32
}

/// Whether a pixel prints as a black dot.
///
/// Only fully opaque pixels darker than the threshold print.
#[inline]
pub fn should_print(argb: u32) -> bool {
    if argb >> 24 != 0xFF {
        return false;
    }
    luminance(argb) < LUMINANCE_THRESHOLD
}

/// Opaque gray pixel with all three channels set to `v`.
#[inline]
pub fn gray(v: u8) -> u32 {
    u32::from_be_bytes([0xFF, v, v, v])
}
