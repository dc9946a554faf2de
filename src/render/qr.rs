//! # QR Code Rendering
//!
//! Renders text as a square black/white [`PixelMatrix`] so QR codes go
//! through the same raster path as images.
//!
//! ## Geometry
//!
//! ```text
//! ├ pad ┼ margin ┼──── modules × scale ────┼ margin ┼ pad ┤
//!         1 module                           1 module
//! ```
//!
//! The symbol plus a one-module quiet zone is scaled by the largest integer
//! factor that fits in `size`; leftover pixels are split evenly with the
//! extra pixel going right/bottom.

use qrcode::{Color, EcLevel, QrCode};

use super::pixels::{BLACK, PixelMatrix, WHITE};
use crate::error::PrinterError;

/// Quiet zone in modules around the symbol
pub const MARGIN_MODULES: usize = 1;

/// Largest accepted side in dots, well past any print head width
pub const MAX_SIZE: i64 = 4096;

/// Render `text` as a `size × size` QR code.
///
/// Fails with [`PrinterError::EncodingFailed`] when `size` is not in
/// `1..=MAX_SIZE`, the text exceeds QR capacity, or the symbol does not fit
/// in `size` pixels.
///
/// ```
/// use rollo::render::qr;
///
/// let matrix = qr::encode("https://example.com", 250).unwrap();
/// assert_eq!((matrix.width(), matrix.height()), (250, 250));
/// ```
pub fn encode(text: &str, size: i64) -> Result<PixelMatrix, PrinterError> {
    if size <= 0 {
        return Err(PrinterError::EncodingFailed(format!(
            "QR size must be positive, got {}",
            size
        )));
    }
    if size > MAX_SIZE {
        return Err(PrinterError::EncodingFailed(format!(
            "QR size {} exceeds the {} dot limit",
            size, MAX_SIZE
        )));
    }
    let size = size as usize;

    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::L)
        .map_err(|e| PrinterError::EncodingFailed(format!("QR code generation failed: {}", e)))?;

    let modules = code.width();
    let total = modules + 2 * MARGIN_MODULES;
    if total > size {
        return Err(PrinterError::EncodingFailed(format!(
            "QR symbol needs {} modules, does not fit in {} pixels",
            total, size
        )));
    }

    let scale = size / total;
    let pad = (size - total * scale) / 2;
    let origin = pad + MARGIN_MODULES * scale;
    let extent = modules * scale;

    Ok(PixelMatrix::from_fn(size, size, |x, y| {
        if x < origin || y < origin || x >= origin + extent || y >= origin + extent {
            return WHITE;
        }
        let (qx, qy) = ((x - origin) / scale, (y - origin) / scale);
        if code[(qx, qy)] == Color::Dark {
            BLACK
        } else {
            WHITE
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_and_two_color() {
        let m = encode("hello", 120).unwrap();
        assert_eq!((m.width(), m.height()), (120, 120));
        for y in 0..m.height() {
            for x in 0..m.width() {
                let p = m.get(x, y);
                assert!(p == BLACK || p == WHITE);
            }
        }
    }

    #[test]
    fn test_margin_is_white() {
        // "hello" fits version 1 (21 modules) → 23 with margin, scale 5 at 115
        let m = encode("hello", 115).unwrap();
        for i in 0..115 {
            for edge in 0..5 {
                assert_eq!(m.get(i, edge), WHITE);
                assert_eq!(m.get(edge, i), WHITE);
                assert_eq!(m.get(i, 114 - edge), WHITE);
                assert_eq!(m.get(114 - edge, i), WHITE);
            }
        }
        // finder pattern corner sits right inside the quiet zone
        assert_eq!(m.get(5, 5), BLACK);
    }

    #[test]
    fn test_rejects_non_positive_size() {
        assert!(matches!(encode("x", 0), Err(PrinterError::EncodingFailed(_))));
        assert!(matches!(encode("x", -1), Err(PrinterError::EncodingFailed(_))));
    }

    #[test]
    fn test_rejects_oversized_before_rendering() {
        assert!(matches!(encode("x", 60_000), Err(PrinterError::EncodingFailed(_))));
        assert!(matches!(encode("x", i64::MAX), Err(PrinterError::EncodingFailed(_))));
    }

    #[test]
    fn test_too_small_for_symbol() {
        assert!(matches!(encode("hello", 10), Err(PrinterError::EncodingFailed(_))));
    }

    #[test]
    fn test_capacity_exceeded() {
        let text = "A".repeat(8000);
        assert!(matches!(encode(&text, 2000), Err(PrinterError::EncodingFailed(_))));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(encode("same", 200).unwrap(), encode("same", 200).unwrap());
    }
}
