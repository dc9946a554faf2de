//! # ESC/POS Raster Encoder
//!
//! Converts a [`PixelMatrix`] into a bit-image command stream.
//!
//! ## Stream Layout
//!
//! ```text
//! ESC 3 24          line spacing = one band
//! ESC a '1'         center
//! ┌ per band of 24 rows ──────────────────────────────┐
//! │ ESC * 33 nL nH  bit-image mode, column count (LE) │
//! │ c0b0 c0b1 c0b2  c1b0 c1b1 c1b2 ...  3 bytes/column│
//! │ LF                                                │
//! └───────────────────────────────────────────────────┘
//! ESC 3 32          restore spacing
//! LF
//! ```
//!
//! ## Column Slice
//!
//! Each column of a band is three bytes stacked vertically. Within a byte,
//! bit 7 is the topmost row of its 8-row segment:
//!
//! ```text
//! byte 0: rows  0..8    bit7=row 0  ... bit0=row 7
//! byte 1: rows  8..16
//! byte 2: rows 16..24
//! ```
//!
//! Rows past the image height contribute zero bits.

use super::commands::{
    CENTER_ALIGN, LINE_FEED, SELECT_BIT_IMAGE_MODE, SET_LINE_SPACE_24, SET_LINE_SPACE_32, u16_le,
};
use crate::error::PrinterError;
use crate::render::pixels::{PixelMatrix, should_print};

/// Rows per bit-image band
pub const BAND_HEIGHT: usize = 24;

/// Ordered byte chunks written verbatim to a channel.
///
/// Chunk boundaries are preserved so transports that map one chunk to one
/// transfer (USB bulk) send exactly what the encoder produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscPosStream {
    chunks: Vec<Vec<u8>>,
}

impl EscPosStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: impl Into<Vec<u8>>) {
        self.chunks.push(chunk.into());
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    /// Total byte count across all chunks.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate every chunk in order.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// Encode `pixels` as an ESC/POS bit-image stream.
///
/// The image is first scaled down so its larger side is at most
/// `max_dimension`. Output is byte-identical for identical inputs.
///
/// ```
/// use rollo::protocol::raster;
/// use rollo::render::pixels::{PixelMatrix, BLACK};
///
/// let pixels = PixelMatrix::from_fn(2, 24, |_, _| BLACK);
/// let bytes = raster::encode(&pixels, 200).unwrap().to_bytes();
///
/// // line spacing + center, then band header with 2 columns
/// assert_eq!(&bytes[..11], &[0x1B, 0x33, 24, 0x1B, 0x61, 0x31, 0x1B, 0x2A, 33, 2, 0]);
/// // two fully black columns
/// assert_eq!(&bytes[11..17], &[0xFF; 6]);
/// ```
pub fn encode(pixels: &PixelMatrix, max_dimension: i64) -> Result<EscPosStream, PrinterError> {
    let image = pixels.resize_to_fit(max_dimension)?;
    let width = image.width();
    let width_le = u16_le(u16::try_from(width).map_err(|_| {
        PrinterError::EncodingFailed(format!("image width {} exceeds column limit", width))
    })?);

    let mut stream = EscPosStream::new();
    stream.push(SET_LINE_SPACE_24);
    stream.push(CENTER_ALIGN);

    for band_top in (0..image.height()).step_by(BAND_HEIGHT) {
        let mut header = Vec::with_capacity(5);
        header.extend_from_slice(&SELECT_BIT_IMAGE_MODE);
        header.extend_from_slice(&width_le);
        stream.push(header);

        let mut columns = Vec::with_capacity(width * 3);
        for x in 0..width {
            columns.extend_from_slice(&column_slice(&image, band_top, x));
        }
        stream.push(columns);
        stream.push(LINE_FEED);
    }

    stream.push(SET_LINE_SPACE_32);
    stream.push(LINE_FEED);
    Ok(stream)
}

/// Pack the 24 rows of column `x` starting at `band_top` into three bytes.
fn column_slice(image: &PixelMatrix, band_top: usize, x: usize) -> [u8; 3] {
    let mut slice = [0u8; 3];
    for (segment, byte) in slice.iter_mut().enumerate() {
        for bit in 0..8 {
            let y = band_top + segment * 8 + bit;
            if y >= image.height() {
                break;
            }
            if should_print(image.get(x, y)) {
                *byte |= 1 << (7 - bit);
            }
        }
    }
    slice
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pixels::{BLACK, WHITE, gray};
    use pretty_assertions::assert_eq;

    const PREFIX: [u8; 6] = [0x1B, 0x33, 24, 0x1B, 0x61, 0x31];
    const SUFFIX: [u8; 4] = [0x1B, 0x33, 32, 0x0A];

    #[test]
    fn test_single_black_pixel() {
        let pixels = PixelMatrix::from_fn(1, 1, |_, _| BLACK);
        let bytes = encode(&pixels, 200).unwrap().to_bytes();

        let mut expected = PREFIX.to_vec();
        expected.extend([0x1B, 0x2A, 33, 1, 0]);
        expected.extend([0x80, 0x00, 0x00]);
        expected.push(0x0A);
        expected.extend(SUFFIX);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_bit_order_within_segments() {
        // rows 0, 7, 8 and 23 black in a single column
        let pixels =
            PixelMatrix::from_fn(1, 24, |_, y| if [0, 7, 8, 23].contains(&y) { BLACK } else { WHITE });
        let stream = encode(&pixels, 200).unwrap();
        let band = &stream.chunks()[3];
        assert_eq!(band, &vec![0b1000_0001, 0b1000_0000, 0b0000_0001]);
    }

    #[test]
    fn test_partial_last_band() {
        let pixels = PixelMatrix::from_fn(3, 30, |_, _| BLACK);
        let stream = encode(&pixels, 200).unwrap();

        // prefix(2) + 2 bands × 3 chunks + suffix(2)
        assert_eq!(stream.chunks().len(), 2 + 6 + 2);

        let second_band = &stream.chunks()[6];
        // 6 remaining rows: top 6 bits of byte 0, nothing else
        assert_eq!(second_band, &[0xFCu8, 0x00, 0x00].repeat(3));
    }

    #[test]
    fn test_column_count_little_endian() {
        let pixels = PixelMatrix::from_fn(300, 1, |_, _| WHITE);
        let stream = encode(&pixels, 400).unwrap();
        assert_eq!(stream.chunks()[2], vec![0x1B, 0x2A, 33, 0x2C, 0x01]);
    }

    #[test]
    fn test_transparent_never_prints() {
        let pixels = PixelMatrix::from_fn(4, 8, |_, _| 0x7F00_0000);
        let stream = encode(&pixels, 200).unwrap();
        assert!(stream.chunks()[3].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_threshold_in_stream() {
        let pixels = PixelMatrix::from_fn(2, 1, |x, _| if x == 0 { gray(127) } else { gray(128) });
        let stream = encode(&pixels, 200).unwrap();
        assert_eq!(stream.chunks()[3], vec![0x80, 0, 0, 0x00, 0, 0]);
    }

    #[test]
    fn test_deterministic() {
        let pixels = PixelMatrix::from_fn(97, 61, |x, y| gray(((x * 7 + y * 13) % 256) as u8));
        let a = encode(&pixels, 50).unwrap();
        let b = encode(&pixels, 50).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_resize_applies_before_banding() {
        let pixels = PixelMatrix::from_fn(400, 200, |_, _| BLACK);
        let stream = encode(&pixels, 200).unwrap();
        // 200 columns, 100 rows → 5 bands
        assert_eq!(stream.chunks()[2], vec![0x1B, 0x2A, 33, 200, 0]);
        assert_eq!(stream.chunks().len(), 2 + 5 * 3 + 2);
    }

    #[test]
    fn test_empty_image_has_only_framing() {
        let pixels = PixelMatrix::from_fn(0, 0, |_, _| WHITE);
        let bytes = encode(&pixels, 200).unwrap().to_bytes();
        let mut expected = PREFIX.to_vec();
        expected.extend(SUFFIX);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_invalid_max_dimension() {
        let pixels = PixelMatrix::from_fn(1, 1, |_, _| BLACK);
        assert!(encode(&pixels, 0).is_err());
    }
}
