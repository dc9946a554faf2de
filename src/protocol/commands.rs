//! # ESC/POS Protocol Commands
//!
//! Fixed command sequences used by the raster encoder and the text markup
//! converter.
//!
//! ## Escape Sequence Structure
//!
//! Commands follow these patterns:
//! - Single byte: `LF`
//! - Two bytes: `ESC @`, `ESC i`
//! - Multi-byte with parameters: `ESC 3 n`, `ESC a n`, `ESC * m nL nH data...`
//!
//! ## Byte Order
//!
//! Multi-byte integers use **little-endian** encoding:
//! - `u16` value 0x1234 is sent as bytes `[0x34, 0x12]`

// ============================================================================
// ESCAPE SEQUENCE CONSTANTS
// ============================================================================

/// ESC (Escape) - Command prefix byte
pub const ESC: u8 = 0x1B;

/// FS (File Separator) - Kanji/extended character prefix
///
/// Used by `FS !` to set double-byte character size alongside `ESC !`.
pub const FS: u8 = 0x1C;

/// GS (Group Separator) - Extended command prefix
pub const GS: u8 = 0x1D;

/// LF (Line Feed) - Print and advance one line
pub const LF: u8 = 0x0A;

// ============================================================================
// FIXED SEQUENCES
// ============================================================================

/// # Set Line Spacing to 24 Dots (ESC 3 24)
///
/// Matches the height of one raster band so consecutive bands print
/// without gaps.
///
/// | Format  | Bytes     |
/// |---------|-----------|
/// | ASCII   | ESC 3 n   |
/// | Hex     | 1B 33 18  |
pub const SET_LINE_SPACE_24: [u8; 3] = [ESC, b'3', 24];

/// # Set Line Spacing to 32 Dots (ESC 3 32)
///
/// Restores a text-friendly spacing after an image.
pub const SET_LINE_SPACE_32: [u8; 3] = [ESC, b'3', 32];

/// # Center Alignment (ESC a 1)
///
/// The parameter is sent as ASCII `'1'` (0x31), which printers accept
/// interchangeably with 0x01.
pub const CENTER_ALIGN: [u8; 3] = [ESC, b'a', b'1'];

/// # Select Bit-Image Mode (ESC * 33)
///
/// Mode 33 is 24-dot double density: each column is three bytes stacked
/// vertically, MSB at the top. Followed by `nL nH` column count.
///
/// | Format  | Bytes         |
/// |---------|---------------|
/// | ASCII   | ESC * m nL nH |
/// | Hex     | 1B 2A 21 ...  |
pub const SELECT_BIT_IMAGE_MODE: [u8; 3] = [ESC, b'*', 33];

/// Single line feed
pub const LINE_FEED: [u8; 1] = [LF];

/// # Initialize Printer (ESC @)
///
/// Resets text formatting, alignment and line spacing.
///
/// ```
/// use rollo::protocol::commands;
///
/// assert_eq!(commands::init(), vec![0x1B, 0x40]);
/// ```
#[inline]
pub fn init() -> Vec<u8> {
    vec![ESC, b'@']
}

/// # Cut Paper (ESC i)
#[inline]
pub fn cut() -> Vec<u8> {
    vec![ESC, b'i']
}

/// # Buzzer (ESC B n t)
///
/// Beeps `times` times, each lasting `duration × 50ms`.
#[inline]
pub fn beep(times: u8, duration: u8) -> Vec<u8> {
    vec![ESC, b'B', times, duration]
}

/// # Feed Lines
///
/// Emits `n` bare line feeds.
#[inline]
pub fn feed_lines(n: usize) -> Vec<u8> {
    vec![LF; n]
}

/// Encode a u16 as little-endian bytes.
#[inline]
pub fn u16_le(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}
