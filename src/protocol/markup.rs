//! # Receipt Markup
//!
//! Converts lightly tagged text into an ESC/POS byte stream for
//! `print_text` and `print_bill`.
//!
//! ## Tags
//!
//! | Tag | Effect | Opening bytes |
//! |-----|--------|---------------|
//! | `<L>` | Left align | `1B 61 00` |
//! | `<C>` | Center align | `1B 61 01` |
//! | `<R>` | Right align | `1B 61 02` |
//! | `<B>` | Double width and height | `1B 21 30 1C 21 0C` |
//! | `<M>` | Medium (double height) | `1B 21 10 1C 21 08` |
//! | `<D>` | Double width | `1B 21 20 1C 21 04` |
//! | `<CB>` `<CM>` `<CD>` | Centered variants | `1B 61 01` + size bytes |
//!
//! Size tags close with `1B 21 00 1C 21 00`. Alignment closers emit
//! nothing: alignment is reset at every newline anyway. Anything else in
//! angle brackets is printed as-is.
//!
//! ## Line Handling
//!
//! Every `\n` becomes `LF` followed by a reset of alignment, character size
//! and line spacing, so a style never leaks into the next line.
//!
//! ```
//! use rollo::protocol::markup::{self, PrintOptions};
//!
//! let bytes = markup::convert("<C>TOTAL</C>", PrintOptions::text());
//! assert_eq!(&bytes[..4], &[0x1B, 0x40, 0x1B, 0x32]);
//! assert_eq!(&bytes[4..7], &[0x1B, 0x61, 0x01]);
//! ```

use serde::{Deserialize, Serialize};

use super::commands::{self, ESC, FS, GS, LF};

/// Lines fed after the body when `tailing_line` is set
pub const TAILING_LINES: usize = 5;

const ALIGN_LEFT: [u8; 3] = [ESC, b'a', 0];
const ALIGN_CENTER: [u8; 3] = [ESC, b'a', 1];
const ALIGN_RIGHT: [u8; 3] = [ESC, b'a', 2];

const SIZE_BIG: [u8; 6] = [ESC, b'!', 0x30, FS, b'!', 0x0C];
const SIZE_MEDIUM: [u8; 6] = [ESC, b'!', 0x10, FS, b'!', 0x08];
const SIZE_DOUBLE_WIDTH: [u8; 6] = [ESC, b'!', 0x20, FS, b'!', 0x04];
const SIZE_NORMAL: [u8; 6] = [ESC, b'!', 0, FS, b'!', 0];

/// `ESC 2`: default line spacing
const DEFAULT_LINE_SPACING: [u8; 2] = [ESC, b'2'];

/// Emitted after every newline.
const LINE_RESET: [u8; 8] = [ESC, b'a', 0, GS, b'!', 0, ESC, b'2'];

/// Trailer options for a markup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintOptions {
    pub beep: bool,
    pub cut: bool,
    pub tailing_line: bool,
}

impl PrintOptions {
    /// Plain text: no beep, no cut, no trailing feed.
    pub fn text() -> Self {
        Self {
            beep: false,
            cut: false,
            tailing_line: false,
        }
    }

    /// Bill: feed, cut and beep.
    pub fn bill() -> Self {
        Self {
            beep: true,
            cut: true,
            tailing_line: true,
        }
    }
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self::text()
    }
}

fn tag_bytes(tag: &str) -> Option<Vec<u8>> {
    let bytes = match tag {
        "L" => ALIGN_LEFT.to_vec(),
        "C" => ALIGN_CENTER.to_vec(),
        "R" => ALIGN_RIGHT.to_vec(),
        "B" => SIZE_BIG.to_vec(),
        "M" => SIZE_MEDIUM.to_vec(),
        "D" => SIZE_DOUBLE_WIDTH.to_vec(),
        "CB" => [&ALIGN_CENTER[..], &SIZE_BIG[..]].concat(),
        "CM" => [&ALIGN_CENTER[..], &SIZE_MEDIUM[..]].concat(),
        "CD" => [&ALIGN_CENTER[..], &SIZE_DOUBLE_WIDTH[..]].concat(),
        "/L" | "/C" | "/R" => Vec::new(),
        "/B" | "/M" | "/D" | "/CB" | "/CM" | "/CD" => SIZE_NORMAL.to_vec(),
        _ => return None,
    };
    Some(bytes)
}

/// Convert tagged text into printer bytes.
pub fn convert(text: &str, options: PrintOptions) -> Vec<u8> {
    let mut out = commands::init();
    out.extend_from_slice(&DEFAULT_LINE_SPACING);

    let mut rest = text;
    while let Some(pos) = rest.find(['<', '\n']) {
        out.extend_from_slice(rest[..pos].as_bytes());
        rest = &rest[pos..];

        if let Some(after) = rest.strip_prefix('\n') {
            out.push(LF);
            out.extend_from_slice(&LINE_RESET);
            rest = after;
            continue;
        }

        // rest starts with '<'
        let known = rest
            .find('>')
            .and_then(|end| tag_bytes(&rest[1..end]).map(|bytes| (end, bytes)));
        match known {
            Some((end, bytes)) => {
                out.extend(bytes);
                rest = &rest[end + 1..];
            }
            None => {
                out.push(b'<');
                rest = &rest[1..];
            }
        }
    }
    out.extend_from_slice(rest.as_bytes());

    if options.tailing_line {
        out.extend(commands::feed_lines(TAILING_LINES));
    }
    if options.cut {
        out.extend(commands::cut());
    }
    if options.beep {
        out.extend(commands::beep(3, 2));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PREAMBLE: [u8; 4] = [0x1B, 0x40, 0x1B, 0x32];

    fn body(bytes: &[u8]) -> &[u8] {
        &bytes[PREAMBLE.len()..]
    }

    #[test]
    fn test_plain_text() {
        let bytes = convert("Hello", PrintOptions::text());
        assert_eq!(&bytes[..4], &PREAMBLE);
        assert_eq!(body(&bytes), b"Hello");
    }

    #[test]
    fn test_newline_resets_style() {
        let bytes = convert("a\nb", PrintOptions::text());
        let mut expected = b"a".to_vec();
        expected.push(LF);
        expected.extend_from_slice(&LINE_RESET);
        expected.extend_from_slice(b"b");
        assert_eq!(body(&bytes), &expected[..]);
    }

    #[test]
    fn test_center_bold_line() {
        let bytes = convert("<CB>TOTAL</CB>", PrintOptions::text());
        let mut expected = vec![0x1B, 0x61, 0x01, 0x1B, 0x21, 0x30, 0x1C, 0x21, 0x0C];
        expected.extend_from_slice(b"TOTAL");
        expected.extend_from_slice(&[0x1B, 0x21, 0x00, 0x1C, 0x21, 0x00]);
        assert_eq!(body(&bytes), &expected[..]);
    }

    #[test]
    fn test_alignment_close_is_silent() {
        let bytes = convert("<R>x</R>", PrintOptions::text());
        assert_eq!(body(&bytes), &[0x1B, 0x61, 0x02, b'x']);
    }

    #[test]
    fn test_unknown_tags_are_literal() {
        let bytes = convert("a < b <X> c>", PrintOptions::text());
        assert_eq!(body(&bytes), b"a < b <X> c>");
        let bytes = convert("open <C", PrintOptions::text());
        assert_eq!(body(&bytes), b"open <C");
    }

    #[test]
    fn test_utf8_passthrough() {
        let bytes = convert("café", PrintOptions::text());
        assert_eq!(body(&bytes), "café".as_bytes());
    }

    #[test]
    fn test_bill_trailer_order() {
        let bytes = convert("", PrintOptions::bill());
        assert_eq!(
            body(&bytes),
            &[0x0A, 0x0A, 0x0A, 0x0A, 0x0A, 0x1B, 0x69, 0x1B, 0x42, 3, 2]
        );
    }

    #[test]
    fn test_options_wire_names() {
        let opts: PrintOptions =
            serde_json::from_str(r#"{"beep": false, "cut": true, "tailingLine": true}"#).unwrap();
        assert_eq!(opts, PrintOptions { beep: false, cut: true, tailing_line: true });
    }
}
