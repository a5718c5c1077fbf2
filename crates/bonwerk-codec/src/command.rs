// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fixed ESC/POS command table.
//
// Every builder returns one short, fixed-layout byte sequence.  These bytes
// must match the printer firmware exactly; the preview parser in
// `preview::parse` recognizes the same set.

use bonwerk_core::ops::{Alignment, BarcodeFormat, Bitmap, TextPosition};
use tracing::warn;

pub const LF: u8 = 0x0A;
pub const CR: u8 = 0x0D;
pub const DLE: u8 = 0x10;
pub const EOT: u8 = 0x04;
pub const ESC: u8 = 0x1B;
pub const GS: u8 = 0x1D;

// ESC-prefixed command bytes.
pub const ESC_INIT: u8 = b'@';
pub const ESC_ALIGN: u8 = b'a';
pub const ESC_BOLD: u8 = b'E';
pub const ESC_UNDERLINE: u8 = b'-';
pub const ESC_FEED_LINES: u8 = b'd';

// GS-prefixed command bytes.
pub const GS_CHAR_SIZE: u8 = b'!';
pub const GS_INVERSE: u8 = b'B';
pub const GS_BARCODE_HEIGHT: u8 = b'h';
pub const GS_BARCODE_WIDTH: u8 = b'w';
pub const GS_BARCODE_HRI: u8 = b'H';
pub const GS_BARCODE_PRINT: u8 = b'k';
pub const GS_RASTER: u8 = b'v';
pub const GS_CUT: u8 = b'V';

/// Code-set prefix the printer expects in front of CODE128 data.
pub const CODE128_SET_B: &[u8; 2] = b"{B";

/// Longest barcode data the one-byte length field can describe.
pub const MAX_BARCODE_DATA: usize = 255;

/// ESC @: reset to power-on state.
pub fn init() -> [u8; 2] {
    [ESC, ESC_INIT]
}

/// ESC a n
pub fn align(alignment: Alignment) -> [u8; 3] {
    [ESC, ESC_ALIGN, alignment.code()]
}

/// GS ! n, where n = ((width - 1) << 4) | (height - 1).
pub fn char_size(size_byte: u8) -> [u8; 3] {
    [GS, GS_CHAR_SIZE, size_byte]
}

/// ESC E n
pub fn bold(on: bool) -> [u8; 3] {
    [ESC, ESC_BOLD, on as u8]
}

/// ESC - n
pub fn underline(on: bool) -> [u8; 3] {
    [ESC, ESC_UNDERLINE, on as u8]
}

/// GS B n: white on black.
pub fn inverse(on: bool) -> [u8; 3] {
    [GS, GS_INVERSE, on as u8]
}

/// ESC d n: print and feed n lines.
pub fn feed_lines(n: u8) -> [u8; 3] {
    [ESC, ESC_FEED_LINES, n]
}

/// GS V m: m = 0 full cut, 1 partial cut.
pub fn cut(partial: bool) -> [u8; 3] {
    [GS, GS_CUT, partial as u8]
}

/// Barcode print sequence: GS h, GS w, GS H, then GS k m n d1..dn.
///
/// `data` is written as given except for CODE128, which always gets the `{B`
/// code-set prefix.  Data past the one-byte length limit is dropped; callers
/// validate length beforehand.
pub fn barcode(
    format: BarcodeFormat,
    height: u8,
    width: u8,
    text_position: TextPosition,
    data: &[u8],
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(data.len() + 2);
    if format == BarcodeFormat::Code128 {
        payload.extend_from_slice(CODE128_SET_B);
    }
    payload.extend_from_slice(data);
    payload.truncate(MAX_BARCODE_DATA);

    let mut out = Vec::with_capacity(payload.len() + 13);
    out.extend_from_slice(&[GS, GS_BARCODE_HEIGHT, height.max(1)]);
    out.extend_from_slice(&[GS, GS_BARCODE_WIDTH, width]);
    out.extend_from_slice(&[GS, GS_BARCODE_HRI, text_position.code()]);
    out.extend_from_slice(&[GS, GS_BARCODE_PRINT, format.code(), payload.len() as u8]);
    out.extend_from_slice(&payload);
    out
}

/// Rows per `GS v 0` block.  Tall images go out as several blocks so a
/// small printer buffer never has to hold the whole bitmap.
pub const RASTER_BAND_ROWS: usize = 256;

/// GS v 0 m xL xH yL yH d1..dk: print a raster bitmap (normal density),
/// split into bands of at most [`RASTER_BAND_ROWS`] rows.
///
/// A row wider than the 16-bit width field is cropped on the right.
pub fn raster(bitmap: &Bitmap) -> Vec<u8> {
    let stride = bitmap.row_bytes();
    let row_bytes = stride.min(u16::MAX as usize);
    if row_bytes < stride {
        warn!(width = bitmap.width, row_bytes = stride, "raster too wide, cropping");
    }
    let rows = bitmap.height as usize;
    if row_bytes == 0 || rows == 0 {
        return Vec::new();
    }

    let bands = rows.div_ceil(RASTER_BAND_ROWS);
    let mut out = Vec::with_capacity(bands * 8 + row_bytes * rows);
    for first in (0..rows).step_by(RASTER_BAND_ROWS) {
        let band = (rows - first).min(RASTER_BAND_ROWS);
        out.extend_from_slice(&[GS, GS_RASTER, b'0', 0]);
        out.extend_from_slice(&(row_bytes as u16).to_le_bytes());
        out.extend_from_slice(&(band as u16).to_le_bytes());
        for row in first..first + band {
            let start = row * stride;
            let line = bitmap.data.get(start..).unwrap_or(&[]);
            let line = &line[..row_bytes.min(line.len())];
            out.extend_from_slice(line);
            // Short data would desync the printer; pad with white.
            out.resize(out.len() + row_bytes - line.len(), 0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_commands_match_table() {
        assert_eq!(align(Alignment::Center), [0x1B, 0x61, 0x01]);
        assert_eq!(char_size(0x11), [0x1D, 0x21, 0x11]);
        assert_eq!(bold(true), [0x1B, 0x45, 0x01]);
        assert_eq!(underline(false), [0x1B, 0x2D, 0x00]);
        assert_eq!(inverse(true), [0x1D, 0x42, 0x01]);
        assert_eq!(init(), [0x1B, 0x40]);
        assert_eq!(cut(true), [0x1D, 0x56, 0x01]);
    }

    #[test]
    fn barcode_layout() {
        let bytes = barcode(BarcodeFormat::Ean8, 50, 2, TextPosition::Below, b"96385074");
        assert_eq!(
            &bytes[..13],
            &[0x1D, 0x68, 50, 0x1D, 0x77, 2, 0x1D, 0x48, 2, 0x1D, 0x6B, 68, 8]
        );
        assert_eq!(&bytes[13..], b"96385074");
    }

    #[test]
    fn code128_gets_code_set_prefix() {
        let bytes = barcode(BarcodeFormat::Code128, 80, 3, TextPosition::None, b"AB-1");
        assert_eq!(bytes[12], 6);
        assert_eq!(&bytes[13..], b"{BAB-1");
    }

    #[test]
    fn raster_header_and_padding() {
        let mut bmp = Bitmap::new(12, 2);
        bmp.set(0, 0, true);
        let bytes = raster(&bmp);
        assert_eq!(&bytes[..8], &[0x1D, 0x76, 0x30, 0x00, 2, 0, 2, 0]);
        assert_eq!(bytes.len(), 8 + 4);
        assert_eq!(bytes[8], 0x80);
    }

    #[test]
    fn tall_raster_is_split_into_bands() {
        let mut bmp = Bitmap::new(16, 600);
        bmp.set(0, 599, true);
        let bytes = raster(&bmp);

        let band = |rows: usize| 8 + 2 * rows;
        assert_eq!(bytes.len(), band(256) * 2 + band(88));
        assert_eq!(&bytes[..8], &[0x1D, 0x76, 0x30, 0x00, 2, 0, 0, 1]);
        let second = band(256);
        assert_eq!(&bytes[second..second + 8], &[0x1D, 0x76, 0x30, 0x00, 2, 0, 0, 1]);
        let third = band(256) * 2;
        assert_eq!(&bytes[third..third + 8], &[0x1D, 0x76, 0x30, 0x00, 2, 0, 88, 0]);
        // Last row of the last band carries the set dot.
        assert_eq!(bytes[bytes.len() - 2], 0x80);
    }

    #[test]
    fn empty_raster_emits_nothing() {
        assert!(raster(&Bitmap::new(0, 4)).is_empty());
        assert!(raster(&Bitmap::new(8, 0)).is_empty());
    }
}
