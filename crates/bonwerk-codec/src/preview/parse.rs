// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Byte stream → operations.  Recognizes exactly the command table in
// `crate::command`; everything else becomes a warning.

use bonwerk_core::ops::{
    Alignment, BarcodeFormat, BarcodeSpec, Bitmap, Op, TextPosition, TextStyle,
};
use tracing::debug;

use crate::command::{
    CODE128_SET_B, CR, DLE, EOT, ESC, ESC_ALIGN, ESC_BOLD, ESC_FEED_LINES, ESC_INIT,
    ESC_UNDERLINE, GS, GS_BARCODE_HEIGHT, GS_BARCODE_HRI, GS_BARCODE_PRINT, GS_BARCODE_WIDTH,
    GS_CHAR_SIZE, GS_CUT, GS_INVERSE, GS_RASTER, LF,
};

/// A byte sequence the parser could not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// Offset of the first byte of the skipped sequence.
    pub offset: usize,
    pub message: String,
}

/// Result of [`parse`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    pub ops: Vec<Op>,
    pub warnings: Vec<ParseWarning>,
}

/// Decode `bytes` into operations.  Never fails.
///
/// Consecutive style commands coalesce into one `Op::Style` carrying the full
/// resulting style.  Status probes (`DLE EOT n`) are dropped silently.
pub fn parse(bytes: &[u8]) -> ParsedDocument {
    let mut p = Parser::new(bytes);
    p.run();
    debug!(
        ops = p.ops.len(),
        warnings = p.warnings.len(),
        "parsed byte stream"
    );
    ParsedDocument {
        ops: p.ops,
        warnings: p.warnings,
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    ops: Vec<Op>,
    warnings: Vec<ParseWarning>,
    /// Style the printer is in after the commands read so far.
    style: TextStyle,
    /// Style the emitted ops leave the printer in.
    emitted: TextStyle,
    barcode_height: u8,
    barcode_width: u8,
    barcode_hri: TextPosition,
}

impl<'a> Parser<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        let defaults = BarcodeSpec::new(BarcodeFormat::Code128, "");
        Self {
            bytes,
            pos: 0,
            ops: Vec::new(),
            warnings: Vec::new(),
            style: TextStyle::default(),
            emitted: TextStyle::default(),
            barcode_height: defaults.height,
            barcode_width: defaults.width,
            barcode_hri: defaults.text_position,
        }
    }

    fn run(&mut self) {
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let byte = self.bytes[start];
            let done = match byte {
                ESC => self.esc(start),
                GS => self.gs(start),
                DLE => self.dle(start),
                LF => {
                    self.emit(Op::LineFeed);
                    self.pos += 1;
                    true
                }
                CR => {
                    self.pos += 1;
                    true
                }
                0x00..=0x1F | 0x7F => {
                    self.warn(start, format!("unknown control byte 0x{byte:02X}"));
                    self.pos += 1;
                    true
                }
                _ => {
                    self.text(start);
                    true
                }
            };
            if !done {
                break;
            }
        }
        self.flush_style();
    }

    /// Everything up to the next control byte is text.
    fn text(&mut self, start: usize) {
        let bytes = self.bytes;
        let end = bytes[start..]
            .iter()
            .position(|&b| b < 0x20 || b == 0x7F)
            .map_or(bytes.len(), |n| start + n);
        let text = String::from_utf8_lossy(&bytes[start..end]).into_owned();
        self.emit(Op::Text(text));
        self.pos = end;
    }

    /// Returns `false` when the stream ends inside the command.
    fn esc(&mut self, start: usize) -> bool {
        let Some(&cmd) = self.bytes.get(start + 1) else {
            return self.truncated(start, "ESC");
        };
        if cmd == ESC_INIT {
            // A reset makes any unsent style moot.
            self.ops.push(Op::Init);
            self.style = TextStyle::default();
            self.emitted = TextStyle::default();
            self.pos = start + 2;
            return true;
        }
        let Some(&n) = self.bytes.get(start + 2) else {
            return self.truncated(start, "ESC");
        };
        match cmd {
            ESC_ALIGN => match Alignment::from_code(n) {
                Some(a) => self.style.alignment = a,
                None => self.warn(start, format!("alignment {n} out of range")),
            },
            ESC_BOLD => self.style.bold = n & 1 == 1,
            ESC_UNDERLINE => self.style.underline = matches!(n, 1 | 2 | b'1' | b'2'),
            ESC_FEED_LINES => self.emit(Op::Feed(n)),
            _ => {
                self.warn(start, format!("unknown command ESC 0x{cmd:02X}"));
                self.pos = start + 2;
                return true;
            }
        }
        self.pos = start + 3;
        true
    }

    fn gs(&mut self, start: usize) -> bool {
        let Some(&cmd) = self.bytes.get(start + 1) else {
            return self.truncated(start, "GS");
        };
        match cmd {
            GS_BARCODE_PRINT => return self.barcode(start),
            GS_RASTER => return self.raster(start),
            _ => {}
        }
        let Some(&n) = self.bytes.get(start + 2) else {
            return self.truncated(start, "GS");
        };
        let mut len = 3;
        match cmd {
            GS_CHAR_SIZE => {
                let (w, h) = TextStyle::scales_from_size_byte(n);
                self.style.width_scale = w;
                self.style.height_scale = h;
            }
            GS_INVERSE => self.style.inverse = n & 1 == 1,
            GS_BARCODE_HEIGHT => self.barcode_height = n,
            GS_BARCODE_WIDTH => self.barcode_width = n,
            GS_BARCODE_HRI => {
                self.barcode_hri = TextPosition::from_code(n).unwrap_or_default();
            }
            GS_CUT => match n {
                0 | b'0' => self.emit(Op::Cut { partial: false }),
                1 | b'1' => self.emit(Op::Cut { partial: true }),
                // Feed-and-cut forms carry one extra byte.
                65 | 66 => {
                    if self.bytes.get(start + 3).is_none() {
                        return self.truncated(start, "GS V");
                    }
                    self.emit(Op::Cut { partial: n == 66 });
                    len = 4;
                }
                _ => self.warn(start, format!("unknown cut mode {n}")),
            },
            _ => {
                self.warn(start, format!("unknown command GS 0x{cmd:02X}"));
                len = 2;
            }
        }
        self.pos = start + len;
        true
    }

    fn dle(&mut self, start: usize) -> bool {
        match (self.bytes.get(start + 1), self.bytes.get(start + 2)) {
            (Some(&EOT), Some(_)) => self.pos = start + 3,
            (Some(&EOT), None) => return self.truncated(start, "DLE EOT"),
            _ => {
                self.warn(start, "unknown DLE sequence".to_string());
                self.pos = start + 1;
            }
        }
        true
    }

    /// GS k m n d1..dn
    fn barcode(&mut self, start: usize) -> bool {
        let bytes = self.bytes;
        let (Some(&m), Some(&n)) = (bytes.get(start + 2), bytes.get(start + 3)) else {
            return self.truncated(start, "GS k");
        };
        let data_start = start + 4;
        let data_end = data_start + n as usize;
        if data_end > bytes.len() {
            return self.truncated(start, "GS k");
        }
        self.pos = data_end;

        let Some(format) = BarcodeFormat::from_code(m) else {
            self.warn(start, format!("unsupported barcode type {m}"));
            return true;
        };
        let mut data = &bytes[data_start..data_end];
        if format == BarcodeFormat::Code128 {
            data = data.strip_prefix(CODE128_SET_B.as_slice()).unwrap_or(data);
        }
        self.emit(Op::Barcode(BarcodeSpec {
            format,
            content: String::from_utf8_lossy(data).into_owned(),
            height: self.barcode_height,
            width: self.barcode_width,
            text_position: self.barcode_hri,
        }));
        true
    }

    /// GS v 0 m xL xH yL yH d1..dk
    fn raster(&mut self, start: usize) -> bool {
        let bytes = self.bytes;
        let Some(header) = bytes.get(start..start + 8) else {
            return self.truncated(start, "GS v 0");
        };
        if header[2] != b'0' {
            self.warn(start, format!("unknown raster function 0x{:02X}", header[2]));
            self.pos = start + 3;
            return true;
        }
        let row_bytes = u16::from_le_bytes([header[4], header[5]]) as usize;
        let rows = u16::from_le_bytes([header[6], header[7]]) as u32;
        let data_start = start + 8;
        let data_end = data_start + row_bytes * rows as usize;
        let Some(data) = bytes.get(data_start..data_end) else {
            return self.truncated(start, "GS v 0");
        };
        let bitmap = Bitmap {
            width: (row_bytes * 8) as u32,
            height: rows,
            data: data.to_vec(),
        };
        self.emit(Op::Raster(bitmap));
        self.pos = data_end;
        true
    }

    fn emit(&mut self, op: Op) {
        self.flush_style();
        self.ops.push(op);
    }

    fn flush_style(&mut self) {
        if self.style != self.emitted {
            self.ops.push(Op::Style(self.style));
            self.emitted = self.style;
        }
    }

    fn warn(&mut self, offset: usize, message: String) {
        debug!(offset, %message, "skipping unrecognized bytes");
        self.warnings.push(ParseWarning { offset, message });
    }

    fn truncated(&mut self, start: usize, what: &str) -> bool {
        self.warn(start, format!("truncated {what} command"));
        self.pos = self.bytes.len();
        false
    }
}
