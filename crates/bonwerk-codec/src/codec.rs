// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command codec with a style cursor.
//
// The cursor records what the printer is currently set to.  Style changes
// only emit the commands whose target differs from the cursor, so a receipt
// full of repeated "bold on" requests costs three bytes, not three per line.
// Encoding is deterministic: the same operations always produce the same
// bytes, which is what lets a persisted byte offset survive a restart.

use bonwerk_core::config::TextEncoding;
use bonwerk_core::ops::{Op, TextStyle};

use crate::command;

/// Turns text into printer bytes.  The codec never encodes text itself.
pub trait TextEncoder {
    fn encode(&self, text: &str) -> Vec<u8>;
}

impl TextEncoder for TextEncoding {
    fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}

/// One print session's command encoder.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    cursor: TextStyle,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current style cursor.
    pub fn cursor(&self) -> &TextStyle {
        &self.cursor
    }

    /// Emit only the commands whose value differs from the cursor, then move
    /// the cursor.  Scales are clamped first.
    pub fn set_style(&mut self, style: &TextStyle) -> Vec<u8> {
        let target = style.clamped();
        let mut out = Vec::new();
        if target.alignment != self.cursor.alignment {
            out.extend_from_slice(&command::align(target.alignment));
        }
        if target.size_byte() != self.cursor.size_byte() {
            out.extend_from_slice(&command::char_size(target.size_byte()));
        }
        if target.bold != self.cursor.bold {
            out.extend_from_slice(&command::bold(target.bold));
        }
        if target.underline != self.cursor.underline {
            out.extend_from_slice(&command::underline(target.underline));
        }
        if target.inverse != self.cursor.inverse {
            out.extend_from_slice(&command::inverse(target.inverse));
        }
        self.cursor = target;
        out
    }

    /// Restore every non-default field; nothing for fields already default.
    pub fn reset_style(&mut self) -> Vec<u8> {
        self.set_style(&TextStyle::default())
    }

    /// Style commands for `text`.  The text bytes themselves are appended by
    /// the caller through a [`TextEncoder`].
    pub fn format(&mut self, _text: &str, style: Option<&TextStyle>) -> Vec<u8> {
        match style {
            Some(style) => self.set_style(style),
            None => Vec::new(),
        }
    }

    /// Append the bytes for one operation to `out`.
    pub fn encode_op(&mut self, op: &Op, encoder: &dyn TextEncoder, out: &mut Vec<u8>) {
        match op {
            Op::Init => {
                out.extend_from_slice(&command::init());
                // ESC @ resets the printer, so the cursor follows.
                self.cursor = TextStyle::default();
            }
            Op::Style(style) => out.extend(self.set_style(style)),
            Op::ResetStyle => out.extend(self.reset_style()),
            Op::Text(text) => out.extend(encoder.encode(text)),
            Op::LineFeed => out.push(command::LF),
            Op::Feed(n) => out.extend_from_slice(&command::feed_lines(*n)),
            Op::Barcode(spec) => out.extend(command::barcode(
                spec.format,
                spec.height,
                spec.width,
                spec.text_position,
                spec.content.as_bytes(),
            )),
            Op::Raster(bitmap) => out.extend(command::raster(bitmap)),
            Op::Cut { partial } => out.extend_from_slice(&command::cut(*partial)),
            Op::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }

    /// Encode a sequence of operations, continuing from the current cursor.
    pub fn encode(&mut self, ops: &[Op], encoder: &dyn TextEncoder) -> Vec<u8> {
        let mut out = Vec::new();
        for op in ops {
            self.encode_op(op, encoder, &mut out);
        }
        out
    }
}

/// Encode `ops` with a fresh cursor.
pub fn encode_ops(ops: &[Op], encoder: &dyn TextEncoder) -> Vec<u8> {
    Codec::new().encode(ops, encoder)
}
