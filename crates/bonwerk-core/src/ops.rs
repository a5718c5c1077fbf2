// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer operations: the vocabulary shared by the codec, the generators, the
// preview path and the persisted job payloads.

use serde::{Deserialize, Serialize};

/// Smallest and largest character scale the printer accepts.
pub const MIN_SCALE: u8 = 1;
pub const MAX_SCALE: u8 = 8;

/// Horizontal text alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Alignment {
    /// Parameter byte for the alignment command.
    pub fn code(self) -> u8 {
        match self {
            Self::Left => 0,
            Self::Center => 1,
            Self::Right => 2,
        }
    }

    /// Inverse of [`Alignment::code`]. Accepts the ASCII digit forms too.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 | b'0' => Some(Self::Left),
            1 | b'1' => Some(Self::Center),
            2 | b'2' => Some(Self::Right),
            _ => None,
        }
    }
}

/// Text style cursor.
///
/// Scales are always kept inside `[MIN_SCALE, MAX_SCALE]`; use
/// [`TextStyle::with_scale`] or [`TextStyle::clamped`] when building one from
/// untrusted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub alignment: Alignment,
    pub width_scale: u8,
    pub height_scale: u8,
    pub bold: bool,
    pub underline: bool,
    pub inverse: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            alignment: Alignment::Left,
            width_scale: MIN_SCALE,
            height_scale: MIN_SCALE,
            bold: false,
            underline: false,
            inverse: false,
        }
    }
}

impl TextStyle {
    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_scale(mut self, width: u8, height: u8) -> Self {
        self.width_scale = clamp_scale(width);
        self.height_scale = clamp_scale(height);
        self
    }

    pub fn with_bold(mut self, bold: bool) -> Self {
        self.bold = bold;
        self
    }

    pub fn with_underline(mut self, underline: bool) -> Self {
        self.underline = underline;
        self
    }

    pub fn with_inverse(mut self, inverse: bool) -> Self {
        self.inverse = inverse;
        self
    }

    /// Copy of this style with both scales forced into range.
    pub fn clamped(self) -> Self {
        let (w, h) = (self.width_scale, self.height_scale);
        self.with_scale(w, h)
    }

    /// Character-size parameter: `((width - 1) << 4) | (height - 1)`.
    pub fn size_byte(&self) -> u8 {
        let w = clamp_scale(self.width_scale) - 1;
        let h = clamp_scale(self.height_scale) - 1;
        (w << 4) | h
    }

    /// Inverse of [`TextStyle::size_byte`], clamping out-of-range nibbles.
    pub fn scales_from_size_byte(n: u8) -> (u8, u8) {
        (clamp_scale((n >> 4) + 1), clamp_scale((n & 0x0F) + 1))
    }
}

fn clamp_scale(value: u8) -> u8 {
    value.clamp(MIN_SCALE, MAX_SCALE)
}

/// Supported 1D barcode symbologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarcodeFormat {
    Code128,
    Code39,
    Ean13,
    Ean8,
    UpcA,
}

impl BarcodeFormat {
    /// `m` parameter of the function-B barcode print command.
    pub fn code(self) -> u8 {
        match self {
            Self::UpcA => 65,
            Self::Ean13 => 67,
            Self::Ean8 => 68,
            Self::Code39 => 69,
            Self::Code128 => 73,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            65 => Some(Self::UpcA),
            67 => Some(Self::Ean13),
            68 => Some(Self::Ean8),
            69 => Some(Self::Code39),
            73 => Some(Self::Code128),
            _ => None,
        }
    }
}

/// Where the human-readable text of a barcode is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextPosition {
    None,
    Above,
    #[default]
    Below,
    Both,
}

impl TextPosition {
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Above => 1,
            Self::Below => 2,
            Self::Both => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 | b'0' => Some(Self::None),
            1 | b'1' => Some(Self::Above),
            2 | b'2' => Some(Self::Below),
            3 | b'3' => Some(Self::Both),
            _ => None,
        }
    }
}

/// A barcode to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeSpec {
    pub format: BarcodeFormat,
    pub content: String,
    /// Bar height in dots.
    pub height: u8,
    /// Narrow module width in dots.
    pub width: u8,
    pub text_position: TextPosition,
}

impl BarcodeSpec {
    pub fn new(format: BarcodeFormat, content: impl Into<String>) -> Self {
        Self {
            format,
            content: content.into(),
            height: 80,
            width: 3,
            text_position: TextPosition::Below,
        }
    }
}

/// Monochrome bitmap, 1 bit per dot, rows packed MSB-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitmap {
    /// Width in dots.
    pub width: u32,
    /// Height in rows.
    pub height: u32,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl Bitmap {
    /// Blank (all white) bitmap.
    pub fn new(width: u32, height: u32) -> Self {
        let data = vec![0u8; Self::row_bytes_for(width) * height as usize];
        Self {
            width,
            height,
            data,
        }
    }

    pub fn row_bytes_for(width: u32) -> usize {
        (width as usize).div_ceil(8)
    }

    pub fn row_bytes(&self) -> usize {
        Self::row_bytes_for(self.width)
    }

    /// Whether the dot at (x, y) is black. Out-of-range reads are white.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let idx = y as usize * self.row_bytes() + (x / 8) as usize;
        self.data
            .get(idx)
            .is_some_and(|byte| byte & (0x80 >> (x % 8)) != 0)
    }

    pub fn set(&mut self, x: u32, y: u32, black: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = y as usize * self.row_bytes() + (x / 8) as usize;
        let mask = 0x80 >> (x % 8);
        if let Some(byte) = self.data.get_mut(idx) {
            if black {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }
}

/// One printer operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Reset the printer to power-on state.
    Init,
    /// Move the style cursor to this style.
    Style(TextStyle),
    /// Restore the default style.
    ResetStyle,
    /// Text, encoded by the caller-supplied text encoder.
    Text(String),
    LineFeed,
    /// Feed `n` lines.
    Feed(u8),
    Barcode(BarcodeSpec),
    Raster(Bitmap),
    Cut {
        partial: bool,
    },
    /// Bytes passed through untouched.
    Raw(#[serde(with = "hex_bytes")] Vec<u8>),
}

impl Op {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Serialize byte vectors as lowercase hex strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
