// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Barcode generator: validates content against each symbology's rules and
// produces the single barcode operation the codec knows how to encode.
//
// EAN/UPC check digits use the standard modulo-10 weighted sum: starting from
// the digit nearest the check digit, weights alternate 3, 1, 3, 1, ...

use bonwerk_core::error::{BonwerkError, Result};
use bonwerk_core::ops::{BarcodeFormat, BarcodeSpec, Op};
use tracing::debug;

use crate::command::{CODE128_SET_B, MAX_BARCODE_DATA};

/// Characters CODE39 can encode (start/stop `*` excluded).
const CODE39_CHARSET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ -.$/+%";

/// Printer-legal module widths.
const MIN_MODULE_WIDTH: u8 = 2;
const MAX_MODULE_WIDTH: u8 = 6;

/// Validate `spec` and return the barcode operation.
///
/// Missing EAN/UPC check digits are computed; a supplied check digit that does
/// not match fails with `InvalidContent`.
pub fn generate_barcode(spec: &BarcodeSpec) -> Result<Vec<Op>> {
    let normalized = validate_barcode(spec)?;
    debug!(format = ?normalized.format, content = %normalized.content, "barcode generated");
    Ok(vec![Op::Barcode(normalized)])
}

/// Validate and normalize a barcode spec without wrapping it in an operation.
pub fn validate_barcode(spec: &BarcodeSpec) -> Result<BarcodeSpec> {
    let content = match spec.format {
        BarcodeFormat::Code128 => validate_code128(&spec.content)?,
        BarcodeFormat::Code39 => validate_code39(&spec.content)?,
        BarcodeFormat::Ean13 => validate_gtin(spec.format, &spec.content, 12)?,
        BarcodeFormat::Ean8 => validate_gtin(spec.format, &spec.content, 7)?,
        BarcodeFormat::UpcA => validate_gtin(spec.format, &spec.content, 11)?,
    };

    Ok(BarcodeSpec {
        format: spec.format,
        content,
        height: spec.height.max(1),
        width: spec.width.clamp(MIN_MODULE_WIDTH, MAX_MODULE_WIDTH),
        text_position: spec.text_position,
    })
}

/// Compute the modulo-10 check digit for a string of digits.
///
/// Returns `None` if `digits` is empty or contains a non-digit.
pub fn check_digit(digits: &str) -> Option<u8> {
    if digits.is_empty() {
        return None;
    }
    let mut sum = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let d = c.to_digit(10)?;
        sum += if i % 2 == 0 { d * 3 } else { d };
    }
    Some(((10 - sum % 10) % 10) as u8)
}

fn invalid(format: BarcodeFormat, reason: impl Into<String>) -> BonwerkError {
    BonwerkError::InvalidContent {
        format,
        reason: reason.into(),
    }
}

fn validate_code128(content: &str) -> Result<String> {
    let format = BarcodeFormat::Code128;
    let max = MAX_BARCODE_DATA - CODE128_SET_B.len();
    if content.is_empty() || content.len() > max {
        return Err(invalid(format, format!("length must be 1..={max}")));
    }
    if let Some(bad) = content.chars().find(|c| !(' '..='~').contains(c)) {
        return Err(invalid(format, format!("unsupported character {bad:?}")));
    }
    // `{` introduces code-set switches on the printer.
    if content.contains('{') {
        return Err(invalid(format, "'{' is reserved for code-set switches"));
    }
    Ok(content.to_string())
}

fn validate_code39(content: &str) -> Result<String> {
    let format = BarcodeFormat::Code39;
    // Lowercase is the one thing we fix up.
    let upper = content.to_ascii_uppercase();
    if upper.is_empty() || upper.len() > MAX_BARCODE_DATA {
        return Err(invalid(format, format!("length must be 1..={MAX_BARCODE_DATA}")));
    }
    if let Some(bad) = upper.chars().find(|c| !CODE39_CHARSET.contains(*c)) {
        return Err(invalid(format, format!("unsupported character {bad:?}")));
    }
    Ok(upper)
}

/// EAN-13, EAN-8 and UPC-A: `data_len` digits, optionally followed by the
/// check digit.
fn validate_gtin(format: BarcodeFormat, content: &str, data_len: usize) -> Result<String> {
    if !content.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(format, "only digits are allowed"));
    }
    let n = content.len();
    if n != data_len && n != data_len + 1 {
        return Err(invalid(
            format,
            format!("expected {} or {} digits, got {n}", data_len, data_len + 1),
        ));
    }

    let expected = check_digit(&content[..data_len])
        .ok_or_else(|| invalid(format, "could not compute check digit"))?;

    if n == data_len {
        return Ok(format!("{content}{expected}"));
    }

    let supplied = content.as_bytes()[data_len] - b'0';
    if supplied != expected {
        return Err(invalid(
            format,
            format!("check digit {supplied} does not match computed {expected}"),
        ));
    }
    Ok(content.to_string())
}
