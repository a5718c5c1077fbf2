// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bar patterns for preview rendering, via the barcoders crate.

use barcoders::sym::code39::Code39;
use barcoders::sym::code128::Code128;
use barcoders::sym::ean8::EAN8;
use barcoders::sym::ean13::EAN13;
use bonwerk_core::ops::BarcodeFormat;

/// Encode `content` as modules: `true` = bar, `false` = space.
///
/// Returns `None` when the content cannot be encoded; the renderer draws a
/// placeholder instead.  EAN/UPC content is passed without its check digit
/// and barcoders recomputes it.
pub(super) fn modules(format: BarcodeFormat, content: &str) -> Option<Vec<bool>> {
    let encoded = match format {
        BarcodeFormat::Code39 => Code39::new(content).ok()?.encode(),
        // Character set B, matching the `{B` prefix sent to the printer.
        BarcodeFormat::Code128 => Code128::new(format!("\u{0181}{content}")).ok()?.encode(),
        BarcodeFormat::Ean13 => EAN13::new(content.get(..12)?).ok()?.encode(),
        BarcodeFormat::Ean8 => EAN8::new(content.get(..7)?).ok()?.encode(),
        // UPC-A is EAN-13 with a leading zero.
        BarcodeFormat::UpcA => EAN13::new(format!("0{}", content.get(..11)?)).ok()?.encode(),
    };
    Some(encoded.into_iter().map(|m| m == 1).collect())
}
