// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Preview: decode an ESC/POS byte stream back into operations and rasterize
// them onto a monochrome paper canvas.
//
// ```text
// bytes ──parse──▶ ParsedDocument { ops, warnings } ──render──▶ GrayImage ──▶ PNG
// ```
//
// Never touches hardware and never retries.  Unknown byte sequences are
// skipped and reported as warnings so a preview of a partly foreign stream
// still shows everything that was understood.

mod barcode;
mod parse;
mod render;

pub use parse::{ParseWarning, ParsedDocument, parse};
pub use render::render;

use bonwerk_core::config::PreviewConfig;
use bonwerk_core::error::{BonwerkError, Result};
use image::{GrayImage, ImageEncoder};

/// Encode a rendered preview as PNG.
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    image::codecs::png::PngEncoder::new(&mut png)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::L8,
        )
        .map_err(|e| BonwerkError::Image(e.to_string()))?;
    Ok(png)
}

/// Parse, render and PNG-encode a byte stream in one step.
///
/// Returns the PNG together with any parse warnings.
pub fn preview_png(bytes: &[u8], config: &PreviewConfig) -> Result<(Vec<u8>, Vec<ParseWarning>)> {
    let doc = parse(bytes);
    let img = render(&doc.ops, config);
    Ok((encode_png(&img)?, doc.warnings))
}
