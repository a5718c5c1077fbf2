// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operations → monochrome paper canvas.

use std::collections::HashMap;

use bonwerk_core::config::PreviewConfig;
use bonwerk_core::ops::{Alignment, BarcodeSpec, Bitmap, Op, TextPosition, TextStyle};
use image::{GrayImage, Luma};
use spleen_font::{FONT_12X24, PSF2Font};
use tracing::{debug, warn};

use super::barcode::modules;

/// Spleen 12×24 cell.
const GLYPH_WIDTH: usize = 12;
const GLYPH_HEIGHT: usize = 24;

/// Rows between the cut marks and the next content.
const CUT_GAP: usize = 6;

/// Tallest canvas a preview will allocate, about four metres of paper at
/// 203 dpi.  Content below it is dropped.
pub const MAX_CANVAS_ROWS: usize = 32_768;

/// Rasterize `ops` onto a canvas `paper_width_dots` wide.
///
/// The canvas grows downwards as content is added; its height is whatever
/// the content needs (at least one row, at most [`MAX_CANVAS_ROWS`]).  Black
/// dots are luma 0, paper is 255.
pub fn render(ops: &[Op], config: &PreviewConfig) -> GrayImage {
    let mut renderer = Renderer::new(config.paper_width_dots.max(1) as usize);
    for op in ops {
        renderer.op(op);
    }
    renderer.finish()
}

struct Renderer {
    width: usize,
    /// Row-major dots, `true` = black.
    dots: Vec<bool>,
    rows: usize,
    style: TextStyle,
    x: usize,
    y: usize,
    /// Tallest cell drawn on the current line.
    line_height: usize,
    line_empty: bool,
    glyphs: HashMap<char, Vec<bool>>,
}

impl Renderer {
    fn new(width: usize) -> Self {
        Self {
            width,
            dots: Vec::new(),
            rows: 0,
            style: TextStyle::default(),
            x: 0,
            y: 0,
            line_height: 0,
            line_empty: true,
            glyphs: HashMap::new(),
        }
    }

    fn op(&mut self, op: &Op) {
        match op {
            Op::Init | Op::ResetStyle => self.style = TextStyle::default(),
            Op::Style(style) => self.style = style.clamped(),
            Op::Text(text) => self.text(text),
            Op::LineFeed => self.newline(),
            Op::Feed(n) => {
                self.end_line();
                self.advance(*n as usize * GLYPH_HEIGHT);
            }
            Op::Barcode(spec) => self.barcode(spec),
            Op::Raster(bitmap) => {
                self.end_line();
                self.blit(bitmap);
            }
            Op::Cut { .. } => {
                self.end_line();
                self.cut_line();
            }
            Op::Raw(bytes) => debug!(len = bytes.len(), "raw bytes not previewed"),
        }
    }

    fn finish(self) -> GrayImage {
        let mut height = self.rows.max(self.y);
        if !self.line_empty {
            height = height.max(self.y + self.line_height);
        }
        if height > MAX_CANVAS_ROWS {
            warn!(rows = height, max = MAX_CANVAS_ROWS, "preview clipped");
        }
        let height = height.clamp(1, MAX_CANVAS_ROWS);
        GrayImage::from_fn(self.width as u32, height as u32, |x, y| {
            let idx = y as usize * self.width + x as usize;
            if self.dots.get(idx).copied().unwrap_or(false) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    fn set(&mut self, x: usize, y: usize, black: bool) {
        if x >= self.width || y >= MAX_CANVAS_ROWS {
            return;
        }
        if y >= self.rows {
            self.rows = y + 1;
            self.dots.resize(self.rows * self.width, false);
        }
        self.dots[y * self.width + x] = black;
    }

    /// Move the paper down; the position saturates just past the canvas cap.
    fn advance(&mut self, rows: usize) {
        self.y = self.y.saturating_add(rows).min(MAX_CANVAS_ROWS + 1);
    }

    fn cell_width(&self) -> usize {
        GLYPH_WIDTH * self.style.width_scale as usize
    }

    fn cell_height(&self) -> usize {
        GLYPH_HEIGHT * self.style.height_scale as usize
    }

    fn newline(&mut self) {
        let rows = if self.line_height > 0 {
            self.line_height
        } else {
            self.cell_height()
        };
        self.advance(rows);
        self.x = 0;
        self.line_height = 0;
        self.line_empty = true;
    }

    /// Finish a partly printed line; no-op at the start of a line.
    fn end_line(&mut self) {
        if !self.line_empty {
            self.newline();
        }
    }

    fn aligned_x(&self, content_width: usize) -> usize {
        let free = self.width.saturating_sub(content_width);
        match self.style.alignment {
            Alignment::Left => 0,
            Alignment::Center => free / 2,
            Alignment::Right => free,
        }
    }

    /// Draw text, wrapping at the paper edge.  Alignment applies to each
    /// printed line, measured over the characters that land on it.
    fn text(&mut self, text: &str) {
        let chars: Vec<char> = text.chars().collect();
        let cw = self.cell_width();
        let per_line = (self.width / cw).max(1);

        for (i, &ch) in chars.iter().enumerate() {
            if !self.line_empty && self.x + cw > self.width {
                self.newline();
            }
            if self.line_empty {
                let on_line = (chars.len() - i).min(per_line);
                self.x = self.aligned_x(on_line * cw);
                self.line_empty = false;
            }
            self.draw_char(ch);
            self.x += cw;
            self.line_height = self.line_height.max(self.cell_height());
        }
    }

    fn draw_char(&mut self, ch: char) {
        let glyph = self
            .glyphs
            .entry(ch)
            .or_insert_with(|| spleen_glyph(ch))
            .clone();
        let (ws, hs) = (
            self.style.width_scale as usize,
            self.style.height_scale as usize,
        );
        let (cw, chh) = (self.cell_width(), self.cell_height());
        let (x0, y0) = (self.x, self.y);
        let ink = !self.style.inverse;

        if self.style.inverse {
            for y in y0..y0 + chh {
                for x in x0..x0 + cw {
                    self.set(x, y, true);
                }
            }
        }

        // Bold is a double strike one dot to the right.
        let strikes: &[usize] = if self.style.bold { &[0, 1] } else { &[0] };
        for &dx in strikes {
            for gy in 0..GLYPH_HEIGHT {
                for gx in 0..GLYPH_WIDTH {
                    if !glyph[gy * GLYPH_WIDTH + gx] {
                        continue;
                    }
                    for sy in 0..hs {
                        for sx in 0..ws {
                            self.set(x0 + gx * ws + sx + dx, y0 + gy * hs + sy, ink);
                        }
                    }
                }
            }
        }

        if self.style.underline {
            for x in x0..x0 + cw {
                self.set(x, y0 + chh - 2, ink);
                self.set(x, y0 + chh - 1, ink);
            }
        }
    }

    fn barcode(&mut self, spec: &BarcodeSpec) {
        self.end_line();
        let hri = matches!(spec.text_position, TextPosition::Above | TextPosition::Both);
        if hri {
            self.hri_line(&spec.content);
        }

        let height = spec.height.max(1) as usize;
        match modules(spec.format, &spec.content) {
            Some(bars) => {
                let module = spec.width.max(1) as usize;
                let x0 = self.aligned_x(bars.len() * module);
                for (i, _) in bars.iter().enumerate().filter(|(_, bar)| **bar) {
                    for dx in 0..module {
                        for dy in 0..height {
                            self.set(x0 + i * module + dx, self.y + dy, true);
                        }
                    }
                }
            }
            None => {
                debug!(format = ?spec.format, "barcode not encodable, drawing placeholder");
                self.placeholder(self.width.min(200), height);
            }
        }
        self.advance(height);

        if matches!(spec.text_position, TextPosition::Below | TextPosition::Both) {
            self.hri_line(&spec.content);
        }
    }

    /// Human-readable barcode text in the default font size.
    fn hri_line(&mut self, content: &str) {
        let saved = self.style;
        self.style = TextStyle::default().with_alignment(saved.alignment);
        self.text(content);
        self.end_line();
        self.style = saved;
    }

    fn placeholder(&mut self, width: usize, height: usize) {
        let x0 = self.aligned_x(width);
        let y0 = self.y;
        for x in x0..x0 + width {
            self.set(x, y0, true);
            self.set(x, y0 + height - 1, true);
        }
        for y in y0..y0 + height {
            self.set(x0, y, true);
            self.set(x0 + width - 1, y, true);
        }
    }

    fn blit(&mut self, bitmap: &Bitmap) {
        let x0 = self.aligned_x(bitmap.width as usize);
        for y in 0..bitmap.height {
            for x in 0..bitmap.width {
                if bitmap.get(x, y) {
                    self.set(x0 + x as usize, self.y + y as usize, true);
                }
            }
        }
        self.advance(bitmap.height as usize);
    }

    /// Dashed line across the paper: 8 dots on, 8 off.
    fn cut_line(&mut self) {
        let y = self.y + 2;
        for x in (0..self.width).filter(|x| (x / 8) % 2 == 0) {
            self.set(x, y, true);
            self.set(x, y + 1, true);
        }
        self.y = y;
        self.advance(CUT_GAP);
    }
}

/// 12×24 glyph, row-major.  Characters missing from the font draw as a box.
fn spleen_glyph(ch: char) -> Vec<bool> {
    let mut glyph = vec![false; GLYPH_WIDTH * GLYPH_HEIGHT];
    let mut utf8 = [0u8; 4];
    let found = PSF2Font::new(FONT_12X24).ok().and_then(|mut font| {
        let rows = font.glyph_for_utf8(ch.encode_utf8(&mut utf8).as_bytes())?;
        for (y, row) in rows.enumerate().take(GLYPH_HEIGHT) {
            for (x, on) in row.enumerate().take(GLYPH_WIDTH) {
                glyph[y * GLYPH_WIDTH + x] = on;
            }
        }
        Some(())
    });

    if found.is_none() {
        for x in 0..GLYPH_WIDTH {
            glyph[x] = true;
            glyph[(GLYPH_HEIGHT - 1) * GLYPH_WIDTH + x] = true;
        }
        for y in 0..GLYPH_HEIGHT {
            glyph[y * GLYPH_WIDTH] = true;
            glyph[y * GLYPH_WIDTH + GLYPH_WIDTH - 1] = true;
        }
    }
    glyph
}

#[cfg(test)]
mod tests {
    use super::*;
    use bonwerk_core::ops::BarcodeFormat;

    fn config() -> PreviewConfig {
        PreviewConfig::default()
    }

    fn black_in(img: &GrayImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        let mut n = 0;
        for y in ys.clone() {
            for x in xs.clone() {
                if x < img.width() && y < img.height() && img.get_pixel(x, y).0[0] == 0 {
                    n += 1;
                }
            }
        }
        n
    }

    #[test]
    fn canvas_matches_paper_width() {
        let img = render(&[Op::text("A"), Op::LineFeed], &config());
        assert_eq!(img.width(), 384);
        assert_eq!(img.height(), GLYPH_HEIGHT as u32);
        assert!(black_in(&img, 0..12, 0..24) > 0);
    }

    #[test]
    fn empty_document_is_one_blank_row() {
        let img = render(&[], &config());
        assert_eq!((img.width(), img.height()), (384, 1));
        assert_eq!(black_in(&img, 0..384, 0..1), 0);
    }

    #[test]
    fn alignment_moves_text() {
        let right = TextStyle::default().with_alignment(Alignment::Right);
        let img = render(&[Op::Style(right), Op::text("I")], &config());
        assert_eq!(black_in(&img, 0..372, 0..24), 0);
        assert!(black_in(&img, 372..384, 0..24) > 0);
    }

    #[test]
    fn scale_grows_cells() {
        let big = TextStyle::default().with_scale(2, 3);
        let img = render(&[Op::Style(big), Op::text("M"), Op::LineFeed], &config());
        assert_eq!(img.height(), (GLYPH_HEIGHT * 3) as u32);
        assert!(black_in(&img, 12..24, 0..72) > 0);
    }

    #[test]
    fn long_text_wraps() {
        // 384 / 12 = 32 cells per line.
        let text = "X".repeat(40);
        let img = render(&[Op::text(text)], &config());
        assert_eq!(img.height(), (GLYPH_HEIGHT * 2) as u32);
        assert!(black_in(&img, 0..12, 24..48) > 0);
    }

    #[test]
    fn bold_and_inverse_add_ink() {
        let plain = render(&[Op::text("H")], &config());
        let bold = render(
            &[Op::Style(TextStyle::default().with_bold(true)), Op::text("H")],
            &config(),
        );
        let inverse = render(
            &[Op::Style(TextStyle::default().with_inverse(true)), Op::text("H")],
            &config(),
        );
        let ink = |img: &GrayImage| black_in(img, 0..13, 0..24);
        assert!(ink(&bold) > ink(&plain));
        assert!(ink(&inverse) > ink(&bold));
    }

    #[test]
    fn underline_fills_bottom_rows() {
        let img = render(
            &[
                Op::Style(TextStyle::default().with_underline(true)),
                Op::text(" "),
            ],
            &config(),
        );
        assert_eq!(black_in(&img, 0..12, 22..24), 24);
    }

    #[test]
    fn feed_and_cut_advance_paper() {
        let img = render(
            &[Op::Feed(2), Op::Cut { partial: false }, Op::text(".")],
            &config(),
        );
        let cut_row = (GLYPH_HEIGHT * 2 + 2) as u32;
        assert_eq!(black_in(&img, 0..8, cut_row..cut_row + 2), 16);
        assert_eq!(black_in(&img, 8..16, cut_row..cut_row + 2), 0);
    }

    #[test]
    fn barcode_draws_bars_and_text() {
        let spec = BarcodeSpec {
            height: 40,
            width: 2,
            ..BarcodeSpec::new(BarcodeFormat::Code39, "AB12")
        };
        let img = render(&[Op::Barcode(spec)], &config());
        assert_eq!(img.height(), (40 + GLYPH_HEIGHT) as u32);
        assert!(black_in(&img, 0..384, 0..40) > 100);
        assert!(black_in(&img, 0..384, 40..64) > 0);
    }

    #[test]
    fn repeated_feeds_stop_at_the_canvas_cap() {
        let ops = vec![Op::Feed(255); 64];
        let img = render(&ops, &config());
        assert_eq!(img.height(), MAX_CANVAS_ROWS as u32);

        let mut ops = vec![Op::Feed(255); 64];
        ops.push(Op::text("lost"));
        let img = render(&ops, &config());
        assert_eq!(img.height(), MAX_CANVAS_ROWS as u32);
        assert_eq!(black_in(&img, 0..384, 0..MAX_CANVAS_ROWS as u32), 0);
    }

    #[test]
    fn raster_is_blitted() {
        let mut bmp = Bitmap::new(8, 2);
        bmp.set(0, 0, true);
        bmp.set(7, 1, true);
        let img = render(&[Op::Raster(bmp)], &config());
        assert_eq!(img.height(), 2);
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(7, 1).0[0], 0);
        assert_eq!(img.get_pixel(1, 0).0[0], 255);
    }
}
