// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversions between grayscale images and 1-bpp printer bitmaps.
//
// Plain thresholding only; dithering is left to whoever prepares the image.

use bonwerk_core::ops::{Bitmap, Op};
use image::imageops::FilterType;
use image::{GrayImage, Luma};

/// Luma values at or below this print as black.
pub const DEFAULT_THRESHOLD: u8 = 127;

/// Pack a grayscale image into a bitmap: `luma <= threshold` becomes a dot.
pub fn bitmap_from_gray(img: &GrayImage, threshold: u8) -> Bitmap {
    let mut bitmap = Bitmap::new(img.width(), img.height());
    for (x, y, Luma([luma])) in img.enumerate_pixels() {
        if *luma <= threshold {
            bitmap.set(x, y, true);
        }
    }
    bitmap
}

/// Unpack a bitmap into black-on-white grayscale.
pub fn gray_from_bitmap(bitmap: &Bitmap) -> GrayImage {
    GrayImage::from_fn(bitmap.width, bitmap.height, |x, y| {
        if bitmap.get(x, y) { Luma([0]) } else { Luma([255]) }
    })
}

/// Scale `img` down to at most `max_width` dots (aspect kept), threshold it
/// and wrap it in a raster operation.  Narrower images are left as they are.
pub fn raster_op(img: &GrayImage, max_width: u32, threshold: u8) -> Op {
    if img.width() > max_width && max_width > 0 {
        let height = ((img.height() as u64 * max_width as u64) / img.width() as u64).max(1) as u32;
        let scaled = image::imageops::resize(img, max_width, height, FilterType::Triangle);
        Op::Raster(bitmap_from_gray(&scaled, threshold))
    } else {
        Op::Raster(bitmap_from_gray(img, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_packs_msb_first() {
        let mut img = GrayImage::from_pixel(10, 2, Luma([255]));
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(9, 1, Luma([127]));
        img.put_pixel(1, 0, Luma([128]));

        let bmp = bitmap_from_gray(&img, DEFAULT_THRESHOLD);
        assert_eq!(bmp.row_bytes(), 2);
        assert_eq!(bmp.data[0], 0x80);
        assert!(bmp.get(9, 1));
        assert!(!bmp.get(1, 0));
    }

    #[test]
    fn gray_round_trip_preserves_dots() {
        let mut bmp = Bitmap::new(9, 3);
        bmp.set(4, 1, true);
        bmp.set(8, 2, true);
        let back = bitmap_from_gray(&gray_from_bitmap(&bmp), DEFAULT_THRESHOLD);
        assert_eq!(back, bmp);
    }

    #[test]
    fn wide_images_are_scaled_to_paper() {
        let img = GrayImage::from_pixel(800, 100, Luma([0]));
        match raster_op(&img, 384, DEFAULT_THRESHOLD) {
            Op::Raster(bmp) => {
                assert_eq!(bmp.width, 384);
                assert_eq!(bmp.height, 48);
                assert!(bmp.get(200, 20));
            }
            other => panic!("expected raster, got {other:?}"),
        }
    }
}
