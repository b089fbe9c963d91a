// Debug output: PNG writers and a blob overlay for eyeballing detection results.

use crate::core_modules::blob::Blob;
use crate::core_modules::brightness::{BrightnessFrame, ThresholdBand};
use crate::error::Result;
use image::{ExtendedColorType, GrayImage, ImageEncoder, Rgb, RgbImage};
use std::path::Path;

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const FOREGROUND: Rgb<u8> = Rgb([90, 90, 90]);
const BOX: Rgb<u8> = Rgb([0, 255, 0]);
const CENTER: Rgb<u8> = Rgb([255, 0, 0]);
const CROSS_ARM: i64 = 4;

pub fn save_gray(path: impl AsRef<Path>, image: &GrayImage) -> Result<()> {
    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(output);
    encoder.write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::L8)?;
    Ok(())
}

pub fn save_rgb(path: impl AsRef<Path>, image: &RgbImage) -> Result<()> {
    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(output);
    encoder.write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)?;
    Ok(())
}

/// Draws the binary foreground view with each blob's box (green) and centre (red).
pub fn render_overlay(frame: &BrightnessFrame, band: ThresholdBand, blobs: &[Blob]) -> RgbImage {
    let mut canvas = RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        if band.contains(frame.get(x, y)) { FOREGROUND } else { BACKGROUND }
    });

    for blob in blobs.iter().filter(|b| !b.bounds.is_empty()) {
        let bounds = blob.bounds;
        for x in bounds.min_x..=bounds.max_x {
            put(&mut canvas, x as i64, bounds.min_y as i64, BOX);
            put(&mut canvas, x as i64, bounds.max_y as i64, BOX);
        }
        for y in bounds.min_y..=bounds.max_y {
            put(&mut canvas, bounds.min_x as i64, y as i64, BOX);
            put(&mut canvas, bounds.max_x as i64, y as i64, BOX);
        }

        let cx = blob.center.0.round() as i64;
        let cy = blob.center.1.round() as i64;
        for offset in -CROSS_ARM..=CROSS_ARM {
            put(&mut canvas, cx + offset, cy, CENTER);
            put(&mut canvas, cx, cy + offset, CENTER);
        }
    }
    canvas
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_marks_box_and_center() {
        let mut frame = BrightnessFrame::filled(40, 30, 0);
        frame.fill_rect(10, 10, 20, 18, 250);
        let blob = Blob::filled_rect(10, 10, 20, 18);
        let overlay = render_overlay(&frame, ThresholdBand::new(255, 10), &[blob]);

        assert_eq!(*overlay.get_pixel(10, 10), BOX);
        assert_eq!(*overlay.get_pixel(20, 14), BOX);
        assert_eq!(*overlay.get_pixel(15, 14), CENTER);
        assert_eq!(*overlay.get_pixel(12, 12), FOREGROUND);
        assert_eq!(*overlay.get_pixel(2, 2), BACKGROUND);
    }

    #[test]
    fn cross_is_clipped_at_the_border() {
        let frame = BrightnessFrame::filled(6, 6, 0);
        let blob = Blob::filled_rect(0, 0, 1, 1);
        let overlay = render_overlay(&frame, ThresholdBand::new(255, 0), &[blob]);
        assert_eq!(overlay.dimensions(), (6, 6));
    }

    #[test]
    fn writes_png_files() {
        let dir = std::env::temp_dir().join(format!("floor_png_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");

        let mut frame = BrightnessFrame::filled(16, 16, 0);
        frame.fill_rect(4, 4, 8, 8, 255);
        let band = ThresholdBand::new(255, 0);
        let mask_path = dir.join("mask.png");
        let overlay_path = dir.join("overlay.png");

        save_gray(&mask_path, &frame.foreground_mask(band)).expect("save mask");
        save_rgb(&overlay_path, &render_overlay(&frame, band, &[])).expect("save overlay");

        let reloaded = image::open(&mask_path).expect("reload mask").to_luma8();
        assert_eq!(reloaded.get_pixel(6, 6).0[0], 255);
        assert_eq!(reloaded.get_pixel(0, 0).0[0], 0);
        assert!(overlay_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
