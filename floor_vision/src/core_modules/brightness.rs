// THEORY:
// `BrightnessFrame` is the single-channel image the detector works on. The IR
// camera delivers colour frames, but only one channel carries the signal: the
// red channel is the one most sensitive to infrared, so every colour conversion
// here keeps red and drops the rest.
//
// This module also owns the brightness band rule (`ThresholdBand`): a pixel is
// foreground iff its brightness lies in `[threshold - range, threshold + range]`.
// Keeping that rule in one place means the detector, the parallel detector and
// the binary debug view can never disagree about what "foreground" means.

use crate::error::{FloorError, Result};
use image::{DynamicImage, GrayImage, Luma, RgbImage, RgbaImage};

const RGBA_CHANNELS: usize = 4;
const RED: usize = 0;

/// The inclusive brightness band `[threshold - range, threshold + range]`,
/// clamped to the byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdBand {
    lower: i32,
    upper: i32,
}

impl ThresholdBand {
    pub fn new(threshold: i32, range: i32) -> Self {
        Self {
            lower: threshold.saturating_sub(range).clamp(0, u8::MAX as i32),
            upper: threshold.saturating_add(range).clamp(0, u8::MAX as i32),
        }
    }

    #[inline]
    pub fn contains(&self, brightness: u8) -> bool {
        let value = brightness as i32;
        value >= self.lower && value <= self.upper
    }

    pub fn lower(&self) -> i32 {
        self.lower
    }

    pub fn upper(&self) -> i32 {
        self.upper
    }
}

/// A row-major, one-byte-per-pixel brightness image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrightnessFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BrightnessFrame {
    /// Wraps a raw brightness buffer, which must hold exactly `width * height` bytes.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FloorError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// A frame where every pixel has the same brightness.
    pub fn filled(width: u32, height: u32, brightness: u8) -> Self {
        Self {
            width,
            height,
            data: vec![brightness; width as usize * height as usize],
        }
    }

    /// Takes the red channel of a packed RGBA buffer.
    pub fn from_rgba_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * RGBA_CHANNELS;
        if bytes.len() != expected {
            return Err(FloorError::BufferLength {
                expected,
                actual: bytes.len(),
            });
        }
        let data = bytes.chunks_exact(RGBA_CHANNELS).map(|px| px[RED]).collect();
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, brightness: u8) {
        let index = self.index(x, y);
        self.data[index] = brightness;
    }

    /// Paints an inclusive rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, min_x: u32, min_y: u32, max_x: u32, max_y: u32, brightness: u8) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        for y in min_y..=max_y.min(self.height - 1) {
            for x in min_x..=max_x.min(self.width - 1) {
                self.set(x, y, brightness);
            }
        }
    }

    /// Counts pixels per brightness level, for tuning the threshold band.
    pub fn histogram(&self) -> [u32; 256] {
        let mut bins = [0u32; 256];
        for &value in &self.data {
            bins[value as usize] += 1;
        }
        bins
    }

    /// A binary view of the frame: 255 where the band accepts the pixel, 0 elsewhere.
    pub fn foreground_mask(&self, band: ThresholdBand) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if band.contains(self.get(x, y)) { 255 } else { 0 }])
        })
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

impl From<&RgbaImage> for BrightnessFrame {
    fn from(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.pixels().map(|px| px.0[RED]).collect(),
        }
    }
}

impl From<&RgbImage> for BrightnessFrame {
    fn from(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.pixels().map(|px| px.0[RED]).collect(),
        }
    }
}

impl From<&GrayImage> for BrightnessFrame {
    fn from(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.as_raw().clone(),
        }
    }
}

impl From<&DynamicImage> for BrightnessFrame {
    fn from(image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Self::from(gray),
            DynamicImage::ImageRgb8(rgb) => Self::from(rgb),
            other => Self::from(&other.to_rgba8()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn band_is_inclusive_and_clamped_to_byte_range() {
        let band = ThresholdBand::new(255, 10);
        assert!(band.contains(255));
        assert!(band.contains(245));
        assert!(!band.contains(244));
        assert_eq!(band.upper(), 255);

        let low = ThresholdBand::new(5, 10);
        assert_eq!(low.lower(), 0);
        assert!(low.contains(0));
        assert!(low.contains(15));
        assert!(!low.contains(16));
    }

    #[test]
    fn extreme_threshold_does_not_overflow() {
        let high = ThresholdBand::new(i32::MAX, 1);
        assert_eq!((high.lower(), high.upper()), (255, 255));
        assert!(high.contains(255));
        assert!(!high.contains(254));

        let low = ThresholdBand::new(i32::MIN, i32::MAX);
        assert_eq!((low.lower(), low.upper()), (0, 0));
    }

    #[test]
    fn rejects_wrong_buffer_length() {
        let err = BrightnessFrame::new(4, 4, vec![0; 15]).unwrap_err();
        assert!(matches!(err, FloorError::BufferLength { expected: 16, actual: 15 }));
        assert!(BrightnessFrame::from_rgba_bytes(2, 2, &[0; 15]).is_err());
    }

    #[test]
    fn rgba_conversion_keeps_red_channel() {
        let bytes = [10, 200, 200, 255, 250, 0, 0, 255];
        let frame = BrightnessFrame::from_rgba_bytes(2, 1, &bytes).expect("valid buffer");
        assert_eq!(frame.as_slice(), &[10, 250]);

        let mut image = RgbaImage::new(2, 2);
        image.put_pixel(1, 1, Rgba([180, 1, 2, 255]));
        let frame = BrightnessFrame::from(&image);
        assert_eq!(frame.get(1, 1), 180);
        assert_eq!(frame.get(0, 0), 0);
    }

    #[test]
    fn histogram_and_mask_agree() {
        let mut frame = BrightnessFrame::filled(8, 6, 0);
        frame.fill_rect(2, 2, 4, 3, 250);
        let bins = frame.histogram();
        assert_eq!(bins[250], 6);
        assert_eq!(bins[0], 42);

        let mask = frame.foreground_mask(ThresholdBand::new(255, 10));
        let lit = mask.pixels().filter(|px| px.0[0] == 255).count();
        assert_eq!(lit, 6);
        assert_eq!(mask.get_pixel(3, 2).0[0], 255);
        assert_eq!(mask.get_pixel(5, 2).0[0], 0);
    }

    #[test]
    fn fill_rect_clips_to_frame() {
        let mut frame = BrightnessFrame::filled(4, 4, 0);
        frame.fill_rect(2, 2, 10, 10, 9);
        assert_eq!(frame.histogram()[9], 4);
    }
}
