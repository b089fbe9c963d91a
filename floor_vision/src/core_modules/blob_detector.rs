// THEORY:
// The `BlobDetector` is the spatial stage of the engine. It turns one brightness
// frame into a list of unidentified `Blob`s using plain connected-component
// labelling:
//
// 1.  **Row-major scan**: every pixel is visited in reading order. The first
//     unvisited foreground pixel becomes the seed of a new region.
// 2.  **Breadth-first flood fill**: from the seed, a FIFO queue collects every
//     foreground pixel reachable through the 8 neighbours. Each pixel is marked
//     visited when it is queued, so it is added to exactly one blob exactly once.
//     The bounding box and mass do not depend on the order pixels come out of
//     the queue.
// 3.  **Size filter**: a finished region is kept only if its mass lies in
//     `[min_mass, max_mass]`, which drops single-pixel sensor noise and
//     whole-floor reflections.
//
// The visited mask and the queue are owned by the detector and reused between
// frames: clearing the mask is the only O(width x height) step besides the scan
// itself, and the fill allocates nothing per pixel.

use crate::config::DetectionConfig;
use crate::core_modules::blob::Blob;
use crate::core_modules::brightness::{BrightnessFrame, ThresholdBand};
use crate::error::{FloorError, Result};
use std::collections::VecDeque;
use std::ops::Range;
use tracing::debug;

/// Finds connected bright regions in a brightness frame of a fixed size.
pub struct BlobDetector {
    width: u32,
    height: u32,
    min_mass: u32,
    max_mass: u32,
    /// One flag per pixel, cleared at the start of every `detect` call.
    visited: Vec<bool>,
    /// Flood fill work list, kept to avoid reallocating every region.
    queue: VecDeque<(u32, u32)>,
}

impl BlobDetector {
    pub fn new(width: u32, height: u32, config: &DetectionConfig) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(FloorError::InvalidConfig(format!(
                "detector dimensions must be non-zero, got {width}x{height}"
            )));
        }
        config.validate()?;
        Ok(Self {
            width,
            height,
            min_mass: config.min_mass,
            max_mass: config.max_mass,
            visited: vec![false; width as usize * height as usize],
            queue: VecDeque::new(),
        })
    }

    /// Detects every region whose brightness lies within `threshold ± range`.
    /// Blobs come back in row-major order of their first pixel, without identities.
    pub fn detect(&mut self, frame: &BrightnessFrame, threshold: i32, range: i32) -> Result<Vec<Blob>> {
        ensure_frame_size(frame, self.width, self.height)?;
        let band = ThresholdBand::new(threshold, range);
        self.visited.fill(false);

        let pixels = frame.as_slice();
        let width = self.width as usize;
        let mut blobs = Vec::new();
        let mut rejected = 0usize;

        for y in 0..self.height {
            for x in 0..self.width {
                let index = y as usize * width + x as usize;
                if self.visited[index] || !band.contains(pixels[index]) {
                    continue;
                }
                let blob = grow_region(
                    frame,
                    band,
                    0..self.height,
                    (x, y),
                    &mut self.visited,
                    &mut self.queue,
                    |_, _| {},
                );
                if blob.is_valid_size(self.min_mass, self.max_mass) {
                    blobs.push(blob);
                } else {
                    rejected += 1;
                }
            }
        }

        debug!(
            "Detected {} blob(s), rejected {} by size [{}, {}]",
            blobs.len(),
            rejected,
            self.min_mass,
            self.max_mass
        );
        Ok(blobs)
    }
}

pub(crate) fn ensure_frame_size(frame: &BrightnessFrame, width: u32, height: u32) -> Result<()> {
    if frame.width() != width || frame.height() != height {
        return Err(FloorError::FrameSize {
            expected_width: width,
            expected_height: height,
            actual_width: frame.width(),
            actual_height: frame.height(),
        });
    }
    Ok(())
}

/// Breadth-first 8-connected fill from `seed`, confined to `rows`.
///
/// `visited` covers only `rows` (index `(y - rows.start) * width + x`). `on_pixel`
/// is called once for every pixel added to the region.
pub(crate) fn grow_region(
    frame: &BrightnessFrame,
    band: ThresholdBand,
    rows: Range<u32>,
    seed: (u32, u32),
    visited: &mut [bool],
    queue: &mut VecDeque<(u32, u32)>,
    mut on_pixel: impl FnMut(u32, u32),
) -> Blob {
    let width = frame.width() as i64;
    let top = rows.start as i64;
    let bottom = rows.end as i64;
    let local = |x: i64, y: i64| ((y - top) * width + x) as usize;

    let mut blob = Blob::new();
    queue.clear();
    queue.push_back(seed);
    visited[local(seed.0 as i64, seed.1 as i64)] = true;

    while let Some((x, y)) = queue.pop_front() {
        blob.add_pixel(x, y);
        on_pixel(x, y);

        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || nx >= width || ny < top || ny >= bottom {
                    continue;
                }
                let index = local(nx, ny);
                if !visited[index] && band.contains(frame.get(nx as u32, ny as u32)) {
                    visited[index] = true;
                    queue.push_back((nx as u32, ny as u32));
                }
            }
        }
    }

    blob
}
