// THEORY:
// The `BandedDetector` is the parallel twin of `BlobDetector`. The pixel scan is
// embarrassingly parallel across rows, but a flood fill is not: one region can
// cross any row. So the frame is cut into horizontal bands and each band is
// labelled independently on a blocking worker, with the fill confined to the
// band's rows. A region that crosses a band boundary comes back as several
// fragments.
//
// Stitching happens afterwards on the calling task. For every pair of adjacent
// bands, each labelled pixel on the bottom row of the upper band is joined
// (union-find) with the labelled 8-neighbours on the top row of the lower band.
// Fragments that end up under one root are folded into one blob; mass adds up
// and bounding boxes union, so the centre is still the box midpoint. The size
// filter runs only after stitching, because a fragment may be too small on its
// own while the whole region is valid.
//
// Output is identical to the sequential detector, order included: fragments are
// numbered in row-major seed order band after band, so the smallest fragment
// number in a region is the fragment holding the region's first pixel.

use crate::config::DetectionConfig;
use crate::core_modules::blob::Blob;
use crate::core_modules::blob_detector::{ensure_frame_size, grow_region};
use crate::core_modules::brightness::{BrightnessFrame, ThresholdBand};
use crate::error::{FloorError, Result};
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

const NO_LABEL: u32 = u32::MAX;

/// Labels of one band's boundary rows plus the fragments found inside it.
struct BandScan {
    fragments: Vec<Blob>,
    top_labels: Vec<u32>,
    bottom_labels: Vec<u32>,
}

/// Detects blobs by scanning row bands on tokio's blocking pool.
pub struct BandedDetector {
    width: u32,
    height: u32,
    min_mass: u32,
    max_mass: u32,
    bands: usize,
}

impl BandedDetector {
    pub fn new(width: u32, height: u32, config: &DetectionConfig) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(FloorError::InvalidConfig(format!(
                "detector dimensions must be non-zero, got {width}x{height}"
            )));
        }
        config.validate()?;
        let bands = config.bands.unwrap_or_else(num_cpus::get).clamp(1, height as usize);
        Ok(Self {
            width,
            height,
            min_mass: config.min_mass,
            max_mass: config.max_mass,
            bands,
        })
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Same contract as `BlobDetector::detect`.
    pub async fn detect(&self, frame: Arc<BrightnessFrame>, threshold: i32, range: i32) -> Result<Vec<Blob>> {
        ensure_frame_size(&frame, self.width, self.height)?;
        let band = ThresholdBand::new(threshold, range);

        let workers = band_ranges(self.height, self.bands).into_iter().map(|rows| {
            let frame = Arc::clone(&frame);
            tokio::task::spawn_blocking(move || scan_band(&frame, band, rows))
        });
        let scans = futures::future::try_join_all(workers).await?;

        let fragment_count: usize = scans.iter().map(|scan| scan.fragments.len()).sum();
        let blobs = stitch(scans, self.width as usize, self.min_mass, self.max_mass);
        debug!(
            "Banded detection over {} band(s): {} fragment(s) stitched into {} blob(s)",
            self.bands,
            fragment_count,
            blobs.len()
        );
        Ok(blobs)
    }
}

/// Splits `0..height` into `bands` contiguous ranges whose sizes differ by at most one.
pub fn band_ranges(height: u32, bands: usize) -> Vec<Range<u32>> {
    let bands = (bands.max(1) as u32).min(height.max(1));
    let base = height / bands;
    let extra = height % bands;
    let mut start = 0;
    (0..bands)
        .map(|i| {
            let rows = base + u32::from(i < extra);
            let range = start..start + rows;
            start += rows;
            range
        })
        .collect()
}

fn scan_band(frame: &BrightnessFrame, band: ThresholdBand, rows: Range<u32>) -> BandScan {
    let width = frame.width() as usize;
    let band_rows = (rows.end - rows.start) as usize;
    let mut visited = vec![false; width * band_rows];
    let mut labels = vec![NO_LABEL; width * band_rows];
    let mut queue = VecDeque::new();
    let mut fragments = Vec::new();
    let top = rows.start;

    for y in rows.clone() {
        for x in 0..frame.width() {
            let local = (y - top) as usize * width + x as usize;
            if visited[local] || !band.contains(frame.get(x, y)) {
                continue;
            }
            let label = fragments.len() as u32;
            let fragment = grow_region(frame, band, rows.clone(), (x, y), &mut visited, &mut queue, |px, py| {
                labels[(py - top) as usize * width + px as usize] = label;
            });
            fragments.push(fragment);
        }
    }

    let top_labels = labels[..width].to_vec();
    let bottom_labels = labels[(band_rows - 1) * width..].to_vec();
    BandScan {
        fragments,
        top_labels,
        bottom_labels,
    }
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let root_a = find(parent, a);
    let root_b = find(parent, b);
    if root_a != root_b {
        // The lower fragment number stays the root.
        let (keep, merge) = if root_a < root_b { (root_a, root_b) } else { (root_b, root_a) };
        parent[merge] = keep;
    }
}

fn stitch(scans: Vec<BandScan>, width: usize, min_mass: u32, max_mass: u32) -> Vec<Blob> {
    let mut offsets = Vec::with_capacity(scans.len());
    let mut total = 0usize;
    for scan in &scans {
        offsets.push(total);
        total += scan.fragments.len();
    }

    let mut parent: Vec<usize> = (0..total).collect();
    for (i, pair) in scans.windows(2).enumerate() {
        let (upper, lower) = (&pair[0], &pair[1]);
        for x in 0..width {
            let above = upper.bottom_labels[x];
            if above == NO_LABEL {
                continue;
            }
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                let below = lower.top_labels[nx];
                if below != NO_LABEL {
                    union(
                        &mut parent,
                        offsets[i] + above as usize,
                        offsets[i + 1] + below as usize,
                    );
                }
            }
        }
    }

    let mut merged: Vec<Option<Blob>> = vec![None; total];
    let mut order = Vec::new();
    for (global, fragment) in scans.iter().flat_map(|scan| scan.fragments.iter()).enumerate() {
        let root = find(&mut parent, global);
        match &mut merged[root] {
            Some(region) => region.absorb(fragment),
            slot => {
                *slot = Some(*fragment);
                order.push(root);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|root| merged[root])
        .filter(|blob| blob.is_valid_size(min_mass, max_mass))
        .collect()
}
