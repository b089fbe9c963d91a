// THEORY:
// The `Blob` is the snapshot of one connected bright region in one frame. It is a
// "dumb" data container: the detector grows it pixel by pixel during a flood fill,
// and after that only the tracker touches it, to stamp an identity and a
// confirmation time.
//
// Key properties:
// 1.  **Bounding-box centre**: `center` is the midpoint of the bounding box, not the
//     average of pixel coordinates. For an L-shaped region the two differ; the
//     midpoint is what downstream effects are calibrated against.
// 2.  **Empty until grown**: a fresh blob has an inverted, empty box (`min > max`)
//     and zero mass. Anything the detector returns has `mass > 0`.
// 3.  **Shape signature**: mass and fill ratio (mass over box area) are the cheap
//     shape features the tracker uses to reject implausible matches.

use std::time::Instant;

/// An axis-aligned pixel bounding box with inclusive corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Bounds {
    /// The inverted box that any first pixel collapses onto.
    pub const EMPTY: Bounds = Bounds {
        min_x: u32::MAX,
        min_y: u32::MAX,
        max_x: 0,
        max_y: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    fn union(&mut self, other: &Bounds) {
        if other.is_empty() {
            return;
        }
        self.include(other.min_x, other.min_y);
        self.include(other.max_x, other.max_y);
    }

    fn midpoint(&self) -> (f64, f64) {
        (
            (self.min_x as f64 + self.max_x as f64) / 2.0,
            (self.min_y as f64 + self.max_y as f64) / 2.0,
        )
    }
}

/// A connected region of foreground pixels detected in a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    /// Number of pixels in the region.
    pub mass: u32,
    /// Smallest box containing every pixel of the region.
    pub bounds: Bounds,
    /// Midpoint of `bounds`.
    pub center: (f64, f64),
    /// Stable identity, assigned by the tracker. `None` straight out of the detector.
    pub identity: Option<u64>,
    /// When the tracker last confirmed this identity.
    pub last_seen: Option<Instant>,
}

impl Default for Blob {
    fn default() -> Self {
        Self::new()
    }
}

impl Blob {
    /// An empty blob, ready to be grown with `add_pixel`.
    pub fn new() -> Self {
        Self {
            mass: 0,
            bounds: Bounds::EMPTY,
            center: (0.0, 0.0),
            identity: None,
            last_seen: None,
        }
    }

    /// A solid rectangle with inclusive corners. Handy for synthetic detections.
    pub fn filled_rect(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        let mut blob = Self::new();
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                blob.add_pixel(x, y);
            }
        }
        blob
    }

    pub fn add_pixel(&mut self, x: u32, y: u32) {
        self.mass += 1;
        self.bounds.include(x, y);
        self.center = self.bounds.midpoint();
    }

    /// Folds another fragment of the same region into this one.
    pub(crate) fn absorb(&mut self, other: &Blob) {
        self.mass += other.mass;
        self.bounds.union(&other.bounds);
        self.center = self.bounds.midpoint();
    }

    pub fn is_valid_size(&self, min_mass: u32, max_mass: u32) -> bool {
        self.mass >= min_mass && self.mass <= max_mass
    }

    /// Horizontal extent `max_x - min_x`; zero for a single column.
    pub fn width(&self) -> u32 {
        if self.bounds.is_empty() {
            return 0;
        }
        self.bounds.max_x - self.bounds.min_x
    }

    /// Vertical extent `max_y - min_y`; zero for a single row.
    pub fn height(&self) -> u32 {
        if self.bounds.is_empty() {
            return 0;
        }
        self.bounds.max_y - self.bounds.min_y
    }

    /// Mass over bounding-box area, or 0.0 for a degenerate (zero-area) box.
    pub fn area_ratio(&self) -> f64 {
        let area = self.width() as u64 * self.height() as u64;
        if area == 0 {
            return 0.0;
        }
        self.mass as f64 / area as f64
    }

    pub fn distance_to(&self, other: &Blob) -> f64 {
        let dx = self.center.0 - other.center.0;
        let dy = self.center.1 - other.center.1;
        (dx * dx + dy * dy).sqrt()
    }
}
