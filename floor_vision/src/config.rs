// THEORY:
// Every tunable of the engine lives here, grouped by the stage that consumes it.
// The whole tree is supplied once at construction and never reconfigured live.
// Each group knows how to validate itself; a component that receives a group
// validates it in its constructor, so a bad value is fatal before the first tick.
//
// Defaults reproduce the values the floor installation shipped with. Speeds are
// in pixels per second and accelerations in pixels per second squared because the
// motion classifier divides displacements by wall-clock time.

use crate::error::{FloorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Brightness segmentation and blob size filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Centre of the accepted brightness band.
    pub threshold: i32,
    /// Half-width of the accepted brightness band.
    pub range: i32,
    /// Smallest blob (in pixels) that is reported. Rejects sensor noise.
    pub min_mass: u32,
    /// Largest blob (in pixels) that is reported. Rejects whole-frame flares.
    pub max_mass: u32,
    /// Number of row bands for the parallel detector. `None` uses one band per CPU.
    pub bands: Option<usize>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 200,
            range: 20,
            min_mass: 100,
            max_mass: 5000,
            bands: None,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0..=255).contains(&self.threshold) {
            return Err(invalid(format!("threshold must be in 0..=255, got {}", self.threshold)));
        }
        if !(0..=255).contains(&self.range) {
            return Err(invalid(format!("range must be in 0..=255, got {}", self.range)));
        }
        if self.min_mass == 0 {
            return Err(invalid("min_mass must be at least 1".to_string()));
        }
        if self.min_mass > self.max_mass {
            return Err(invalid(format!(
                "min_mass ({}) exceeds max_mass ({})",
                self.min_mass, self.max_mass
            )));
        }
        if self.bands == Some(0) {
            return Err(invalid("bands must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Identity matching between consecutive ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Hard cap on centre distance (pixels) for a detection to inherit an identity.
    pub max_matching_distance: f64,
    /// Allowed relative mass difference; 0.3 accepts a larger/smaller ratio up to 1.3.
    pub mass_ratio_tolerance: f64,
    /// Allowed absolute difference of fill ratio (mass / bounding-box area).
    pub area_ratio_tolerance: f64,
    /// How long an identity may go unconfirmed before it is evicted.
    pub staleness_timeout_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_matching_distance: 50.0,
            mass_ratio_tolerance: 0.3,
            area_ratio_tolerance: 0.2,
            staleness_timeout_ms: 500,
        }
    }
}

impl TrackingConfig {
    pub fn staleness_timeout(&self) -> Duration {
        Duration::from_millis(self.staleness_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.max_matching_distance.is_finite() || self.max_matching_distance <= 0.0 {
            return Err(invalid(format!(
                "max_matching_distance must be positive, got {}",
                self.max_matching_distance
            )));
        }
        for (name, value) in [
            ("mass_ratio_tolerance", self.mass_ratio_tolerance),
            ("area_ratio_tolerance", self.area_ratio_tolerance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{name} must lie in [0, 1], got {value}")));
            }
        }
        if self.staleness_timeout_ms == 0 {
            return Err(invalid("staleness_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Thresholds and smoothing for per-player movement classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Below this smoothed speed a player is `Static`.
    pub stationary_speed: f64,
    /// Below this smoothed speed a moving player is `Walking`, above it `Running`.
    pub walk_speed: f64,
    /// Upward displacement (pixels, one sample) that counts as a jump.
    pub jump_rise: f64,
    /// Smoothed acceleration magnitude above which a non-circular path is `Erratic`.
    pub erratic_acceleration: f64,
    /// Number of positions kept for path-shape classification.
    pub history_capacity: usize,
    /// Weight of the newest raw velocity when blending into the smoothed velocity.
    pub velocity_blend: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            stationary_speed: 0.5,
            walk_speed: 2.0,
            jump_rise: 15.0,
            erratic_acceleration: 10.0,
            history_capacity: 10,
            velocity_blend: 0.3,
        }
    }
}

impl MotionConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("stationary_speed", self.stationary_speed),
            ("walk_speed", self.walk_speed),
            ("jump_rise", self.jump_rise),
            ("erratic_acceleration", self.erratic_acceleration),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if self.stationary_speed >= self.walk_speed {
            return Err(invalid(format!(
                "stationary_speed ({}) must be below walk_speed ({})",
                self.stationary_speed, self.walk_speed
            )));
        }
        // Two displacement vectors are the minimum for a turning angle.
        if self.history_capacity < 3 {
            return Err(invalid(format!(
                "history_capacity must be at least 3, got {}",
                self.history_capacity
            )));
        }
        if !(self.velocity_blend > 0.0 && self.velocity_blend <= 1.0) {
            return Err(invalid(format!(
                "velocity_blend must lie in (0, 1], got {}",
                self.velocity_blend
            )));
        }
        Ok(())
    }
}

/// The complete configuration tree for a `FloorPipeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloorConfig {
    pub image_width: u32,
    pub image_height: u32,
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    pub motion: MotionConfig,
    /// Two players whose centres are closer than this are reported as colliding.
    pub collision_radius: f64,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            image_width: 640,
            image_height: 480,
            detection: DetectionConfig::default(),
            tracking: TrackingConfig::default(),
            motion: MotionConfig::default(),
            collision_radius: 30.0,
        }
    }
}

impl FloorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(invalid(format!(
                "image dimensions must be non-zero, got {}x{}",
                self.image_width, self.image_height
            )));
        }
        if !self.collision_radius.is_finite() || self.collision_radius < 0.0 {
            return Err(invalid(format!(
                "collision_radius must be >= 0, got {}",
                self.collision_radius
            )));
        }
        self.detection.validate()?;
        self.tracking.validate()?;
        self.motion.validate()
    }

    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FloorConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(message: String) -> FloorError {
    FloorError::InvalidConfig(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        FloorConfig::default().validate().expect("default config must validate");
    }

    #[test]
    fn rejects_inverted_mass_band() {
        let mut config = FloorConfig::default();
        config.detection.min_mass = 600;
        config.detection.max_mass = 500;
        assert!(matches!(config.validate(), Err(FloorError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_threshold_outside_byte_range() {
        let mut config = FloorConfig::default();
        config.detection.threshold = i32::MAX;
        config.detection.range = 1;
        assert!(matches!(config.validate(), Err(FloorError::InvalidConfig(_))));

        let mut config = FloorConfig::default();
        config.detection.threshold = -1;
        assert!(config.validate().is_err());

        let mut config = FloorConfig::default();
        config.detection.range = 256;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_dimensions() {
        let config = FloorConfig {
            image_width: 0,
            ..FloorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_short_history_and_bad_blend() {
        let mut config = FloorConfig::default();
        config.motion.history_capacity = 2;
        assert!(config.validate().is_err());

        let mut config = FloorConfig::default();
        config.motion.velocity_blend = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "image_width": 100, "image_height": 80, "detection": { "threshold": 255, "range": 10 } }"#;
        let config: FloorConfig = serde_json::from_str(json).expect("valid json");
        assert_eq!(config.image_width, 100);
        assert_eq!(config.detection.threshold, 255);
        assert_eq!(config.detection.min_mass, 100);
        assert_eq!(config.tracking, TrackingConfig::default());
        config.validate().expect("merged config must validate");
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!("floor_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "tracking": { "staleness_timeout_ms": 250 } }"#).expect("write config");
        let config = FloorConfig::from_json_file(&path).expect("load config");
        assert_eq!(config.tracking.staleness_timeout(), Duration::from_millis(250));
        let _ = std::fs::remove_file(&path);
    }
}
