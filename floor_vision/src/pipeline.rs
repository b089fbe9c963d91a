// THEORY:
// The `pipeline` module is the top-level, synchronous API of the engine. One call
// to `FloorPipeline::tick` runs the whole chain for one frame:
//
//   brightness frame -> BlobDetector -> Tracker -> MotionClassifier -> TickReport
//
// It owns every piece of cross-tick state (the tracker's identity table and one
// motion record per identity) and takes `&mut self`, so two ticks can never
// overlap. A tick without a frame is not an error: detection is skipped, nobody
// is matched or born, and identities only age towards their staleness timeout.
//
// State transitions coming out of the classifier are collected during the tick
// and fanned out to the registered listeners once the classifier update is
// complete, still inside the same tick.

use crate::config::FloorConfig;
use crate::core_modules::blob::Blob;
use crate::core_modules::blob_detector::BlobDetector;
use crate::core_modules::brightness::{BrightnessFrame, ThresholdBand};
use crate::core_modules::motion::{MotionClassifier, MotionRecord, StateChange, StateListener};
use crate::core_modules::tracker::Tracker;
use crate::error::Result;
use std::time::Instant;
use tracing::debug;

// Re-export key data structures for the public API.
pub use crate::core_modules::motion::{MotionShape, PlayerState};

/// What the rendering and sound layers need to know about one player this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub identity: u64,
    pub position: (f64, f64),
    pub velocity: (f64, f64),
    pub speed: f64,
    pub state: PlayerState,
    pub shape: MotionShape,
    /// The blob currently carrying this identity.
    pub blob: Blob,
}

impl PlayerSnapshot {
    fn new(record: &MotionRecord, blob: Blob) -> Self {
        Self {
            identity: record.identity(),
            position: record.position(),
            velocity: record.velocity(),
            speed: record.speed(),
            state: record.state(),
            shape: record.shape(),
            blob,
        }
    }
}

/// The output of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// 1-based tick counter.
    pub tick: u64,
    /// No frame was available; detection was skipped.
    pub frame_missing: bool,
    /// Number of blobs the detector produced.
    pub detections: usize,
    /// Every tracked player, ordered by identity.
    pub players: Vec<PlayerSnapshot>,
    /// Identities created this tick.
    pub born: Vec<u64>,
    /// Identities evicted this tick.
    pub lost: Vec<u64>,
    pub state_changes: Vec<StateChange>,
    /// Pairs of identities closer than the configured collision radius.
    pub collisions: Vec<(u64, u64)>,
}

impl TickReport {
    pub fn player(&self, identity: u64) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|p| p.identity == identity)
    }
}

/// Detector, tracker and motion classifier, driven one tick at a time.
pub struct FloorPipeline {
    config: FloorConfig,
    detector: BlobDetector,
    tracker: Tracker,
    classifier: MotionClassifier,
    listeners: Vec<Box<dyn StateListener + Send>>,
    tick_count: u64,
}

impl FloorPipeline {
    pub fn new(config: FloorConfig) -> Result<Self> {
        config.validate()?;
        let detector = BlobDetector::new(config.image_width, config.image_height, &config.detection)?;
        let tracker = Tracker::new(config.tracking.clone())?;
        let classifier = MotionClassifier::new(config.motion.clone())?;
        Ok(Self {
            config,
            detector,
            tracker,
            classifier,
            listeners: Vec::new(),
            tick_count: 0,
        })
    }

    /// Registers a listener for movement-state transitions.
    pub fn add_listener(&mut self, listener: impl StateListener + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Runs one tick. `None` means the frame source had nothing this tick.
    pub fn tick(&mut self, frame: Option<&BrightnessFrame>, now: Instant) -> Result<TickReport> {
        let detected = match frame {
            Some(frame) => Some(self.detector.detect(
                frame,
                self.config.detection.threshold,
                self.config.detection.range,
            )?),
            None => None,
        };
        Ok(self.advance(detected, now))
    }

    /// Everything after detection. `None` marks a tick without a frame.
    pub(crate) fn advance(&mut self, detected: Option<Vec<Blob>>, now: Instant) -> TickReport {
        self.tick_count += 1;
        let frame_missing = detected.is_none();
        let detections = detected.as_ref().map_or(0, Vec::len);

        let tracked = self.tracker.update(detected.unwrap_or_default(), now);
        let lost = self.tracker.evicted_last_update().to_vec();
        let born = self.tracker.born_last_update().to_vec();
        for identity in &lost {
            self.classifier.forget(*identity);
        }

        let mut state_changes = Vec::new();
        let mut players = Vec::with_capacity(tracked.len());
        for blob in tracked {
            let Some(identity) = blob.identity else {
                continue;
            };
            // Only blobs confirmed this tick carry a fresh position; carried ones coast.
            if blob.last_seen == Some(now) {
                let observation = self.classifier.observe(identity, blob.center.0, blob.center.1, now);
                state_changes.extend(observation.change);
            }
            if let Some(record) = self.classifier.get(identity) {
                players.push(PlayerSnapshot::new(record, blob));
            }
        }

        for change in &state_changes {
            for listener in &mut self.listeners {
                listener.on_state_change(change);
            }
        }

        let collisions = self.colliding_pairs();
        debug!(
            "Tick {}: {} detection(s), {} player(s), {} born, {} lost, {} state change(s)",
            self.tick_count,
            detections,
            players.len(),
            born.len(),
            lost.len(),
            state_changes.len()
        );

        TickReport {
            tick: self.tick_count,
            frame_missing,
            detections,
            players,
            born,
            lost,
            state_changes,
            collisions,
        }
    }

    /// Every pair of tracked players closer than the collision radius.
    pub fn colliding_pairs(&self) -> Vec<(u64, u64)> {
        let records: Vec<&MotionRecord> = self.classifier.records().collect();
        let radius = self.config.collision_radius;
        let mut pairs = Vec::new();
        for (i, a) in records.iter().enumerate() {
            for b in &records[i + 1..] {
                if a.is_colliding(b, radius) {
                    pairs.push((a.identity(), b.identity()));
                }
            }
        }
        pairs
    }

    /// Forgets every player. Identities issued so far are still never reused.
    pub fn reset(&mut self) {
        self.tracker.reset();
        let identities: Vec<u64> = self.classifier.records().map(|r| r.identity()).collect();
        for identity in identities {
            self.classifier.forget(identity);
        }
    }

    pub fn band(&self) -> ThresholdBand {
        ThresholdBand::new(self.config.detection.threshold, self.config.detection.range)
    }

    pub fn config(&self) -> &FloorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn classifier(&self) -> &MotionClassifier {
        &self.classifier
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn config() -> FloorConfig {
        FloorConfig {
            image_width: 200,
            image_height: 150,
            detection: DetectionConfig {
                threshold: 255,
                range: 10,
                min_mass: 50,
                max_mass: 500,
                bands: Some(2),
            },
            ..FloorConfig::default()
        }
    }

    fn frame_with_squares(corners: &[(u32, u32)]) -> BrightnessFrame {
        let mut frame = BrightnessFrame::filled(200, 150, 0);
        for &(x, y) in corners {
            frame.fill_rect(x, y, x + 9, y + 9, 255);
        }
        frame
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn walking_player_keeps_identity() {
        let mut pipeline = FloorPipeline::new(config()).expect("valid config");
        let t0 = Instant::now();
        let mut identities = Vec::new();
        for tick in 0..8u32 {
            let frame = frame_with_squares(&[(20 + 4 * tick, 60)]);
            let report = pipeline.tick(Some(&frame), t0 + ms(33 * tick as u64)).expect("tick");
            assert_eq!(report.players.len(), 1);
            identities.push(report.players[0].identity);
        }
        assert!(identities.iter().all(|&id| id == 0));
        assert_eq!(pipeline.tick_count(), 8);
    }

    #[test]
    fn missing_frame_preserves_players_until_timeout() {
        let mut pipeline = FloorPipeline::new(config()).expect("valid config");
        let t0 = Instant::now();
        let frame = frame_with_squares(&[(50, 50)]);
        let first = pipeline.tick(Some(&frame), t0).expect("tick");
        assert_eq!(first.born, vec![0]);

        let missing = pipeline.tick(None, t0 + ms(200)).expect("tick");
        assert!(missing.frame_missing);
        assert_eq!(missing.players.len(), 1);
        assert!(missing.lost.is_empty());
        assert_eq!(missing.players[0].blob.last_seen, Some(t0));

        let expired = pipeline.tick(None, t0 + ms(501)).expect("tick");
        assert!(expired.players.is_empty());
        assert_eq!(expired.lost, vec![0]);
        assert!(pipeline.classifier().is_empty());
    }

    #[test]
    fn listeners_hear_state_changes_in_the_same_tick() {
        let mut pipeline = FloorPipeline::new(config()).expect("valid config");
        let heard = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&heard);
        pipeline.add_listener(move |change: &StateChange| {
            if let Ok(mut heard) = sink.lock() {
                heard.push((change.identity, change.to));
            }
        });

        let t0 = Instant::now();
        pipeline.tick(Some(&frame_with_squares(&[(100, 100)])), t0).expect("tick");
        // Jump 30 px up while moving sideways.
        let report = pipeline
            .tick(Some(&frame_with_squares(&[(110, 70)])), t0 + ms(100))
            .expect("tick");

        assert_eq!(report.state_changes.len(), 1);
        assert_eq!(report.player(0).map(|p| p.state), Some(PlayerState::Airborne));
        let heard = heard.lock().expect("listener mutex");
        assert_eq!(heard.as_slice(), &[(0, PlayerState::Airborne)]);
    }

    #[test]
    fn reports_collisions_and_births() {
        let mut pipeline = FloorPipeline::new(config()).expect("valid config");
        let t0 = Instant::now();
        let report = pipeline
            .tick(Some(&frame_with_squares(&[(20, 20), (40, 20), (150, 120)])), t0)
            .expect("tick");
        assert_eq!(report.detections, 3);
        assert_eq!(report.born, vec![0, 1, 2]);
        assert_eq!(report.collisions, vec![(0, 1)]);
    }

    #[test]
    fn reset_keeps_identity_counter() {
        let mut pipeline = FloorPipeline::new(config()).expect("valid config");
        let t0 = Instant::now();
        pipeline.tick(Some(&frame_with_squares(&[(20, 20)])), t0).expect("tick");
        pipeline.reset();
        assert!(pipeline.tracker().is_empty());
        let report = pipeline
            .tick(Some(&frame_with_squares(&[(20, 20)])), t0 + ms(33))
            .expect("tick");
        assert_eq!(report.born, vec![1]);
    }

    #[test]
    fn wrong_frame_size_is_an_error() {
        let mut pipeline = FloorPipeline::new(config()).expect("valid config");
        let frame = BrightnessFrame::filled(10, 10, 0);
        assert!(pipeline.tick(Some(&frame), Instant::now()).is_err());
        assert_eq!(pipeline.tick_count(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config();
        bad.tracking.max_matching_distance = -1.0;
        assert!(FloorPipeline::new(bad).is_err());

        let mut overflowing = config();
        overflowing.detection.threshold = i32::MAX;
        overflowing.detection.range = 1;
        assert!(FloorPipeline::new(overflowing).is_err());
    }

    #[test]
    fn band_follows_detection_config() {
        let pipeline = FloorPipeline::new(config()).expect("valid config");
        let band = pipeline.band();
        assert_eq!((band.lower(), band.upper()), (245, 255));
    }
}
