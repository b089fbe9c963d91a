// THEORY:
// The `motion` module is the behavioural layer. The tracker says *who* is where;
// this module says *how* each player is moving, so that the effects layer can
// react to a jump or a sprint rather than to raw coordinates.
//
// One `MotionRecord` exists per identity. It is created on the first sighting,
// fed one position per tick while the identity is confirmed, and dropped when the
// tracker evicts the identity.
//
// Key ideas:
// 1.  **Smoothed kinematics**: the raw velocity (displacement over wall-clock time)
//     is blended into the stored velocity with a fixed factor instead of replacing
//     it, which damps single-frame jitter from the detector. Acceleration is the
//     change of the smoothed velocity, blended the same way.
// 2.  **Movement state**: a vertical rise above the jump threshold is a jump
//     (`Airborne` when also moving fast, `Jumping` otherwise); otherwise the
//     smoothed speed picks `Static`, `Walking` or `Running`. Image y grows
//     downwards, so a rise is `previous.y - current.y`.
// 3.  **Path shape**: once the position history is full, the signed turning angles
//     between consecutive displacements are summed. More than 1.5 turns of pi means
//     `Circular`; otherwise a high acceleration means `Erratic`; otherwise `Linear`.
// 4.  **Events, not callbacks**: a state change comes back as a `StateChange`
//     value. Whoever drives the tick decides when to fan it out to listeners, so the
//     classifier itself has no side effects.

use crate::config::MotionConfig;
use crate::error::Result;
use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tracing::debug;

/// Total turning (radians) beyond which a path counts as circular.
const CIRCULAR_TURNING: f64 = 1.5 * PI;

/// Discrete movement state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerState {
    Static,
    Walking,
    Running,
    /// Jumping on the spot.
    Jumping,
    /// Jumping while moving.
    Airborne,
}

/// Shape of a player's recent path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionShape {
    Linear,
    Circular,
    Erratic,
}

/// Emitted when a player's movement state changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateChange {
    pub identity: u64,
    pub from: PlayerState,
    pub to: PlayerState,
    pub at: Instant,
}

/// Receives movement-state transitions, synchronously and within the tick that
/// produced them.
pub trait StateListener {
    fn on_state_change(&mut self, change: &StateChange);
}

impl<F> StateListener for F
where
    F: FnMut(&StateChange),
{
    fn on_state_change(&mut self, change: &StateChange) {
        self(change)
    }
}

/// The classifier's verdict for one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub state: PlayerState,
    pub shape: MotionShape,
    pub change: Option<StateChange>,
}

/// Kinematic history and classification for one tracked identity.
#[derive(Debug, Clone)]
pub struct MotionRecord {
    identity: u64,
    position: (f64, f64),
    previous_position: (f64, f64),
    velocity: (f64, f64),
    acceleration: (f64, f64),
    /// Recent positions, oldest first, never longer than the configured capacity.
    history: VecDeque<(f64, f64)>,
    state: PlayerState,
    state_entered: Instant,
    shape: MotionShape,
    last_update: Instant,
}

impl MotionRecord {
    fn new(identity: u64, x: f64, y: f64, now: Instant, capacity: usize) -> Self {
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back((x, y));
        Self {
            identity,
            position: (x, y),
            previous_position: (x, y),
            velocity: (0.0, 0.0),
            acceleration: (0.0, 0.0),
            history,
            state: PlayerState::Static,
            state_entered: now,
            shape: MotionShape::Linear,
            last_update: now,
        }
    }

    fn observe(&mut self, x: f64, y: f64, now: Instant, config: &MotionConfig) -> Observation {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        self.previous_position = self.position;
        self.position = (x, y);
        if self.history.len() >= config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(self.position);

        // Two samples at the same instant carry no rate information.
        if elapsed > 0.0 {
            let raw_velocity = (
                (self.position.0 - self.previous_position.0) / elapsed,
                (self.position.1 - self.previous_position.1) / elapsed,
            );
            let old_velocity = self.velocity;
            self.velocity = lerp(self.velocity, raw_velocity, config.velocity_blend);
            let raw_acceleration = (
                (self.velocity.0 - old_velocity.0) / elapsed,
                (self.velocity.1 - old_velocity.1) / elapsed,
            );
            self.acceleration = lerp(self.acceleration, raw_acceleration, config.velocity_blend);
        }
        self.last_update = now;

        let change = self.update_state(now, config);
        if self.history.len() >= config.history_capacity {
            self.shape = self.classify_shape(config);
        }

        Observation {
            state: self.state,
            shape: self.shape,
            change,
        }
    }

    fn update_state(&mut self, now: Instant, config: &MotionConfig) -> Option<StateChange> {
        let speed = self.speed();
        let rise = self.previous_position.1 - self.position.1;

        let next = if rise > config.jump_rise {
            if speed > config.walk_speed {
                PlayerState::Airborne
            } else {
                PlayerState::Jumping
            }
        } else if speed < config.stationary_speed {
            PlayerState::Static
        } else if speed < config.walk_speed {
            PlayerState::Walking
        } else {
            PlayerState::Running
        };

        if next == self.state {
            return None;
        }
        let change = StateChange {
            identity: self.identity,
            from: self.state,
            to: next,
            at: now,
        };
        debug!(
            "Identity {} changed {:?} -> {:?} at speed {:.2}",
            self.identity, change.from, change.to, speed
        );
        self.state = next;
        self.state_entered = now;
        Some(change)
    }

    fn classify_shape(&self, config: &MotionConfig) -> MotionShape {
        let points: Vec<_> = self.history.iter().copied().collect();
        let turning: f64 = points
            .windows(3)
            .map(|w| {
                let first = (w[1].0 - w[0].0, w[1].1 - w[0].1);
                let second = (w[2].0 - w[1].0, w[2].1 - w[1].1);
                signed_angle(first, second)
            })
            .sum();

        if turning.abs() > CIRCULAR_TURNING {
            MotionShape::Circular
        } else if magnitude(self.acceleration) > config.erratic_acceleration {
            MotionShape::Erratic
        } else {
            MotionShape::Linear
        }
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }

    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    pub fn previous_position(&self) -> (f64, f64) {
        self.previous_position
    }

    pub fn velocity(&self) -> (f64, f64) {
        self.velocity
    }

    pub fn acceleration(&self) -> (f64, f64) {
        self.acceleration
    }

    pub fn speed(&self) -> f64 {
        magnitude(self.velocity)
    }

    pub fn history(&self) -> impl Iterator<Item = &(f64, f64)> {
        self.history.iter()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn shape(&self) -> MotionShape {
        self.shape
    }

    pub fn state_entered(&self) -> Instant {
        self.state_entered
    }

    pub fn time_in_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state_entered)
    }

    /// True when the two players' centres are closer than `radius`.
    pub fn is_colliding(&self, other: &MotionRecord, radius: f64) -> bool {
        let dx = self.position.0 - other.position.0;
        let dy = self.position.1 - other.position.1;
        (dx * dx + dy * dy).sqrt() < radius
    }
}

fn lerp(from: (f64, f64), to: (f64, f64), amount: f64) -> (f64, f64) {
    (
        from.0 + (to.0 - from.0) * amount,
        from.1 + (to.1 - from.1) * amount,
    )
}

fn magnitude(v: (f64, f64)) -> f64 {
    (v.0 * v.0 + v.1 * v.1).sqrt()
}

/// Signed angle in (-pi, pi] turning from `a` to `b`; zero if either is degenerate.
fn signed_angle(a: (f64, f64), b: (f64, f64)) -> f64 {
    if magnitude(a) == 0.0 || magnitude(b) == 0.0 {
        return 0.0;
    }
    let cross = a.0 * b.1 - a.1 * b.0;
    let dot = a.0 * b.0 + a.1 * b.1;
    cross.atan2(dot)
}

/// Owns one `MotionRecord` per tracked identity.
pub struct MotionClassifier {
    config: MotionConfig,
    records: BTreeMap<u64, MotionRecord>,
}

impl MotionClassifier {
    pub fn new(config: MotionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            records: BTreeMap::new(),
        })
    }

    /// Feeds one position sample. The first sample for an identity only creates its
    /// record (at rest, `Static`, `Linear`).
    ///
    /// Coordinates must be finite; the detector and tracker only ever produce
    /// in-frame centres.
    pub fn observe(&mut self, identity: u64, x: f64, y: f64, now: Instant) -> Observation {
        debug_assert!(x.is_finite() && y.is_finite(), "non-finite position for identity {identity}");
        let capacity = self.config.history_capacity;
        match self.records.get_mut(&identity) {
            Some(record) => record.observe(x, y, now, &self.config),
            None => {
                let record = MotionRecord::new(identity, x, y, now, capacity);
                let observation = Observation {
                    state: record.state,
                    shape: record.shape,
                    change: None,
                };
                self.records.insert(identity, record);
                observation
            }
        }
    }

    /// Drops the record of an identity the tracker no longer follows.
    pub fn forget(&mut self, identity: u64) -> Option<MotionRecord> {
        self.records.remove(&identity)
    }

    pub fn get(&self, identity: u64) -> Option<&MotionRecord> {
        self.records.get(&identity)
    }

    pub fn records(&self) -> impl Iterator<Item = &MotionRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
