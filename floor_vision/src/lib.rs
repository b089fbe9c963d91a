// THEORY:
// This file is the main entry point for the `floor_vision` library crate.
// An overhead infrared camera looks down on an interactive floor; each person on
// it shows up as a bright patch. The crate turns a stream of brightness frames
// into identified players with a movement state and a path shape, ready to drive
// visual and sound effects.
//
// The public API is the pair of pipelines: `FloorPipeline` for synchronous,
// one-call-per-tick use and `ParallelPipeline` for an async loop with banded
// detection on tokio's blocking pool. Both return a `TickReport`. The stages
// they chain (detection, tracking, motion classification) live in
// `core_modules` and stay usable on their own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::{DetectionConfig, FloorConfig, MotionConfig, TrackingConfig};
pub use core_modules::blob::{Blob, Bounds};
pub use core_modules::brightness::{BrightnessFrame, ThresholdBand};
pub use core_modules::motion::{MotionShape, PlayerState, StateChange, StateListener};
pub use error::{FloorError, Result};
pub use parallel_pipeline::{Fetch, FrameSource, ParallelPipeline, StreamSource};
pub use pipeline::{FloorPipeline, PlayerSnapshot, TickReport};
