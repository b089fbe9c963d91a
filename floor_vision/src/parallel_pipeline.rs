// THEORY:
// The `ParallelPipeline` is the async front of the engine. It keeps the exact
// semantics of `FloorPipeline` but moves the expensive part, the pixel scan, onto
// tokio's blocking pool through the `BandedDetector`. Tracking and motion stay
// on the driving task: they are cheap and they own cross-tick state, so ticks
// stay strictly ordered.
//
// `run` is the real-time loop. A tokio interval fires once per tick; each tick
// asks the `FrameSource` for at most one frame and processes it to completion
// before the next tick is awaited, so ticks never overlap. If a tick runs long,
// the interval is delayed rather than bursting to catch up. A source with no
// frame for this tick yields `Fetch::Missing`, which still advances tracking so
// that vanished players age out on time. A frame of the wrong size is handled
// the same way; only a failed detection worker ends the loop.

use crate::config::FloorConfig;
use crate::core_modules::banded_detector::BandedDetector;
use crate::core_modules::brightness::BrightnessFrame;
use crate::error::{FloorError, Result};
use crate::pipeline::{FloorPipeline, TickReport};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What a frame source has for the current tick.
#[derive(Debug)]
pub enum Fetch {
    Frame(BrightnessFrame),
    /// Nothing this tick; try again next tick.
    Missing,
    /// The source is exhausted.
    Closed,
}

/// Supplies at most one frame per tick.
pub trait FrameSource {
    fn next_frame(&mut self) -> impl Future<Output = Fetch> + Send;
}

/// Adapts a stream of optional frames. `None` items are missing frames; the end
/// of the stream closes the source.
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S>
where
    S: Stream<Item = Option<BrightnessFrame>> + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> FrameSource for StreamSource<S>
where
    S: Stream<Item = Option<BrightnessFrame>> + Unpin + Send,
{
    async fn next_frame(&mut self) -> Fetch {
        match self.stream.next().await {
            Some(Some(frame)) => Fetch::Frame(frame),
            Some(None) => Fetch::Missing,
            None => Fetch::Closed,
        }
    }
}

pub struct ParallelPipeline {
    pipeline: FloorPipeline,
    detector: BandedDetector,
}

impl ParallelPipeline {
    pub fn new(config: FloorConfig) -> Result<Self> {
        let detector = BandedDetector::new(config.image_width, config.image_height, &config.detection)?;
        let pipeline = FloorPipeline::new(config)?;
        info!("Parallel pipeline using {} detection band(s)", detector.bands());
        Ok(Self { pipeline, detector })
    }

    pub fn pipeline(&self) -> &FloorPipeline {
        &self.pipeline
    }

    /// Mutable access, e.g. for registering listeners.
    pub fn pipeline_mut(&mut self) -> &mut FloorPipeline {
        &mut self.pipeline
    }

    /// Runs one tick with banded detection.
    pub async fn process_frame(&mut self, frame: Option<BrightnessFrame>, now: Instant) -> Result<TickReport> {
        let detected = match frame {
            Some(frame) => {
                let detection = &self.pipeline.config().detection;
                let (threshold, range) = (detection.threshold, detection.range);
                Some(self.detector.detect(Arc::new(frame), threshold, range).await?)
            }
            None => None,
        };
        Ok(self.pipeline.advance(detected, now))
    }

    /// Drives ticks every `tick_interval` until the source closes or `max_ticks`
    /// ticks have run. Returns the number of ticks processed.
    pub async fn run<S, F>(
        &mut self,
        source: &mut S,
        tick_interval: Duration,
        max_ticks: Option<u64>,
        mut on_report: F,
    ) -> Result<u64>
    where
        S: FrameSource,
        F: FnMut(&TickReport),
    {
        if tick_interval.is_zero() {
            return Err(FloorError::InvalidConfig("tick interval must be non-zero".to_string()));
        }
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0u64;
        while max_ticks.is_none_or(|max| ticks < max) {
            interval.tick().await;
            let frame = match source.next_frame().await {
                Fetch::Frame(frame) => Some(frame),
                Fetch::Missing => {
                    warn!("No frame available for tick {}", ticks + 1);
                    None
                }
                Fetch::Closed => {
                    info!("Frame source closed after {} tick(s)", ticks);
                    break;
                }
            };
            let now = tokio::time::Instant::now().into_std();
            let report = match self.process_frame(frame, now).await {
                Ok(report) => report,
                Err(e @ FloorError::FrameSize { .. }) => {
                    warn!("Dropping unusable frame for tick {}: {}", ticks + 1, e);
                    self.pipeline.advance(None, now)
                }
                Err(e) => return Err(e),
            };
            on_report(&report);
            ticks += 1;
        }
        debug!("Run loop finished after {} tick(s)", ticks);
        Ok(ticks)
    }
}
