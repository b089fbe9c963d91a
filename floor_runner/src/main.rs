// Offline runner: replays a directory of captured frames through the parallel
// pipeline at the camera's tick rate, logs what the floor sees, and optionally
// writes a debug overlay per tick.
//
// Usage: floor_runner <frames_dir> [config.json] [out_dir]

use anyhow::{Context, Result, bail};
use floor_vision::core_modules::utils::image_helper::{render_overlay, save_rgb};
use floor_vision::{
    BrightnessFrame, Fetch, FloorConfig, FrameSource, ParallelPipeline, StateChange, ThresholdBand, TickReport,
};
use std::collections::VecDeque;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TICK_INTERVAL: Duration = Duration::from_millis(33);
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Reads one image file per tick, in file-name order.
struct DirectorySource {
    files: VecDeque<PathBuf>,
    /// The frame handed out last, kept for the overlay writer.
    last_frame: Arc<Mutex<Option<BrightnessFrame>>>,
}

impl DirectorySource {
    fn open(dir: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("reading frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();
        Ok(Self {
            files: files.into(),
            last_frame: Arc::new(Mutex::new(None)),
        })
    }

    fn first_file(&self) -> Option<&PathBuf> {
        self.files.front()
    }

    fn remember(&self, frame: Option<BrightnessFrame>) {
        if let Ok(mut slot) = self.last_frame.lock() {
            *slot = frame;
        }
    }
}

impl FrameSource for DirectorySource {
    async fn next_frame(&mut self) -> Fetch {
        let Some(path) = self.files.pop_front() else {
            return Fetch::Closed;
        };
        let loaded = tokio::task::spawn_blocking({
            let path = path.clone();
            move || image::open(&path).map(|image| BrightnessFrame::from(&image))
        })
        .await;

        match loaded {
            Ok(Ok(frame)) => {
                self.remember(Some(frame.clone()));
                Fetch::Frame(frame)
            }
            Ok(Err(e)) => {
                warn!("Skipping unreadable frame {}: {}", path.display(), e);
                self.remember(None);
                Fetch::Missing
            }
            Err(e) => {
                warn!("Frame loader for {} failed: {}", path.display(), e);
                self.remember(None);
                Fetch::Missing
            }
        }
    }
}

fn load_config(path: Option<&String>, source: &DirectorySource) -> Result<FloorConfig> {
    if let Some(path) = path {
        let config = FloorConfig::from_json_file(path).with_context(|| format!("loading config {path}"))?;
        info!("Configuration loaded from {}", path);
        return Ok(config);
    }

    // No config file: defaults, sized to the first frame.
    let mut config = FloorConfig::default();
    if let Some(first) = source.first_file() {
        let (width, height) = image::image_dimensions(first)
            .with_context(|| format!("reading dimensions of {}", first.display()))?;
        config.image_width = width;
        config.image_height = height;
    }
    Ok(config)
}

fn log_report(report: &TickReport) {
    for change in &report.state_changes {
        log_state_change(change);
    }
    for identity in &report.born {
        info!("Tick {}: player {} entered the floor", report.tick, identity);
    }
    for identity in &report.lost {
        info!("Tick {}: player {} left the floor", report.tick, identity);
    }
    for (a, b) in &report.collisions {
        info!("Tick {}: players {} and {} are colliding", report.tick, a, b);
    }
}

fn log_state_change(change: &StateChange) {
    info!("Player {} went from {:?} to {:?}", change.identity, change.from, change.to);
}

fn write_overlay(out_dir: &Path, report: &TickReport, band: ThresholdBand, frame: &BrightnessFrame) {
    let blobs: Vec<_> = report.players.iter().map(|player| player.blob).collect();
    let path = out_dir.join(format!("tick_{:05}.png", report.tick));
    if let Err(e) = save_rgb(&path, &render_overlay(frame, band, &blobs)) {
        error!("Failed to write overlay {}: {}", path.display(), e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("floor_vision=info,floor_runner=info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("Usage: floor_runner <frames_dir> [config.json] [out_dir]");
    }
    let frames_dir = Path::new(&args[1]);
    let out_dir = args.get(3).map(PathBuf::from);

    let mut source = DirectorySource::open(frames_dir)?;
    if source.first_file().is_none() {
        warn!("No image files found in {}", frames_dir.display());
        return Ok(());
    }
    let config = load_config(args.get(2), &source)?;
    info!(
        "Floor {}x{}, brightness band {} +/- {}",
        config.image_width, config.image_height, config.detection.threshold, config.detection.range
    );

    if let Some(dir) = &out_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let mut pipeline = ParallelPipeline::new(config)?;
    let band = pipeline.pipeline().band();
    let last_frame = Arc::clone(&source.last_frame);
    let mut peak_players = 0;

    let ticks = pipeline
        .run(&mut source, TICK_INTERVAL, None, |report| {
            log_report(report);
            peak_players = peak_players.max(report.players.len());
            if let Some(dir) = &out_dir {
                let frame = last_frame.lock().ok().and_then(|slot| slot.clone());
                if let Some(frame) = frame {
                    write_overlay(dir, report, band, &frame);
                }
            }
        })
        .await?;

    info!(
        "Processed {} tick(s); at most {} player(s) on the floor at once",
        ticks, peak_players
    );
    Ok(())
}
