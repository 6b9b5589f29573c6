// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - `run`: open a capture session and print every frame the consumer gets
//! - `config`: print (and optionally save) the effective configuration

use chrono::Local;
use gst_capture_ring::backends::pipeline::launch_description;
use gst_capture_ring::{
    Camera, CaptureRing, ConsumerLoop, Config, DeviceAllocator, LoopAction, RgbaFrame,
    SourceType, StagedAllocator, UnifiedAllocator,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, mpsc};
use std::time::Duration;

/// Values that override the configuration file
#[derive(clap::Args, Debug, Default)]
pub struct Overrides {
    /// Requested frame width
    #[arg(long)]
    pub width: Option<u32>,

    /// Requested frame height
    #[arg(long)]
    pub height: Option<u32>,

    /// Use the external V4L2 camera /dev/videoN instead of the onboard sensor
    #[arg(short, long)]
    pub device: Option<u32>,

    /// Full GStreamer launch description (must contain `appsink name=mysink`)
    #[arg(long)]
    pub launch: Option<String>,

    /// Number of ring slots
    #[arg(long)]
    pub ring_buffers: Option<usize>,
}

/// Options of the `run` command
#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    pub frames: Option<u64>,

    /// Acquire timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Convert frames to float RGBA
    #[arg(long)]
    pub convert: bool,

    /// Require unified memory for conversion output
    #[arg(long)]
    pub zero_copy: bool,

    /// Use separate device buffers with explicit transfers
    #[arg(long)]
    pub staged: bool,

    /// Save the first converted frame as PNG (file or directory)
    #[arg(short, long)]
    pub snapshot: Option<PathBuf>,
}

/// Load the configuration and apply command line overrides
pub fn effective_config(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = Config::load_or_default(path)?;

    if let Some(width) = overrides.width {
        config.width = width;
    }
    if let Some(height) = overrides.height {
        config.height = height;
    }
    if let Some(device) = overrides.device {
        config.source = SourceType::External { device };
    }
    if let Some(launch) = &overrides.launch {
        config.launch = Some(launch.clone());
    }
    if let Some(ring_buffers) = overrides.ring_buffers {
        config.ring_buffers = ring_buffers;
    }

    config.validate()?;
    Ok(config)
}

/// Print the effective configuration, optionally saving it
pub fn show_config(
    config: &Config,
    save_to: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);

    if let Some(path) = save_to {
        config.save(&path)?;
        println!("Saved: {}", path.display());
    }
    Ok(())
}

/// Snapshot target: a directory gets a timestamped file name
fn snapshot_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        path.join(format!("frame_{}.png", timestamp))
    } else {
        path
    }
}

fn save_snapshot(frame: &RgbaFrame, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let image = frame
        .to_rgba8()
        .ok_or("converted frame does not match its dimensions")?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}

/// Consumer-side state, built on the consumer thread
struct Session {
    camera: Camera,
    received: u64,
    snapshot: Option<PathBuf>,
}

/// Capture until the frame limit, a fatal error, or Ctrl+C
pub fn run(config: Config, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let convert = config.convert || args.convert || args.snapshot.is_some();
    let zero_copy = config.zero_copy || args.zero_copy;
    let timeout = args
        .timeout
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.acquire_timeout());
    let limit = args.frames;
    let snapshot = args.snapshot.map(snapshot_path);
    let allocator: Arc<dyn DeviceAllocator> = if args.staged {
        Arc::new(StagedAllocator)
    } else {
        Arc::new(UnifiedAllocator)
    };

    println!("Source: {}", config.source);
    println!("Launch: {}", launch_description(&config));
    println!("Allocator: {}", allocator.name());
    if convert {
        println!("Conversion: float RGBA{}", if zero_copy { " (zero-copy)" } else { "" });
    }
    println!();
    println!("Capturing... (press Ctrl+C to stop)");

    let (ring_tx, ring_rx) = mpsc::channel::<Arc<CaptureRing>>();

    let mut consumer = ConsumerLoop::start(
        "capture-consumer",
        move || {
            let mut camera = Camera::new(config, allocator)?;
            camera.open()?;
            let _ = ring_tx.send(Arc::clone(camera.ring()));
            Ok(Session {
                camera,
                received: 0,
                snapshot,
            })
        },
        move |session| {
            let frame = session.camera.capture(timeout)?;
            session.received += 1;

            println!(
                "frame {:>6}  generation {:>6}  slot {:>2}  {}x{}  {} bytes",
                session.received,
                frame.generation(),
                frame.slot(),
                frame.width(),
                frame.height(),
                frame.len()
            );

            if convert {
                let rgba = session.camera.convert_rgba(&frame, zero_copy)?;
                if let Some(path) = session.snapshot.take() {
                    match save_snapshot(&rgba, &path) {
                        Ok(()) => println!("Snapshot saved: {}", path.display()),
                        Err(e) => eprintln!("Failed to save snapshot {}: {}", path.display(), e),
                    }
                }
            }

            Ok(match limit {
                Some(n) if session.received >= n => LoopAction::Stop,
                _ => LoopAction::Continue,
            })
        },
    );

    let stop_flag = consumer.stop_signal();
    ctrlc::set_handler(move || {
        stop_flag.store(true, Ordering::SeqCst);
    })?;

    let result = consumer.join();

    println!();
    if let Ok(ring) = ring_rx.try_recv() {
        println!("Ring statistics:");
        println!("{}", serde_json::to_string_pretty(&ring.stats())?);
    }

    let report = result?;
    println!(
        "Consumer: {} frames, {} idle polls, {} skipped",
        report.steps, report.idle, report.failures
    );
    Ok(())
}
