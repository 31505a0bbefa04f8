//! CLI entry point for ledwall
//!
//! Provides:
//! - `run`: drive the pipeline with a test pattern against the mock driver
//! - `validate`: load and validate a configuration file
//! - `locate`: find the chain index of a virtual pixel
//!
//! # Usage
//!
//! ```bash
//! ledwall run --config configs/current.json --pattern corners --seconds 10
//! ledwall validate --config configs/current.json
//! ledwall locate --config configs/current.json 16 0
//! ```
//!
//! `run` polls the config file and hot-reloads the mapping when it changes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledwall::config::{ConfigManager, FileConfigManager};
use ledwall::controller::{ControllerSettings, DisplayController};
use ledwall::driver::{shared, MockLedDriver};
use ledwall::frame::TestPattern;
use ledwall::logging::{self, OutputFormat, TracingConfig};
use ledwall::mapper::CoordinateMapper;
use ledwall::queue::{FrameQueue, ReloadSignal};
use ledwall::scheduler::SleepScheduler;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{info, warn};

const WATCH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "ledwall")]
#[command(about = "Frame pipeline for chained LED panel walls", long_about = None)]
struct Cli {
    /// Log line format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the display loop with a test pattern producer
    Run {
        /// Display configuration (JSON or TOML)
        #[arg(long)]
        config: PathBuf,

        /// Override the configured target FPS
        #[arg(long)]
        fps: Option<f64>,

        /// Stop after this many seconds (runs until killed otherwise)
        #[arg(long)]
        seconds: Option<f64>,

        /// Pattern to display (gradient, corners, cross, checkerboard)
        #[arg(long, default_value = "gradient")]
        pattern: TestPattern,

        /// Sleep window start, HH:MM
        #[arg(long, requires = "sleep_on")]
        sleep_off: Option<String>,

        /// Sleep window end, HH:MM
        #[arg(long, requires = "sleep_off")]
        sleep_on: Option<String>,
    },

    /// Load and validate a configuration file
    Validate {
        /// Display configuration (JSON or TOML)
        #[arg(long)]
        config: PathBuf,
    },

    /// Print the chain index of virtual pixel (x, y)
    Locate {
        /// Display configuration (JSON or TOML)
        #[arg(long)]
        config: PathBuf,

        /// Column
        x: usize,

        /// Row
        y: usize,
    },
}

struct RunArgs {
    config: PathBuf,
    fps: Option<f64>,
    seconds: Option<f64>,
    pattern: TestPattern,
    sleep_window: Option<(String, String)>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            fps,
            seconds,
            pattern,
            sleep_off,
            sleep_on,
        } => run(
            RunArgs {
                config,
                fps,
                seconds,
                pattern,
                sleep_window: sleep_off.zip(sleep_on),
            },
            cli.log_format,
        ),
        Commands::Validate { config } => validate(&config),
        Commands::Locate { config, x, y } => locate(&config, x, y),
    }
}

fn run(args: RunArgs, log_format: OutputFormat) -> Result<()> {
    let manager = Arc::new(FileConfigManager::new());
    let config = manager
        .load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let tracing_config = TracingConfig::from_settings(&config.runtime)
        .map_err(anyhow::Error::msg)?
        .with_format(log_format);
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    let mapper = Arc::new(CoordinateMapper::new(&config));
    let queue = Arc::new(FrameQueue::new(config.runtime.queue_capacity));
    let reload = ReloadSignal::new();
    let driver = shared(MockLedDriver::new(config.total_leds()).without_history());

    let controller = DisplayController::new(
        Arc::clone(&driver),
        Arc::clone(&mapper),
        Arc::clone(&queue),
        reload.clone(),
        manager,
        &args.config,
        ControllerSettings::from_runtime(&config.runtime),
    );
    let fps = args.fps.unwrap_or(f64::from(config.runtime.target_fps));
    if args.fps.is_some() {
        controller.set_target_fps(fps);
    }

    let scheduler = SleepScheduler::new(Arc::clone(&driver));
    if let Some((off, on)) = &args.sleep_window {
        scheduler.set_schedule(off, on, true)?;
        scheduler.start()?;
    }

    controller.start()?;

    let producing = Arc::new(AtomicBool::new(true));
    let producer = {
        let producing = Arc::clone(&producing);
        let mapper = Arc::clone(&mapper);
        let handle = queue.claim_producer(format!("pattern:{:?}", args.pattern));
        let pattern = args.pattern;
        let interval = Duration::from_secs_f64(1.0 / fps.max(1.0));
        thread::Builder::new()
            .name("pattern-producer".to_string())
            .spawn(move || {
                while producing.load(Ordering::Relaxed) && handle.is_active() {
                    let (w, h) = mapper.canvas_dimensions();
                    // drop on full; the next frame is identical anyway
                    let _ = handle.try_put(pattern.render(w, h));
                    thread::sleep(interval);
                }
            })?
    };

    println!(
        "Running {:?} on {} LEDs ({}x{}) at {} fps",
        args.pattern,
        mapper.led_count(),
        mapper.dimensions().0,
        mapper.dimensions().1,
        fps
    );

    let deadline = args
        .seconds
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| Instant::now() + Duration::from_secs_f64(s));
    let mut last_modified = modified_time(&args.config);

    while deadline.map_or(true, |d| Instant::now() < d) {
        thread::sleep(WATCH_INTERVAL);
        let modified = modified_time(&args.config);
        if modified.is_some() && modified != last_modified {
            info!(path = %args.config.display(), "Configuration file changed");
            last_modified = modified;
            reload.request();
        }
    }

    producing.store(false, Ordering::Relaxed);
    if producer.join().is_err() {
        warn!("Pattern producer panicked");
    }
    scheduler.stop();
    controller.stop();

    println!("{}", serde_json::to_string_pretty(&controller.stats())?);
    println!(
        "{}",
        serde_json::to_string_pretty(&controller.power_limiter().stats())?
    );
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let manager = FileConfigManager::new();
    let config = manager
        .load_config(path)
        .with_context(|| format!("validating {}", path.display()))?;

    println!("Configuration OK: {}", path.display());
    println!(
        "  {} panels of {}x{} in a {}x{} grid",
        config.panels.len(),
        config.grid.panel_width,
        config.grid.panel_height,
        config.grid.grid_width,
        config.grid.grid_height
    );
    println!(
        "  display {}x{}, {} LEDs, rotation {}°",
        config.total_width(),
        config.total_height(),
        config.total_leds(),
        config.grid.display_rotation
    );
    Ok(())
}

fn locate(path: &Path, x: usize, y: usize) -> Result<()> {
    let config = FileConfigManager::new().load_config(path)?;
    let mapper = CoordinateMapper::new(&config);
    match mapper.virtual_to_physical(x, y) {
        Some(index) => println!("({}, {}) -> LED {}", x, y, index),
        None => {
            let (w, h) = mapper.dimensions();
            anyhow::bail!("({}, {}) is outside the {}x{} display", x, y, w, h);
        }
    }
    Ok(())
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
