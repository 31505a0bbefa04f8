//! The display loop: the only real-time consumer of frames.
//!
//! `DisplayController` owns one dedicated thread that, every tick:
//!
//! 1. applies a pending configuration reload (blank, load, validate, remap, then
//!    the reloaded power budget and target FPS)
//! 2. waits briefly for a frame from the [`FrameQueue`]
//! 3. maps it, limits brightness against the power budget, and pushes it to the driver
//! 4. sleeps out the rest of the frame budget
//! 5. refreshes a one-second rolling FPS figure
//!
//! Nothing that happens inside a tick can stop the loop. Errors and panics from
//! collaborators (config manager, driver) are logged and cost at most one frame
//! or one reload attempt; on a failed reload the previous mapping and runtime
//! settings stay in force. A successful reload replaces a `--fps` style override
//! made through [`DisplayController::set_target_fps`].
//!
//! ```text
//!  producers ──try_put──▶ FrameQueue ──pop_timeout──▶ display-loop
//!                                                   │
//!                       CoordinateMapper::map_frame ◀┤
//!        PowerLimiter::limit_brightness_for_frame   ◀┤
//!              LedDriver::set_frame / show          ◀┘
//! ```

use crate::config::{ConfigManager, PowerSettings, RuntimeSettings};
use crate::driver::{LedDriver, SharedDriver};
use crate::error::{LedError, LedResult};
use crate::frame::VirtualFrame;
use crate::mapper::CoordinateMapper;
use crate::power::PowerLimiter;
use crate::queue::{FrameQueue, ReloadSignal};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long `stop()` waits for the loop thread before giving up on it.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long one tick waits for a frame.
pub const POP_TIMEOUT: Duration = Duration::from_millis(10);

/// Window for the rolling FPS figure.
pub const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Longest single sleep while pacing, so `stop()` is noticed promptly.
const MAX_PACING_SLICE: Duration = Duration::from_millis(50);

const LOOP_THREAD_NAME: &str = "display-loop";

/// Construction-time settings for the display loop.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Frame pacing target.
    pub target_fps: f64,
    /// Initial power limiter settings.
    pub power: PowerSettings,
    /// Bound on `stop()`'s join.
    pub join_timeout: Duration,
    /// Bound on each frame wait.
    pub pop_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            power: PowerSettings::default(),
            join_timeout: JOIN_TIMEOUT,
            pop_timeout: POP_TIMEOUT,
        }
    }
}

impl ControllerSettings {
    /// Settings taken from the runtime section of a configuration.
    pub fn from_runtime(runtime: &RuntimeSettings) -> Self {
        Self {
            target_fps: f64::from(runtime.target_fps),
            power: runtime.power.clone(),
            ..Default::default()
        }
    }
}

/// Loop counters for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStats {
    /// Whether the loop thread is running.
    pub running: bool,
    /// Frames per second over the last window.
    pub fps: f64,
    /// Target frames per second.
    pub target_fps: f64,
    /// Frames pushed to the driver.
    pub frames_displayed: u64,
    /// Frames lost to driver errors or panics.
    pub frames_failed: u64,
    /// Frames producers could not queue.
    pub frames_dropped: u64,
    /// Frames waiting in the queue.
    pub queue_size: usize,
    /// Successful hot reloads.
    pub reloads_succeeded: u64,
    /// Failed hot reloads.
    pub reloads_failed: u64,
}

/// State shared between the controller handle and its loop thread.
struct LoopShared<D: LedDriver> {
    driver: SharedDriver<D>,
    mapper: Arc<CoordinateMapper>,
    limiter: Arc<PowerLimiter>,
    queue: Arc<FrameQueue>,
    reload: ReloadSignal,
    config_manager: Arc<dyn ConfigManager>,
    config_path: PathBuf,
    pop_timeout: Duration,

    running: AtomicBool,
    /// Bumped on every start/stop; a loop only runs while its epoch is current.
    epoch: AtomicU64,
    frame_interval_nanos: AtomicU64,
    fps_bits: AtomicU64,
    frames_displayed: AtomicU64,
    frames_failed: AtomicU64,
    reloads_succeeded: AtomicU64,
    reloads_failed: AtomicU64,
}

impl<D: LedDriver> LoopShared<D> {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_nanos(self.frame_interval_nanos.load(Ordering::Relaxed))
    }

    fn run(&self, epoch: u64) {
        info!("Display loop started");

        let mut last_frame = Instant::now();
        let mut window_start = Instant::now();
        let mut window_frames: u64 = 0;

        while self.is_current(epoch) {
            if self.reload.is_requested() {
                self.handle_reload();
            }

            if let Some(frame) = self.queue.pop_timeout(self.pop_timeout) {
                if self.display_frame(&frame) {
                    window_frames += 1;
                }
            }

            self.pace(epoch, &mut last_frame);
            self.update_fps(&mut window_start, &mut window_frames);
        }

        info!("Display loop ended");
    }

    fn handle_reload(&self) {
        info!(path = %self.config_path.display(), "Configuration reload requested");

        match catch_unwind(AssertUnwindSafe(|| self.reload_config())) {
            Ok(Ok(leds)) => {
                self.reloads_succeeded.fetch_add(1, Ordering::Relaxed);
                info!(leds, "Configuration reload complete");
            }
            Ok(Err(err)) => {
                self.reloads_failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, "Failed to reload configuration, keeping previous mapping");
            }
            Err(_) => {
                self.reloads_failed.fetch_add(1, Ordering::Relaxed);
                error!("Configuration reload panicked, keeping previous mapping");
            }
        }

        self.reload.clear();
    }

    fn reload_config(&self) -> LedResult<usize> {
        if let Err(err) = self.driver.lock().blank() {
            warn!(error = %err, "Failed to blank display before reload");
        }

        let config = self.config_manager.load_config(&self.config_path)?;
        self.config_manager.validate_config(&config)?;

        self.mapper.reload(&config);
        let leds = self.mapper.led_count();
        self.limiter.set_led_count(leds);
        self.limiter.apply_settings(&config.runtime.power);

        let fps = f64::from(config.runtime.target_fps);
        if fps > 0.0 {
            let nanos = interval_nanos(fps);
            if self.frame_interval_nanos.swap(nanos, Ordering::Relaxed) != nanos {
                info!(fps, "Target FPS updated from configuration");
            }
        }
        Ok(leds)
    }

    /// Returns whether the frame reached the LEDs.
    fn display_frame(&self, frame: &VirtualFrame) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.push_frame(frame))) {
            Ok(Ok(())) => {
                self.frames_displayed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(Err(err)) => {
                self.frames_failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Error displaying frame, frame dropped");
                false
            }
            Err(_) => {
                self.frames_failed.fetch_add(1, Ordering::Relaxed);
                error!("LED driver panicked while displaying frame, frame dropped");
                false
            }
        }
    }

    fn push_frame(&self, frame: &VirtualFrame) -> LedResult<()> {
        let physical = self.mapper.map_frame(frame);

        let mut driver = self.driver.lock();
        let current = driver.brightness();
        let (safe, _) = self
            .limiter
            .limit_brightness_for_frame(physical.as_bytes(), current);
        if safe != current {
            driver.set_brightness(safe)?;
        }
        driver.set_frame(&physical)?;
        driver.show()
    }

    fn pace(&self, epoch: u64, last_frame: &mut Instant) {
        let interval = self.frame_interval();
        let deadline = *last_frame + interval;
        loop {
            let now = Instant::now();
            if now >= deadline || !self.is_current(epoch) {
                break;
            }
            thread::sleep((deadline - now).min(MAX_PACING_SLICE));
        }
        *last_frame = Instant::now();
    }

    fn update_fps(&self, window_start: &mut Instant, window_frames: &mut u64) {
        let elapsed = window_start.elapsed();
        if elapsed < FPS_WINDOW {
            return;
        }
        let fps = *window_frames as f64 / elapsed.as_secs_f64();
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        debug!(
            fps,
            dropped = self.queue.dropped_count(),
            failed = self.frames_failed.load(Ordering::Relaxed),
            "Display loop rate"
        );
        *window_frames = 0;
        *window_start = Instant::now();
    }
}

/// Owner of the display loop thread.
pub struct DisplayController<D: LedDriver + 'static> {
    shared: Arc<LoopShared<D>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    join_timeout: Duration,
}

impl<D: LedDriver + 'static> DisplayController<D> {
    /// Wire up a controller. The loop does not run until [`start`](Self::start).
    ///
    /// The power limiter is sized from the driver's LED count.
    pub fn new(
        driver: SharedDriver<D>,
        mapper: Arc<CoordinateMapper>,
        queue: Arc<FrameQueue>,
        reload: ReloadSignal,
        config_manager: Arc<dyn ConfigManager>,
        config_path: impl Into<PathBuf>,
        settings: ControllerSettings,
    ) -> Self {
        let led_count = driver.lock().led_count();
        let limiter = Arc::new(PowerLimiter::new(
            led_count,
            settings.power.max_current_amps,
            settings.power.enabled,
            settings.power.dynamic_mode,
        ));

        let target_fps = if settings.target_fps.is_finite() && settings.target_fps > 0.0 {
            settings.target_fps
        } else {
            warn!(fps = settings.target_fps, "Invalid target FPS, using 30");
            30.0
        };

        info!(target_fps, led_count, "Display controller initialized");

        Self {
            shared: Arc::new(LoopShared {
                driver,
                mapper,
                limiter,
                queue,
                reload,
                config_manager,
                config_path: config_path.into(),
                pop_timeout: settings.pop_timeout,
                running: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                frame_interval_nanos: AtomicU64::new(interval_nanos(target_fps)),
                fps_bits: AtomicU64::new(0f64.to_bits()),
                frames_displayed: AtomicU64::new(0),
                frames_failed: AtomicU64::new(0),
                reloads_succeeded: AtomicU64::new(0),
                reloads_failed: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
            join_timeout: settings.join_timeout,
        }
    }

    /// Spawn the loop thread. Calling it while running is a no-op.
    pub fn start(&self) -> LedResult<()> {
        let mut handle = self.handle.lock();
        if self.shared.running.load(Ordering::Acquire) {
            warn!("Display controller already running");
            return Ok(());
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(LOOP_THREAD_NAME.to_string())
            .spawn(move || shared.run(epoch));

        match spawned {
            Ok(join) => {
                *handle = Some(join);
                info!("Display controller started");
                Ok(())
            }
            Err(source) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.epoch.fetch_add(1, Ordering::AcqRel);
                Err(LedError::ThreadSpawn {
                    name: LOOP_THREAD_NAME,
                    source,
                })
            }
        }
    }

    /// Stop the loop, wait up to the join timeout, then blank the display.
    ///
    /// Always blanks, even when the loop was not running.
    pub fn stop(&self) {
        let handle = self.handle.lock().take();
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);

        if was_running {
            info!("Stopping display controller");
        }
        if let Some(handle) = handle {
            join_with_timeout(handle, self.join_timeout);
        }

        if let Err(err) = self.shared.driver.lock().blank() {
            warn!(error = %err, "Failed to blank display on stop");
        }

        if was_running {
            info!("Display controller stopped");
        }
    }

    /// Whether the loop thread is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Change frame pacing. Non-positive or non-finite values are ignored.
    pub fn set_target_fps(&self, fps: f64) {
        if !(fps.is_finite() && fps > 0.0) {
            warn!(fps, "Invalid FPS ignored");
            return;
        }
        self.shared
            .frame_interval_nanos
            .store(interval_nanos(fps), Ordering::Relaxed);
        info!(fps, "Target FPS set");
    }

    /// Target frames per second.
    pub fn target_fps(&self) -> f64 {
        let nanos = self.shared.frame_interval_nanos.load(Ordering::Relaxed);
        if nanos == 0 {
            return 0.0;
        }
        1e9 / nanos as f64
    }

    /// Frames per second over the last completed window.
    pub fn fps(&self) -> f64 {
        f64::from_bits(self.shared.fps_bits.load(Ordering::Relaxed))
    }

    /// Frames waiting in the queue.
    pub fn queue_size(&self) -> usize {
        self.shared.queue.len()
    }

    /// Drop every queued frame.
    pub fn clear_queue(&self) -> usize {
        self.shared.queue.clear()
    }

    /// Limiter, for reconfiguration from control paths.
    pub fn power_limiter(&self) -> Arc<PowerLimiter> {
        Arc::clone(&self.shared.limiter)
    }

    /// Mapper used by the loop.
    pub fn mapper(&self) -> Arc<CoordinateMapper> {
        Arc::clone(&self.shared.mapper)
    }

    /// Driver handle; lock it to change brightness from outside the loop.
    pub fn driver(&self) -> SharedDriver<D> {
        Arc::clone(&self.shared.driver)
    }

    /// Reload flag the loop watches.
    pub fn reload_signal(&self) -> ReloadSignal {
        self.shared.reload.clone()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ControllerStats {
        let shared = &self.shared;
        ControllerStats {
            running: self.is_running(),
            fps: self.fps(),
            target_fps: self.target_fps(),
            frames_displayed: shared.frames_displayed.load(Ordering::Relaxed),
            frames_failed: shared.frames_failed.load(Ordering::Relaxed),
            frames_dropped: shared.queue.dropped_count(),
            queue_size: shared.queue.len(),
            reloads_succeeded: shared.reloads_succeeded.load(Ordering::Relaxed),
            reloads_failed: shared.reloads_failed.load(Ordering::Relaxed),
        }
    }
}

impl<D: LedDriver + 'static> Drop for DisplayController<D> {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

fn interval_nanos(fps: f64) -> u64 {
    (1e9 / fps).round() as u64
}

/// Join `handle`, giving up after `timeout`. A thread that misses the deadline
/// is left detached; it exits on its own once it sees its epoch is stale.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(
                thread = handle.thread().name().unwrap_or("unnamed"),
                timeout_ms = timeout.as_millis() as u64,
                "Thread did not stop within timeout, detaching"
            );
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    if handle.join().is_err() {
        error!("Thread panicked before shutdown");
    }
}
