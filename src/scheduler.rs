//! Nightly sleep window for the wall.
//!
//! `SleepScheduler` is one of the brightness writers that share the driver with
//! the display loop. Inside the configured window it saves the current
//! brightness and drops it to 0; on leaving the window it restores the saved
//! value. With dynamic power limiting enabled the limiter may move brightness
//! again on the next processed frame; callers who want a dark wall during the
//! window should pause their producers as well.
//!
//! A window whose off time is later than its on time wraps midnight
//! (`22:00` → `07:00`). Equal times describe an empty window.

use crate::controller::join_with_timeout;
use crate::driver::{LedDriver, SharedDriver};
use crate::error::{LedError, LedResult};
use crate::power::DEFAULT_TARGET_BRIGHTNESS;
use chrono::{Local, NaiveTime};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often the background thread checks the clock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

const SCHEDULER_THREAD_NAME: &str = "sleep-scheduler";
const TIME_FORMAT: &str = "%H:%M";
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Public view of the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStatus {
    /// Whether the window is applied.
    pub enabled: bool,
    /// Start of the window, `HH:MM`.
    pub off_time: Option<String>,
    /// End of the window, `HH:MM`.
    pub on_time: Option<String>,
    /// Whether the wall is currently dimmed by the scheduler.
    pub sleeping: bool,
    /// Brightness to restore when the window ends.
    pub saved_brightness: Option<u8>,
}

/// What a single [`SleepScheduler::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTransition {
    /// Nothing changed.
    Unchanged,
    /// Entered the window and dimmed the wall.
    Slept,
    /// Left the window and restored brightness.
    Woke,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    off: NaiveTime,
    on: NaiveTime,
    enabled: bool,
}

impl Window {
    fn contains(&self, now: NaiveTime) -> bool {
        if !self.enabled {
            return false;
        }
        if self.off <= self.on {
            self.off <= now && now < self.on
        } else {
            now >= self.off || now < self.on
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    window: Option<Window>,
    sleeping: bool,
    saved_brightness: Option<u8>,
}

struct Inner<D: LedDriver> {
    driver: SharedDriver<D>,
    state: Mutex<SchedulerState>,
    stop_requested: Mutex<bool>,
    wake: Condvar,
    poll_interval: Duration,
}

impl<D: LedDriver> Inner<D> {
    fn tick(&self, now: NaiveTime) -> LedResult<SleepTransition> {
        let mut state = self.state.lock();
        let in_window = state.window.is_some_and(|w| w.contains(now));

        if in_window && !state.sleeping {
            let mut driver = self.driver.lock();
            let current = driver.brightness();
            driver.set_brightness(0)?;
            driver.show()?;
            state.saved_brightness = Some(current);
            state.sleeping = true;
            info!(saved = current, "Entering sleep window");
            Ok(SleepTransition::Slept)
        } else if !in_window && state.sleeping {
            let restore = state.saved_brightness.unwrap_or(DEFAULT_TARGET_BRIGHTNESS);
            let mut driver = self.driver.lock();
            driver.set_brightness(restore)?;
            driver.show()?;
            state.sleeping = false;
            state.saved_brightness = None;
            info!(brightness = restore, "Leaving sleep window");
            Ok(SleepTransition::Woke)
        } else {
            Ok(SleepTransition::Unchanged)
        }
    }

    fn run(&self) {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            "Sleep scheduler started"
        );
        let mut stop = self.stop_requested.lock();
        while !*stop {
            drop(stop);
            if let Err(err) = self.tick(Local::now().time()) {
                warn!(error = %err, "Sleep scheduler tick failed");
            }
            stop = self.stop_requested.lock();
            if !*stop {
                self.wake.wait_for(&mut stop, self.poll_interval);
            }
        }
        info!("Sleep scheduler stopped");
    }
}

/// Dims the wall between an off time and an on time each day.
pub struct SleepScheduler<D: LedDriver + 'static> {
    inner: Arc<Inner<D>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<D: LedDriver + 'static> SleepScheduler<D> {
    /// Scheduler with no window, polling every [`DEFAULT_POLL_INTERVAL`].
    pub fn new(driver: SharedDriver<D>) -> Self {
        Self::with_poll_interval(driver, DEFAULT_POLL_INTERVAL)
    }

    /// Scheduler with a custom poll interval.
    pub fn with_poll_interval(driver: SharedDriver<D>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                state: Mutex::new(SchedulerState::default()),
                stop_requested: Mutex::new(false),
                wake: Condvar::new(),
                poll_interval,
            }),
            handle: Mutex::new(None),
        }
    }

    /// Set the window from `HH:MM` strings.
    ///
    /// On a parse error the previous schedule is kept.
    pub fn set_schedule(&self, off_time: &str, on_time: &str, enabled: bool) -> LedResult<()> {
        let off = parse_time(off_time)?;
        let on = parse_time(on_time)?;
        if off == on {
            warn!(time = off_time, "Sleep window has equal off and on times and never applies");
        }
        self.inner.state.lock().window = Some(Window { off, on, enabled });
        info!(off = off_time, on = on_time, enabled, "Sleep schedule set");
        Ok(())
    }

    /// Turn the window on or off without changing its times.
    pub fn set_enabled(&self, enabled: bool) {
        if let Some(window) = self.inner.state.lock().window.as_mut() {
            window.enabled = enabled;
        }
    }

    /// Whether `now` falls inside an enabled window.
    pub fn should_sleep(&self, now: NaiveTime) -> bool {
        self.inner
            .state
            .lock()
            .window
            .is_some_and(|w| w.contains(now))
    }

    /// Apply the window for `now`, dimming or restoring as needed.
    pub fn tick(&self, now: NaiveTime) -> LedResult<SleepTransition> {
        self.inner.tick(now)
    }

    /// Current schedule and sleep state.
    pub fn schedule(&self) -> ScheduleStatus {
        let state = self.inner.state.lock();
        ScheduleStatus {
            enabled: state.window.is_some_and(|w| w.enabled),
            off_time: state.window.map(|w| w.off.format(TIME_FORMAT).to_string()),
            on_time: state.window.map(|w| w.on.format(TIME_FORMAT).to_string()),
            sleeping: state.sleeping,
            saved_brightness: state.saved_brightness,
        }
    }

    /// Start polling the wall clock on a background thread.
    pub fn start(&self) -> LedResult<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            debug!("Sleep scheduler already running");
            return Ok(());
        }
        *self.inner.stop_requested.lock() = false;

        let inner = Arc::clone(&self.inner);
        let join = thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_string())
            .spawn(move || inner.run())
            .map_err(|source| LedError::ThreadSpawn {
                name: SCHEDULER_THREAD_NAME,
                source,
            })?;
        *handle = Some(join);
        Ok(())
    }

    /// Stop the background thread. Brightness is left as it is.
    pub fn stop(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        *self.inner.stop_requested.lock() = true;
        self.inner.wake.notify_all();
        join_with_timeout(handle, STOP_TIMEOUT);
    }

    /// Whether the background thread is running.
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl<D: LedDriver + 'static> Drop for SleepScheduler<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn parse_time(value: &str) -> LedResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map_err(|e| LedError::Schedule(format!("invalid time '{}', expected HH:MM: {}", value, e)))
}
