//! Closed-loop brightness limiting against a current budget.
//!
//! The current model is the coarse linear one the wall has always used: the
//! average channel intensity of the frame times a per-LED full-white constant,
//! scaled by global brightness. It ignores per-channel differences and gamma on
//! purpose; the budget numbers in deployed configs are tuned against it.
//!
//! Two modes:
//! - **Standard**: brightness passes through untouched until the frame would
//!   exceed the budget, then it is capped to the highest safe value.
//! - **Dynamic**: brightness tracks the highest safe value, ramping up by a small
//!   step per frame and snapping down immediately when content gets brighter.

use crate::config::PowerSettings;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// Supply voltage of the LED chain.
pub const LED_VOLTAGE: f64 = 5.0;

/// Draw of one LED at full white and full brightness, in milliamps.
pub const MAX_CURRENT_PER_LED_MA: f64 = 60.0;

/// Brightness the dynamic target starts from (and resets to).
pub const DEFAULT_TARGET_BRIGHTNESS: u8 = 128;

/// Per-frame ramp-up step in dynamic mode.
pub const DEFAULT_BRIGHTNESS_STEP: u8 = 2;

/// Counter period for rate-limited info logs.
const LOG_EVERY: u64 = 100;

#[derive(Debug, Clone)]
struct LimiterState {
    led_count: usize,
    max_current_amps: f64,
    enabled: bool,
    dynamic_mode: bool,
    target_brightness: u8,
    brightness_step: u8,
    optimization_count: u64,
    limit_applied_count: u64,
    last_limited_brightness: Option<u8>,
}

/// Snapshot of limiter state for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerStats {
    /// LEDs the current model is computed for.
    pub led_count: usize,
    /// Whether limiting is active.
    pub enabled: bool,
    /// Whether dynamic optimization is active.
    pub dynamic_mode: bool,
    /// Budget in Amps.
    pub max_current_amps: f64,
    /// Budget in Watts at [`LED_VOLTAGE`].
    pub max_power_watts: f64,
    /// Frames where brightness was reduced.
    pub limit_applied_count: u64,
    /// Dynamic ramp-up steps taken.
    pub optimization_count: u64,
    /// Dynamic target, only reported in dynamic mode.
    pub target_brightness: Option<u8>,
    /// Last brightness standard mode capped to.
    pub last_limited_brightness: Option<u8>,
    /// Draw of the whole chain at full white.
    pub max_theoretical_current_amps: f64,
}

/// Brightness limiter shared between the display loop and control paths.
///
/// All state sits behind one mutex so setters called from another thread never
/// leave the display loop looking at a half-updated configuration.
#[derive(Debug)]
pub struct PowerLimiter {
    state: Mutex<LimiterState>,
}

impl PowerLimiter {
    /// Create a limiter for `led_count` LEDs.
    pub fn new(led_count: usize, max_current_amps: f64, enabled: bool, dynamic_mode: bool) -> Self {
        let max_current_amps = if max_current_amps.is_finite() && max_current_amps > 0.0 {
            max_current_amps
        } else {
            warn!(max_current_amps, "Invalid current limit, using 8.5A");
            8.5
        };

        info!(
            max_current_amps,
            led_count,
            max_theoretical_amps = theoretical_max_amps(led_count),
            enabled,
            dynamic_mode,
            "Power limiter initialized"
        );

        Self {
            state: Mutex::new(LimiterState {
                led_count,
                max_current_amps,
                enabled,
                dynamic_mode,
                target_brightness: DEFAULT_TARGET_BRIGHTNESS,
                brightness_step: DEFAULT_BRIGHTNESS_STEP,
                optimization_count: 0,
                limit_applied_count: 0,
                last_limited_brightness: None,
            }),
        }
    }

    /// Expected draw in Amps for `frame` (chain-ordered RGB bytes) at `brightness`.
    pub fn calculate_frame_current(&self, frame: &[u8], brightness: u8) -> f64 {
        frame_current(self.state.lock().led_count, frame, brightness)
    }

    /// Highest brightness in `1..=255` keeping `frame` within the budget.
    pub fn calculate_max_safe_brightness(&self, frame: &[u8]) -> u8 {
        let state = self.state.lock();
        max_safe_brightness(&state, frame)
    }

    /// Brightness to use for `frame` given the `requested` level.
    ///
    /// Returns the brightness and whether it differs from the request.
    pub fn limit_brightness_for_frame(&self, frame: &[u8], requested: u8) -> (u8, bool) {
        let mut state = self.state.lock();
        if !state.enabled || frame.is_empty() {
            return (requested, false);
        }

        let max_safe = max_safe_brightness(&state, frame);

        if state.dynamic_mode {
            if state.target_brightness < max_safe {
                state.target_brightness = state
                    .target_brightness
                    .saturating_add(state.brightness_step)
                    .min(max_safe);
                state.optimization_count += 1;
            } else if state.target_brightness > max_safe {
                state.target_brightness = max_safe;
                state.limit_applied_count += 1;
            }

            let output = state.target_brightness.min(max_safe);
            let modified = output != requested;
            if modified && state.optimization_count % LOG_EVERY == 1 {
                info!(
                    requested,
                    output,
                    max_safe,
                    target = state.target_brightness,
                    "Dynamic brightness"
                );
            }
            return (output, modified);
        }

        let current = frame_current(state.led_count, frame, requested);
        if current <= state.max_current_amps {
            return (requested, false);
        }

        if max_safe < requested {
            state.limit_applied_count += 1;
            state.last_limited_brightness = Some(max_safe);
            if state.limit_applied_count % LOG_EVERY == 1 {
                info!(
                    requested,
                    limited = max_safe,
                    current_amps = current,
                    limit_amps = state.max_current_amps,
                    "Power limit active"
                );
            }
            return (max_safe, true);
        }

        (requested, false)
    }

    /// Enable or disable limiting. Disabling resets the limit counters.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled;
        if !enabled {
            state.limit_applied_count = 0;
            state.last_limited_brightness = None;
        }
        info!(enabled, "Power limiting toggled");
    }

    /// Change the budget. Non-positive or non-finite values are ignored.
    pub fn set_max_current(&self, max_current_amps: f64) {
        if !(max_current_amps.is_finite() && max_current_amps > 0.0) {
            warn!(max_current_amps, "Invalid current limit ignored");
            return;
        }
        self.state.lock().max_current_amps = max_current_amps;
        info!(max_current_amps, "Power limit set");
    }

    /// Enable or disable dynamic mode. Disabling resets the ramp target.
    pub fn set_dynamic_mode(&self, dynamic_mode: bool) {
        let mut state = self.state.lock();
        state.dynamic_mode = dynamic_mode;
        if !dynamic_mode {
            state.optimization_count = 0;
            state.target_brightness = DEFAULT_TARGET_BRIGHTNESS;
        }
        info!(dynamic_mode, "Dynamic brightness optimization toggled");
    }

    /// Apply reloaded power settings, changing only the fields that differ.
    ///
    /// Returns whether anything changed. Resets follow the individual setters.
    pub fn apply_settings(&self, settings: &PowerSettings) -> bool {
        let mut state = self.state.lock();
        let mut changed = false;

        let amps = settings.max_current_amps;
        if amps.is_finite() && amps > 0.0 && amps != state.max_current_amps {
            state.max_current_amps = amps;
            changed = true;
        }
        if settings.enabled != state.enabled {
            state.enabled = settings.enabled;
            if !settings.enabled {
                state.limit_applied_count = 0;
                state.last_limited_brightness = None;
            }
            changed = true;
        }
        if settings.dynamic_mode != state.dynamic_mode {
            state.dynamic_mode = settings.dynamic_mode;
            if !settings.dynamic_mode {
                state.optimization_count = 0;
                state.target_brightness = DEFAULT_TARGET_BRIGHTNESS;
            }
            changed = true;
        }

        if changed {
            info!(
                max_current_amps = state.max_current_amps,
                enabled = state.enabled,
                dynamic_mode = state.dynamic_mode,
                "Power settings updated"
            );
        }
        changed
    }

    /// Update the chain length after a configuration change.
    pub fn set_led_count(&self, led_count: usize) {
        let mut state = self.state.lock();
        if state.led_count != led_count {
            info!(from = state.led_count, to = led_count, "Power limiter LED count updated");
            state.led_count = led_count;
        }
    }

    /// Dynamic-mode target brightness.
    pub fn target_brightness(&self) -> u8 {
        self.state.lock().target_brightness
    }

    /// Current state snapshot.
    pub fn stats(&self) -> PowerStats {
        let state = self.state.lock();
        PowerStats {
            led_count: state.led_count,
            enabled: state.enabled,
            dynamic_mode: state.dynamic_mode,
            max_current_amps: state.max_current_amps,
            max_power_watts: state.max_current_amps * LED_VOLTAGE,
            limit_applied_count: state.limit_applied_count,
            optimization_count: state.optimization_count,
            target_brightness: state.dynamic_mode.then_some(state.target_brightness),
            last_limited_brightness: state.last_limited_brightness,
            max_theoretical_current_amps: theoretical_max_amps(state.led_count),
        }
    }
}

fn theoretical_max_amps(led_count: usize) -> f64 {
    led_count as f64 * MAX_CURRENT_PER_LED_MA / 1000.0
}

fn frame_current(led_count: usize, frame: &[u8], brightness: u8) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let max_possible_sum = (led_count * 3 * 255) as f64;
    if max_possible_sum <= 0.0 {
        return 0.0;
    }

    let total: u64 = frame.iter().map(|&b| u64::from(b)).sum();
    let intensity = total as f64 / max_possible_sum;
    let brightness_factor = f64::from(brightness) / 255.0;

    let per_led_ma = MAX_CURRENT_PER_LED_MA * intensity * brightness_factor;
    per_led_ma * led_count as f64 / 1000.0
}

fn max_safe_brightness(state: &LimiterState, frame: &[u8]) -> u8 {
    if frame.is_empty() {
        return 255;
    }
    let at_full = frame_current(state.led_count, frame, 255);
    if at_full <= 0.0 {
        return 255;
    }
    let safe = (state.max_current_amps / at_full * 255.0).round();
    safe.clamp(1.0, 255.0) as u8
}
