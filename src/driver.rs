//! LED driver interface consumed by the display loop, plus a mock.
//!
//! The real GPIO/serial driver lives outside this crate. The display loop only
//! needs the operations below and treats every error as a single dropped frame;
//! reconnection and hardware fault recovery are the driver's own business.
//!
//! Drivers are not assumed to be internally thread-safe. They are shared as
//! [`SharedDriver`], and every writer (the display loop, a sleep scheduler, an
//! API handler) goes through the same mutex.

use crate::error::{LedError, LedResult};
use crate::frame::PhysicalFrame;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

/// Driver shared between the display loop and other brightness writers.
pub type SharedDriver<D> = Arc<Mutex<D>>;

/// Hardware operations the display loop needs.
pub trait LedDriver: Send {
    /// Latch a chain-ordered frame for the next `show`.
    fn set_frame(&mut self, frame: &PhysicalFrame) -> LedResult<()>;

    /// Push the latched frame to the LEDs.
    fn show(&mut self) -> LedResult<()>;

    /// Set global brightness.
    fn set_brightness(&mut self, brightness: u8) -> LedResult<()>;

    /// Current global brightness.
    fn brightness(&self) -> u8;

    /// Number of LEDs on the chain.
    fn led_count(&self) -> usize;

    /// Latch an all-black frame.
    fn clear(&mut self) -> LedResult<()>;

    /// Clear and show in one go.
    fn blank(&mut self) -> LedResult<()> {
        self.clear()?;
        self.show()
    }
}

/// Wrap a driver for sharing.
pub fn shared<D: LedDriver>(driver: D) -> SharedDriver<D> {
    Arc::new(Mutex::new(driver))
}

/// In-memory driver for tests and hardware-free runs.
///
/// Records every shown frame and brightness change. Faults can be injected to
/// exercise the display loop's error handling.
#[derive(Debug, Clone)]
pub struct MockLedDriver {
    led_count: usize,
    brightness: u8,
    pending: PhysicalFrame,
    shown: Vec<PhysicalFrame>,
    brightness_history: Vec<u8>,
    fail_next_frames: usize,
    panic_next_frames: usize,
    keep_history: bool,
}

impl MockLedDriver {
    /// Mock with `led_count` LEDs at brightness 128.
    pub fn new(led_count: usize) -> Self {
        Self {
            led_count,
            brightness: 128,
            pending: PhysicalFrame::black(led_count),
            shown: Vec::new(),
            brightness_history: Vec::new(),
            fail_next_frames: 0,
            panic_next_frames: 0,
            keep_history: true,
        }
    }

    /// Only keep the most recent shown frame (for long-running demos).
    pub fn without_history(mut self) -> Self {
        self.keep_history = false;
        self
    }

    /// Make the next `count` calls to `set_frame` fail.
    pub fn fail_next_frames(&mut self, count: usize) {
        self.fail_next_frames = count;
    }

    /// Make the next `count` calls to `set_frame` panic.
    pub fn panic_next_frames(&mut self, count: usize) {
        self.panic_next_frames = count;
    }

    /// Frames passed to `show`, oldest first.
    pub fn shown_frames(&self) -> &[PhysicalFrame] {
        &self.shown
    }

    /// Most recently shown frame.
    pub fn last_shown(&self) -> Option<&PhysicalFrame> {
        self.shown.last()
    }

    /// Number of `show` calls recorded.
    pub fn show_count(&self) -> usize {
        self.shown.len()
    }

    /// Every brightness value set, oldest first.
    pub fn brightness_history(&self) -> &[u8] {
        &self.brightness_history
    }
}

impl LedDriver for MockLedDriver {
    #[allow(clippy::panic)]
    fn set_frame(&mut self, frame: &PhysicalFrame) -> LedResult<()> {
        if self.panic_next_frames > 0 {
            self.panic_next_frames -= 1;
            panic!("mock driver panic injected");
        }
        if self.fail_next_frames > 0 {
            self.fail_next_frames -= 1;
            return Err(LedError::Driver("injected write failure".to_string()));
        }
        self.pending = frame.clone();
        Ok(())
    }

    fn show(&mut self) -> LedResult<()> {
        trace!(leds = self.pending.led_count(), "Mock show");
        if !self.keep_history {
            self.shown.clear();
        }
        self.shown.push(self.pending.clone());
        Ok(())
    }

    fn set_brightness(&mut self, brightness: u8) -> LedResult<()> {
        debug!(brightness, "Mock brightness set");
        self.brightness = brightness;
        self.brightness_history.push(brightness);
        Ok(())
    }

    fn brightness(&self) -> u8 {
        self.brightness
    }

    fn led_count(&self) -> usize {
        self.led_count
    }

    fn clear(&mut self) -> LedResult<()> {
        self.pending = PhysicalFrame::black(self.led_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_shows_black_frame() {
        let mut driver = MockLedDriver::new(4);
        driver
            .set_frame(&PhysicalFrame::from_vec(vec![9; 12]))
            .unwrap();
        driver.show().unwrap();
        driver.blank().unwrap();
        assert_eq!(driver.show_count(), 2);
        assert!(driver.last_shown().unwrap().is_black());
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut driver = MockLedDriver::new(1);
        driver.fail_next_frames(1);
        let frame = PhysicalFrame::black(1);
        assert!(matches!(driver.set_frame(&frame), Err(LedError::Driver(_))));
        assert!(driver.set_frame(&frame).is_ok());
    }

    #[test]
    fn without_history_keeps_latest_only() {
        let mut driver = MockLedDriver::new(1).without_history();
        for _ in 0..5 {
            driver.show().unwrap();
        }
        assert_eq!(driver.show_count(), 1);
    }
}
