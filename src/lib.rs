//! # ledwall
//!
//! Real-time frame pipeline for a wall of addressable LED panels driven as one
//! serial data chain. Producers render frames on a flat virtual canvas; the
//! display loop maps each one onto the physical chain order, keeps the whole
//! wall within its power supply budget, and paces output to a target frame rate.
//!
//! ## Crate Structure
//!
//! - **`frame`**: `VirtualFrame` (row-major RGB canvas), `PhysicalFrame`
//!   (chain-ordered RGB) and built-in test patterns.
//! - **`mapper`**: `CoordinateMapper`, which precomputes a lookup table from the
//!   panel layout (serpentine wiring, per-panel rotation, display rotation) and
//!   swaps it atomically on reload.
//! - **`power`**: `PowerLimiter`, brightness capping and ramping against a
//!   current budget.
//! - **`queue`**: `FrameQueue` (bounded, drop-on-full), `ReloadSignal`, and
//!   `ProducerHandle` tokens that keep two producers from interleaving.
//! - **`driver`**: the `LedDriver` trait the loop writes to and `MockLedDriver`.
//! - **`controller`**: `DisplayController`, the single consumer thread.
//! - **`scheduler`**: `SleepScheduler`, the nightly dimming window.
//! - **`config`**: typed configuration loaded with Figment (JSON or TOML plus
//!   `LEDWALL_` environment overrides) and validated on every load.
//! - **`error`**: the crate-wide `LedError`.
//! - **`logging`**: `tracing-subscriber` setup.
//!
//! ## Example
//!
//! ```no_run
//! use ledwall::config::{ConfigManager, FileConfigManager};
//! use ledwall::controller::{ControllerSettings, DisplayController};
//! use ledwall::driver::{shared, MockLedDriver};
//! use ledwall::frame::TestPattern;
//! use ledwall::mapper::CoordinateMapper;
//! use ledwall::queue::{FrameQueue, ReloadSignal};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Arc::new(FileConfigManager::new());
//! let config = manager.load_config("wall.json".as_ref())?;
//!
//! let mapper = Arc::new(CoordinateMapper::new(&config));
//! let queue = Arc::new(FrameQueue::new(config.runtime.queue_capacity));
//! let controller = DisplayController::new(
//!     shared(MockLedDriver::new(config.total_leds())),
//!     mapper,
//!     Arc::clone(&queue),
//!     ReloadSignal::new(),
//!     manager,
//!     "wall.json",
//!     ControllerSettings::from_runtime(&config.runtime),
//! );
//! controller.start()?;
//!
//! let (w, h) = controller.mapper().canvas_dimensions();
//! let _ = queue.try_put(TestPattern::Gradient.render(w, h));
//! controller.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod frame;
pub mod logging;
pub mod mapper;
pub mod power;
pub mod queue;
pub mod scheduler;

pub use config::{ConfigManager, DisplayConfig, FileConfigManager};
pub use controller::{ControllerSettings, ControllerStats, DisplayController};
pub use driver::{LedDriver, MockLedDriver, SharedDriver};
pub use error::{LedError, LedResult};
pub use frame::{PhysicalFrame, TestPattern, VirtualFrame};
pub use mapper::CoordinateMapper;
pub use power::{PowerLimiter, PowerStats};
pub use queue::{FrameQueue, ProducerHandle, ReloadSignal};
pub use scheduler::SleepScheduler;
