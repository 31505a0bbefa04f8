//! Custom error types for the LED wall pipeline.
//!
//! This module defines `LedError`, the single error type used across the crate.
//! Built with `thiserror`, it gives one consistent way to report failures, from
//! configuration loading and validation to driver faults.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in a
//!   configuration file or environment override.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but is
//!   logically invalid (duplicate panel ids, panels outside the grid, ...). Raised by
//!   the eager validation step.
//! - **`Io`**: Wraps `std::io::Error` for file access.
//! - **`InvalidFrame`**: A frame payload whose size does not match its declared shape.
//! - **`Driver`**: A fault reported by an LED driver implementation. The display loop
//!   treats it as one dropped frame.
//!
//! The display loop never lets any of these escape a tick; they are logged and the
//! loop continues.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type LedResult<T> = std::result::Result<T, LedError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum LedError {
    /// Configuration source could not be parsed or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure while saving a configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML encoding failure while saving a configuration.
    #[error("TOML error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Frame payload does not match its declared dimensions.
    #[error("Invalid frame: expected {expected} bytes for {width}x{height}, got {actual}")]
    InvalidFrame {
        /// Declared width in pixels.
        width: usize,
        /// Declared height in pixels.
        height: usize,
        /// Expected payload size in bytes.
        expected: usize,
        /// Actual payload size in bytes.
        actual: usize,
    },

    /// Fault reported by an LED driver.
    #[error("LED driver error: {0}")]
    Driver(String),

    /// Invalid sleep schedule.
    #[error("Schedule error: {0}")]
    Schedule(String),

    /// A background thread could not be spawned.
    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        /// Thread name.
        name: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },
}

impl From<figment::Error> for LedError {
    fn from(value: figment::Error) -> Self {
        LedError::Config(Box::new(value))
    }
}

impl LedError {
    /// Whether the display loop can keep running after this error.
    ///
    /// Everything except thread spawn failures degrades a single tick or a single
    /// reload attempt.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LedError::ThreadSpawn { .. })
    }
}
