//! Virtual-to-physical coordinate mapping.
//!
//! The mapper precomputes a flat lookup table (LUT) indexed by physical LED index,
//! where each entry names the virtual `(y, x)` pixel that LED shows. The table
//! accounts for:
//!
//! - panel placement in the grid
//! - per-panel mounting rotation
//! - serpentine wiring inside each panel (odd rows run right to left)
//! - a global display rotation applied to incoming frames
//!
//! # Hot reload
//!
//! Each configuration becomes an immutable [`MappingSnapshot`]. [`CoordinateMapper::reload`]
//! builds the new snapshot without holding any lock and then swaps it in under the
//! write lock. Readers clone the snapshot `Arc` under the read lock, so a frame is
//! always mapped with one complete table and its matching dimensions.
//!
//! ```text
//! 2x1 grid of 4x2 panels, serpentine:
//!
//!   panel 0          panel 1
//!   0  1  2  3   |   8  9 10 11
//!   7  6  5  4   |  15 14 13 12
//! ```

use crate::config::DisplayConfig;
use crate::frame::{rotated_source, PhysicalFrame, VirtualFrame, CHANNELS};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Rotation in 90° steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    /// No rotation.
    #[default]
    Deg0,
    /// Quarter turn.
    Deg90,
    /// Half turn.
    Deg180,
    /// Three-quarter turn.
    Deg270,
}

impl Rotation {
    /// Exact conversion from degrees.
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    /// Conversion that falls back to 0° (with a warning) for unknown values.
    pub fn from_degrees_lossy(degrees: u16) -> Self {
        Self::from_degrees(degrees).unwrap_or_else(|| {
            warn!(rotation = degrees, "Invalid rotation, using 0 degrees");
            Self::Deg0
        })
    }

    /// Angle in degrees.
    pub fn degrees(self) -> u16 {
        self.quarter_turns() as u16 * 90
    }

    /// Number of 90° steps.
    pub fn quarter_turns(self) -> u8 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 1,
            Self::Deg180 => 2,
            Self::Deg270 => 3,
        }
    }

    /// Transform panel-local `(x, y)` for a `width × height` panel.
    ///
    /// 90° and 270° are only closed over the panel when it is square.
    pub fn apply(self, x: usize, y: usize, width: usize, height: usize) -> (usize, usize) {
        match self {
            Self::Deg0 => (x, y),
            Self::Deg90 => (height - 1 - y, x),
            Self::Deg180 => (width - 1 - x, height - 1 - y),
            Self::Deg270 => (y, width - 1 - x),
        }
    }
}

/// Panel-local `(x, y)` of the `index`-th LED on a serpentine-wired panel.
pub fn serpentine_local(index: usize, width: usize) -> (usize, usize) {
    let row = index / width;
    let mut col = index % width;
    if row % 2 == 1 {
        col = width - 1 - col;
    }
    (col, row)
}

/// Virtual pixel shown by one physical LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LutEntry {
    /// Virtual row.
    pub y: usize,
    /// Virtual column.
    pub x: usize,
}

/// Flat physical-index → virtual-pixel table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LookupTable {
    entries: Vec<LutEntry>,
}

impl LookupTable {
    /// Build the table for `config`, walking panels in ascending id order.
    pub fn build(config: &DisplayConfig) -> Self {
        let w = config.grid.panel_width;
        let h = config.grid.panel_height;
        let total_leds = config.total_leds();
        let mut entries = Vec::with_capacity(total_leds);

        let mut panels: Vec<_> = config.panels.iter().collect();
        panels.sort_by_key(|panel| panel.id);

        'panels: for panel in panels {
            let rotation = Rotation::from_degrees_lossy(panel.rotation);
            let (gx, gy) = panel.grid_position;
            let (base_x, base_y) = (gx * w, gy * h);
            debug!(
                panel = panel.id,
                gx,
                gy,
                rotation = rotation.degrees(),
                base_x,
                base_y,
                "Mapping panel"
            );

            for idx in 0..w * h {
                if entries.len() >= total_leds {
                    error!(
                        panel = panel.id,
                        total_leds, "LED index exceeds chain length, truncating lookup table"
                    );
                    break 'panels;
                }
                let (local_x, local_y) = serpentine_local(idx, w);
                let (rx, ry) = rotation.apply(local_x, local_y, w, h);
                entries.push(LutEntry {
                    y: base_y + ry,
                    x: base_x + rx,
                });
            }
        }

        info!(mappings = entries.len(), "Lookup table built");
        Self { entries }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for physical LED `index`.
    pub fn get(&self, index: usize) -> Option<LutEntry> {
        self.entries.get(index).copied()
    }

    /// All entries in chain order.
    pub fn entries(&self) -> &[LutEntry] {
        &self.entries
    }
}

/// Immutable mapping state for one configuration.
#[derive(Debug, Clone)]
pub struct MappingSnapshot {
    /// Display width in pixels.
    pub total_width: usize,
    /// Display height in pixels.
    pub total_height: usize,
    /// LEDs on the chain.
    pub total_leds: usize,
    /// Rotation applied to incoming frames.
    pub display_rotation: Rotation,
    /// Physical → virtual table.
    pub lut: LookupTable,
}

impl MappingSnapshot {
    /// Build a snapshot for `config`.
    pub fn build(config: &DisplayConfig) -> Self {
        Self {
            total_width: config.total_width(),
            total_height: config.total_height(),
            total_leds: config.total_leds(),
            display_rotation: Rotation::from_degrees_lossy(config.grid.display_rotation),
            lut: LookupTable::build(config),
        }
    }

    fn map_frame(&self, frame: &VirtualFrame) -> PhysicalFrame {
        let k = self.display_rotation.quarter_turns();
        let (in_w, in_h) = (frame.width(), frame.height());
        let (rot_w, rot_h) = if k % 2 == 1 { (in_h, in_w) } else { (in_w, in_h) };

        if (rot_h, rot_w) != (self.total_height, self.total_width) {
            error!(
                shape = ?frame.shape(),
                expected = ?(self.total_height, self.total_width, CHANNELS),
                display_rotation = self.display_rotation.degrees(),
                "Invalid frame shape, sending black frame"
            );
            return PhysicalFrame::black(self.total_leds);
        }

        let src = frame.as_bytes();
        let mut out = vec![0u8; self.total_leds * CHANNELS];
        for (dst, entry) in out.chunks_exact_mut(CHANNELS).zip(self.lut.entries()) {
            if entry.x >= rot_w || entry.y >= rot_h {
                continue;
            }
            let (sx, sy) = rotated_source(k, entry.x, entry.y, in_w, in_h);
            let offset = (sy * in_w + sx) * CHANNELS;
            if let Some(px) = src.get(offset..offset + CHANNELS) {
                dst.copy_from_slice(px);
            }
        }
        PhysicalFrame::from_vec(out)
    }
}

/// Thread-safe mapper from virtual frames to chain order.
#[derive(Debug)]
pub struct CoordinateMapper {
    snapshot: RwLock<Arc<MappingSnapshot>>,
}

impl CoordinateMapper {
    /// Build the initial mapping.
    pub fn new(config: &DisplayConfig) -> Self {
        let snapshot = MappingSnapshot::build(config);
        info!(
            width = snapshot.total_width,
            height = snapshot.total_height,
            leds = snapshot.total_leds,
            "Coordinate mapper initialized"
        );
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Current snapshot; stays valid even if a reload happens afterwards.
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Map a virtual frame to physical LED order.
    ///
    /// Frames whose shape (after display rotation) does not match the display
    /// produce an all-black frame of the current LED count.
    pub fn map_frame(&self, frame: &VirtualFrame) -> PhysicalFrame {
        self.snapshot().map_frame(frame)
    }

    /// Replace the mapping with one built from `config`.
    pub fn reload(&self, config: &DisplayConfig) {
        info!("Reloading coordinate mapping");
        let next = Arc::new(MappingSnapshot::build(config));
        *self.snapshot.write() = next;
        info!("Coordinate mapping reloaded");
    }

    /// `(width, height)` of the display in pixels.
    pub fn dimensions(&self) -> (usize, usize) {
        let snapshot = self.snapshot.read();
        (snapshot.total_width, snapshot.total_height)
    }

    /// `(width, height)` producers should render at: the display size with
    /// width and height swapped under a 90° or 270° display rotation.
    pub fn canvas_dimensions(&self) -> (usize, usize) {
        let snapshot = self.snapshot.read();
        if snapshot.display_rotation.quarter_turns() % 2 == 1 {
            (snapshot.total_height, snapshot.total_width)
        } else {
            (snapshot.total_width, snapshot.total_height)
        }
    }

    /// LEDs on the chain.
    pub fn led_count(&self) -> usize {
        self.snapshot.read().total_leds
    }

    /// Physical index of the LED showing virtual pixel `(x, y)`.
    ///
    /// Linear search; meant for debugging, not the frame path.
    pub fn virtual_to_physical(&self, x: usize, y: usize) -> Option<usize> {
        let snapshot = self.snapshot();
        if x >= snapshot.total_width || y >= snapshot.total_height {
            return None;
        }
        snapshot
            .lut
            .entries()
            .iter()
            .position(|entry| entry.x == x && entry.y == y)
    }
}
