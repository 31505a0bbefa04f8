//! Typed panel-wall configuration.
//!
//! Configuration is loaded with Figment from:
//! 1. a JSON or TOML file (chosen by extension, JSON by default)
//! 2. environment variables prefixed with `LEDWALL_`, using `__` between nested keys
//!    (e.g. `LEDWALL_RUNTIME__TARGET_FPS=60`)
//!
//! Every load is validated eagerly so the display loop only ever sees a config
//! that produces an in-bounds lookup table.
//!
//! # Example
//! ```no_run
//! use ledwall::config::{ConfigManager, FileConfigManager};
//!
//! let manager = FileConfigManager::new();
//! let config = manager.load_config("configs/current.json".as_ref())?;
//! println!("{}x{} display", config.total_width(), config.total_height());
//! # Ok::<(), ledwall::error::LedError>(())
//! ```

use crate::error::{LedError, LedResult};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "LEDWALL_";

/// Rotations accepted for panels and the whole display, in degrees.
pub const VALID_ROTATIONS: [u16; 4] = [0, 90, 180, 270];

/// Geometry shared by every panel in the wall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Width of one panel in LEDs.
    pub panel_width: usize,
    /// Height of one panel in LEDs.
    pub panel_height: usize,
    /// Number of panel slots horizontally.
    pub grid_width: usize,
    /// Number of panel slots vertically.
    pub grid_height: usize,
    /// Rotation applied to every incoming frame before mapping.
    #[serde(default)]
    pub display_rotation: u16,
}

/// One physical panel. Ascending `id` is the order along the data chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Chain position key.
    pub id: u32,
    /// Slot `(gx, gy)` in the panel grid.
    #[serde(alias = "position")]
    pub grid_position: (usize, usize),
    /// Mounting rotation of this panel, in degrees.
    #[serde(default)]
    pub rotation: u16,
}

/// Power budget settings applied to the limiter at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerSettings {
    /// Current budget in Amps.
    pub max_current_amps: f64,
    /// Whether limiting is applied at all.
    pub enabled: bool,
    /// Whether brightness is ramped towards the budget instead of only capped.
    pub dynamic_mode: bool,
}

impl Default for PowerSettings {
    fn default() -> Self {
        Self {
            max_current_amps: 80.0,
            enabled: true,
            dynamic_mode: false,
        }
    }
}

/// Process-level knobs for the display loop and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Frame pacing target.
    pub target_fps: u32,
    /// Capacity of the frame queue.
    pub queue_capacity: usize,
    /// Power limiter settings.
    pub power: PowerSettings,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            target_fps: 30,
            queue_capacity: 10,
            power: PowerSettings::default(),
        }
    }
}

/// Complete wall configuration.
///
/// `display_rotation` is also accepted at the top level of a file, as older
/// layout files store it there. It is folded into [`GridConfig`] on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DisplayConfigFile")]
pub struct DisplayConfig {
    /// Panel and grid geometry.
    pub grid: GridConfig,
    /// Panels in any order; chain order comes from `id`.
    pub panels: Vec<PanelConfig>,
    /// Runtime settings.
    pub runtime: RuntimeSettings,
}

/// On-disk shape of [`DisplayConfig`].
#[derive(Deserialize)]
struct DisplayConfigFile {
    grid: GridConfig,
    panels: Vec<PanelConfig>,
    #[serde(default)]
    runtime: RuntimeSettings,
    #[serde(default)]
    display_rotation: Option<u16>,
}

impl TryFrom<DisplayConfigFile> for DisplayConfig {
    type Error = String;

    fn try_from(file: DisplayConfigFile) -> Result<Self, Self::Error> {
        let mut grid = file.grid;
        if let Some(rotation) = file.display_rotation {
            // a grid value of 0 is indistinguishable from an absent one
            if grid.display_rotation != 0 && grid.display_rotation != rotation {
                return Err(format!(
                    "display_rotation is {} at the top level but {} under grid",
                    rotation, grid.display_rotation
                ));
            }
            grid.display_rotation = rotation;
        }
        Ok(Self {
            grid,
            panels: file.panels,
            runtime: file.runtime,
        })
    }
}

impl DisplayConfig {
    /// Build a config with default runtime settings.
    pub fn new(grid: GridConfig, panels: Vec<PanelConfig>) -> Self {
        Self {
            grid,
            panels,
            runtime: RuntimeSettings::default(),
        }
    }

    /// Raster-ordered grid where every slot holds an unrotated panel.
    ///
    /// Panel ids run left to right, top to bottom.
    pub fn uniform(
        panel_width: usize,
        panel_height: usize,
        grid_width: usize,
        grid_height: usize,
    ) -> Self {
        let panels = (0..grid_height)
            .flat_map(|gy| (0..grid_width).map(move |gx| (gx, gy)))
            .enumerate()
            .map(|(id, grid_position)| PanelConfig {
                id: id as u32,
                grid_position,
                rotation: 0,
            })
            .collect();

        Self::new(
            GridConfig {
                panel_width,
                panel_height,
                grid_width,
                grid_height,
                display_rotation: 0,
            },
            panels,
        )
    }

    /// Display width in pixels.
    pub fn total_width(&self) -> usize {
        self.grid.grid_width * self.grid.panel_width
    }

    /// Display height in pixels.
    pub fn total_height(&self) -> usize {
        self.grid.grid_height * self.grid.panel_height
    }

    /// Number of LEDs on the chain.
    pub fn total_leds(&self) -> usize {
        self.panels.len() * self.grid.panel_width * self.grid.panel_height
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> LedResult<()> {
        let grid = &self.grid;
        if grid.panel_width == 0 || grid.panel_height == 0 {
            return Err(invalid(format!(
                "panel dimensions must be non-zero, got {}x{}",
                grid.panel_width, grid.panel_height
            )));
        }
        if grid.grid_width == 0 || grid.grid_height == 0 {
            return Err(invalid(format!(
                "grid dimensions must be non-zero, got {}x{}",
                grid.grid_width, grid.grid_height
            )));
        }
        if self.total_width() > u16::MAX as usize || self.total_height() > u16::MAX as usize {
            return Err(invalid(format!(
                "display {}x{} exceeds the maximum of {} pixels per side",
                self.total_width(),
                self.total_height(),
                u16::MAX
            )));
        }
        if !VALID_ROTATIONS.contains(&grid.display_rotation) {
            return Err(invalid(format!(
                "invalid display_rotation {}. Must be one of 0, 90, 180, 270",
                grid.display_rotation
            )));
        }
        if self.panels.is_empty() {
            return Err(invalid("at least one panel is required".to_string()));
        }

        let mut ids = HashSet::new();
        let mut positions = HashSet::new();
        for panel in &self.panels {
            if !ids.insert(panel.id) {
                return Err(invalid(format!("duplicate panel id: {}", panel.id)));
            }
            let (gx, gy) = panel.grid_position;
            if gx >= grid.grid_width || gy >= grid.grid_height {
                return Err(invalid(format!(
                    "panel {} at [{}, {}] is outside the {}x{} grid",
                    panel.id, gx, gy, grid.grid_width, grid.grid_height
                )));
            }
            if !positions.insert(panel.grid_position) {
                return Err(invalid(format!(
                    "panel {} shares grid position [{}, {}] with another panel",
                    panel.id, gx, gy
                )));
            }
            if !VALID_ROTATIONS.contains(&panel.rotation) {
                return Err(invalid(format!(
                    "panel {} has invalid rotation {}. Must be one of 0, 90, 180, 270",
                    panel.id, panel.rotation
                )));
            }
            if matches!(panel.rotation, 90 | 270) && grid.panel_width != grid.panel_height {
                return Err(invalid(format!(
                    "panel {} is rotated {} degrees but panels are not square ({}x{})",
                    panel.id, panel.rotation, grid.panel_width, grid.panel_height
                )));
            }
        }

        let runtime = &self.runtime;
        crate::logging::parse_log_level(&runtime.log_level).map_err(invalid)?;
        if runtime.target_fps == 0 {
            return Err(invalid("target_fps must be greater than 0".to_string()));
        }
        if runtime.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0".to_string()));
        }
        let amps = runtime.power.max_current_amps;
        if !amps.is_finite() || amps <= 0.0 {
            return Err(invalid(format!(
                "max_current_amps must be positive and finite, got {}",
                amps
            )));
        }

        Ok(())
    }
}

fn invalid(message: String) -> LedError {
    LedError::Configuration(message)
}

/// Source of configurations for the display loop.
///
/// Implementations must be callable from the display-loop thread.
pub trait ConfigManager: Send + Sync {
    /// Load (and validate) a configuration from `path`.
    fn load_config(&self, path: &Path) -> LedResult<DisplayConfig>;

    /// Check a configuration without loading anything.
    fn validate_config(&self, config: &DisplayConfig) -> LedResult<()> {
        config.validate()
    }
}

/// File-backed configuration manager using Figment.
#[derive(Debug, Clone)]
pub struct FileConfigManager {
    env_prefix: String,
}

impl Default for FileConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FileConfigManager {
    /// Manager reading environment overrides with the default prefix.
    pub fn new() -> Self {
        Self {
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Manager with a custom environment prefix.
    pub fn with_env_prefix(prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: prefix.into(),
        }
    }

    fn figment_for(&self, path: &Path) -> Figment {
        let figment = if is_toml(path) {
            Figment::new().merge(Toml::file(path))
        } else {
            Figment::new().merge(Json::file(path))
        };
        figment.merge(Env::prefixed(&self.env_prefix).split("__"))
    }

    /// Write `config` to `path`, JSON unless the extension is `.toml`.
    ///
    /// With `create_backup`, an existing file is first copied to `<file>.bak`.
    pub fn save_config(
        &self,
        config: &DisplayConfig,
        path: &Path,
        create_backup: bool,
    ) -> LedResult<()> {
        config.validate()?;

        if create_backup && path.exists() {
            let backup = backup_path(path);
            fs::copy(path, &backup)?;
            debug!(backup = %backup.display(), "Configuration backup written");
        }

        let contents = if is_toml(path) {
            toml::to_string_pretty(config)?
        } else {
            serde_json::to_string_pretty(config)?
        };
        fs::write(path, contents)?;

        info!(path = %path.display(), panels = config.panels.len(), "Configuration saved");
        Ok(())
    }
}

impl ConfigManager for FileConfigManager {
    fn load_config(&self, path: &Path) -> LedResult<DisplayConfig> {
        if !path.is_file() {
            return Err(LedError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("configuration file not found: {}", path.display()),
            )));
        }

        let config: DisplayConfig = self.figment_for(path).extract()?;
        self.validate_config(&config)?;

        info!(
            path = %path.display(),
            width = config.total_width(),
            height = config.total_height(),
            leds = config.total_leds(),
            "Configuration loaded"
        );
        Ok(config)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

/// Location of the backup written by [`FileConfigManager::save_config`].
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}
