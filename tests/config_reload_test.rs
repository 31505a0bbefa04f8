//! Integration tests for configuration files, environment overrides and hot reload.

use ledwall::config::{backup_path, ConfigManager, DisplayConfig, FileConfigManager};
use ledwall::controller::{ControllerSettings, DisplayController};
use ledwall::driver::{shared, MockLedDriver};
use ledwall::error::LedError;
use ledwall::frame::VirtualFrame;
use ledwall::mapper::CoordinateMapper;
use ledwall::queue::{FrameQueue, ReloadSignal};
use serial_test::serial;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing_test::traced_test;

const TEST_PREFIX: &str = "LEDWALL_TEST_";

const WALL_JSON: &str = r#"{
    "grid": {"panel_width": 16, "panel_height": 16, "grid_width": 2, "grid_height": 1},
    "panels": [
        {"id": 0, "position": [0, 0], "rotation": 0},
        {"id": 1, "position": [1, 0], "rotation": 180}
    ]
}"#;

const WALL_TOML: &str = r#"
[grid]
panel_width = 8
panel_height = 8
grid_width = 1
grid_height = 2
display_rotation = 90

[[panels]]
id = 0
grid_position = [0, 0]

[[panels]]
id = 1
grid_position = [0, 1]
rotation = 270

[runtime]
log_level = "debug"
target_fps = 60

[runtime.power]
max_current_amps = 20.0
dynamic_mode = true
"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn manager() -> FileConfigManager {
    FileConfigManager::with_env_prefix(TEST_PREFIX)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn controller_for(
    path: &Path,
) -> (DisplayController<MockLedDriver>, ReloadSignal, Arc<FrameQueue>) {
    let manager = Arc::new(manager());
    let config = manager.load_config(path).unwrap();
    let reload = ReloadSignal::new();
    let queue = Arc::new(FrameQueue::new(10));
    let controller = DisplayController::new(
        shared(MockLedDriver::new(config.total_leds())),
        Arc::new(CoordinateMapper::new(&config)),
        Arc::clone(&queue),
        reload.clone(),
        manager,
        path,
        ControllerSettings::from_runtime(&config.runtime),
    );
    (controller, reload, queue)
}

#[test]
#[serial]
fn test_load_json_with_position_alias() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "wall.json", WALL_JSON);
    let config = manager().load_config(&path).unwrap();

    assert_eq!(config.total_width(), 32);
    assert_eq!(config.total_height(), 16);
    assert_eq!(config.panels[1].grid_position, (1, 0));
    assert_eq!(config.panels[1].rotation, 180);
    assert_eq!(config.runtime.target_fps, 30);
    assert_eq!(config.runtime.power.max_current_amps, 80.0);
}

#[test]
#[serial]
fn test_load_toml_with_runtime_section() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "wall.toml", WALL_TOML);
    let config = manager().load_config(&path).unwrap();

    assert_eq!(config.grid.display_rotation, 90);
    assert_eq!(config.total_leds(), 128);
    assert_eq!(config.runtime.log_level, "debug");
    assert_eq!(config.runtime.target_fps, 60);
    assert!(config.runtime.power.dynamic_mode);
    assert!(config.runtime.power.enabled);
    assert_eq!(config.runtime.power.max_current_amps, 20.0);

    let mapper = CoordinateMapper::new(&config);
    assert_eq!(mapper.dimensions(), (8, 16));
    assert_eq!(mapper.canvas_dimensions(), (16, 8));
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "wall.json", WALL_JSON);

    std::env::set_var("LEDWALL_TEST_RUNTIME__TARGET_FPS", "45");
    std::env::set_var("LEDWALL_TEST_RUNTIME__POWER__DYNAMIC_MODE", "true");
    let result = manager().load_config(&path);
    std::env::remove_var("LEDWALL_TEST_RUNTIME__TARGET_FPS");
    std::env::remove_var("LEDWALL_TEST_RUNTIME__POWER__DYNAMIC_MODE");

    let config = result.unwrap();
    assert_eq!(config.runtime.target_fps, 45);
    assert!(config.runtime.power.dynamic_mode);
}

#[test]
#[serial]
fn test_invalid_files_are_rejected() {
    let dir = TempDir::new().unwrap();

    let missing = manager().load_config(&dir.path().join("nope.json"));
    assert!(matches!(missing, Err(LedError::Io(_))));

    let garbage = write(&dir, "garbage.json", "{ not json");
    assert!(matches!(
        manager().load_config(&garbage),
        Err(LedError::Config(_))
    ));

    let outside = write(
        &dir,
        "outside.json",
        &WALL_JSON.replace(r#""position": [1, 0]"#, r#""position": [5, 0]"#),
    );
    assert!(matches!(
        manager().load_config(&outside),
        Err(LedError::Configuration(_))
    ));
}

#[test]
#[serial]
fn test_save_config_writes_backup() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "wall.json", WALL_JSON);
    let manager = manager();

    let mut config = manager.load_config(&path).unwrap();
    config.runtime.target_fps = 24;
    manager.save_config(&config, &path, true).unwrap();

    let backup = backup_path(&path);
    assert_eq!(fs::read_to_string(&backup).unwrap(), WALL_JSON);
    assert_eq!(manager.load_config(&path).unwrap(), config);

    let toml_path = dir.path().join("wall.toml");
    manager.save_config(&config, &toml_path, true).unwrap();
    assert!(!backup_path(&toml_path).exists());
    assert_eq!(manager.load_config(&toml_path).unwrap(), config);
}

#[test]
#[serial]
fn test_save_config_refuses_invalid_config() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "wall.json", WALL_JSON);
    let mut config = manager().load_config(&path).unwrap();
    config.panels[1].id = 0;

    assert!(manager().save_config(&config, &path, true).is_err());
    assert_eq!(fs::read_to_string(&path).unwrap(), WALL_JSON);
}

#[test]
#[serial]
fn test_hot_reload_swaps_mapping() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "wall.json", WALL_JSON);
    let (controller, reload, _queue) = controller_for(&path);
    assert_eq!(controller.mapper().dimensions(), (32, 16));
    controller.start().unwrap();

    let bigger = DisplayConfig::uniform(16, 16, 2, 2);
    manager().save_config(&bigger, &path, true).unwrap();
    reload.request();

    assert!(wait_until(Duration::from_secs(2), || {
        controller.stats().reloads_succeeded == 1
    }));
    assert!(wait_until(Duration::from_millis(500), || !reload.is_requested()));
    assert_eq!(controller.mapper().dimensions(), (32, 32));
    assert_eq!(controller.power_limiter().stats().led_count, 1024);
    controller.stop();
}

#[test]
#[serial]
fn test_hot_reload_applies_runtime_settings() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "wall.json", WALL_JSON);
    let (controller, reload, _queue) = controller_for(&path);
    assert_eq!(controller.power_limiter().stats().max_current_amps, 80.0);
    controller.start().unwrap();

    let mut edited = manager().load_config(&path).unwrap();
    edited.runtime.power.max_current_amps = 5.0;
    edited.runtime.power.dynamic_mode = true;
    edited.runtime.target_fps = 60;
    manager().save_config(&edited, &path, false).unwrap();
    reload.request();

    assert!(wait_until(Duration::from_secs(2), || {
        controller.stats().reloads_succeeded == 1
    }));
    let power = controller.power_limiter().stats();
    assert_eq!(power.max_current_amps, 5.0);
    assert!(power.dynamic_mode);
    assert!(power.enabled);
    assert!((controller.target_fps() - 60.0).abs() < 1e-6);
    controller.stop();
}

#[test]
#[serial]
fn test_load_top_level_display_rotation() {
    let dir = TempDir::new().unwrap();
    let legacy = WALL_JSON.replace(
        r#""grid": {"#,
        r#""display_rotation": 90, "grid": {"#,
    );
    let path = write(&dir, "legacy.json", &legacy);
    let config = manager().load_config(&path).unwrap();
    assert_eq!(config.grid.display_rotation, 90);

    let mapper = CoordinateMapper::new(&config);
    assert_eq!(mapper.canvas_dimensions(), (16, 32));

    let conflicting = legacy.replace(
        r#""grid_height": 1}"#,
        r#""grid_height": 1, "display_rotation": 270}"#,
    );
    let path = write(&dir, "conflicting.json", &conflicting);
    assert!(matches!(
        manager().load_config(&path),
        Err(LedError::Config(_))
    ));
}

#[test]
#[serial]
fn test_failed_reload_keeps_previous_mapping() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "wall.json", WALL_JSON);
    let (controller, reload, queue) = controller_for(&path);
    controller.set_target_fps(200.0);
    controller.start().unwrap();

    fs::write(&path, r#"{"grid": {"panel_width": 0}}"#).unwrap();
    reload.request();

    assert!(wait_until(Duration::from_secs(2), || {
        controller.stats().reloads_failed == 1
    }));
    assert!(wait_until(Duration::from_millis(500), || !reload.is_requested()));
    assert_eq!(controller.mapper().dimensions(), (32, 16));
    assert_eq!(controller.stats().reloads_succeeded, 0);

    // the loop keeps displaying with the old mapping
    queue
        .try_put(VirtualFrame::filled(32, 16, [10, 20, 30]))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        controller.stats().frames_displayed == 1
    }));
    controller.stop();
}

#[test]
#[serial]
#[traced_test]
fn test_load_logs_dimensions() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "wall.json", WALL_JSON);
    manager().load_config(&path).unwrap();
    assert!(logs_contain("Configuration loaded"));
    assert!(logs_contain("leds=512"));
}
