//! Integration tests for the display loop lifecycle and frame path.

use ledwall::config::{DisplayConfig, FileConfigManager};
use ledwall::controller::{ControllerSettings, DisplayController, JOIN_TIMEOUT};
use ledwall::driver::{shared, LedDriver, MockLedDriver};
use ledwall::frame::{TestPattern, VirtualFrame};
use ledwall::mapper::CoordinateMapper;
use ledwall::queue::{FrameQueue, ReloadSignal};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_test::traced_test;

struct Harness {
    controller: DisplayController<MockLedDriver>,
    queue: Arc<FrameQueue>,
}

fn harness(config: &DisplayConfig) -> Harness {
    let queue = Arc::new(FrameQueue::new(10));
    let controller = DisplayController::new(
        shared(MockLedDriver::new(config.total_leds())),
        Arc::new(CoordinateMapper::new(config)),
        Arc::clone(&queue),
        ReloadSignal::new(),
        Arc::new(FileConfigManager::new()),
        "does-not-exist.json",
        ControllerSettings::default(),
    );
    Harness { controller, queue }
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

#[test]
fn test_start_stop_without_frames() {
    let h = harness(&DisplayConfig::uniform(16, 16, 2, 2));
    h.controller.start().unwrap();
    assert!(h.controller.is_running());
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    h.controller.stop();
    let elapsed = start.elapsed();

    assert!(
        elapsed < JOIN_TIMEOUT + Duration::from_millis(500),
        "Shutdown took too long: {:?}",
        elapsed
    );
    assert!(!h.controller.is_running());

    let driver = h.controller.driver();
    let driver = driver.lock();
    let last = driver.last_shown().unwrap();
    assert_eq!(last.led_count(), 1024);
    assert!(last.is_black());
}

#[test]
fn test_stop_immediately_after_start() {
    let h = harness(&DisplayConfig::uniform(16, 16, 2, 1));
    for _ in 0..20 {
        h.controller.start().unwrap();
        let start = Instant::now();
        h.controller.stop();
        let elapsed = start.elapsed();

        assert!(
            elapsed < JOIN_TIMEOUT + Duration::from_millis(500),
            "Shutdown took too long: {:?}",
            elapsed
        );
        assert!(!h.controller.is_running());
        let driver = h.controller.driver();
        let driver = driver.lock();
        assert!(driver.last_shown().unwrap().is_black());
    }
}

#[test]
fn test_repeated_start_and_stop_are_safe() {
    let h = harness(&DisplayConfig::uniform(4, 4, 1, 1));
    h.controller.start().unwrap();
    h.controller.start().unwrap();
    assert!(h.controller.is_running());

    h.controller.stop();
    h.controller.stop();
    assert!(!h.controller.is_running());

    // restart after stop
    h.controller.start().unwrap();
    assert!(h.controller.is_running());
    h.controller.stop();
}

#[test]
fn test_frames_reach_the_driver_in_order() {
    let h = harness(&DisplayConfig::uniform(2, 2, 1, 1));
    h.controller.set_target_fps(200.0);
    for level in 1..=5u8 {
        h.queue.try_put(VirtualFrame::filled(2, 2, [level, 0, 0])).unwrap();
    }

    h.controller.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.controller.stats().frames_displayed >= 5
    }));
    h.controller.stop();

    let driver = h.controller.driver();
    let driver = driver.lock();
    let reds: Vec<u8> = driver
        .shown_frames()
        .iter()
        .filter(|f| !f.is_black())
        .map(|f| f.as_bytes()[0])
        .collect();
    assert_eq!(reds, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_driver_failures_do_not_stop_the_loop() {
    let h = harness(&DisplayConfig::uniform(2, 2, 1, 1));
    h.controller.set_target_fps(200.0);
    {
        let driver = h.controller.driver();
        let mut driver = driver.lock();
        driver.panic_next_frames(1);
        driver.fail_next_frames(1);
    }
    for _ in 0..3 {
        h.queue.try_put(VirtualFrame::filled(2, 2, [9, 9, 9])).unwrap();
    }

    h.controller.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        let stats = h.controller.stats();
        stats.frames_displayed + stats.frames_failed >= 3
    }));

    let stats = h.controller.stats();
    assert_eq!(stats.frames_failed, 2);
    assert_eq!(stats.frames_displayed, 1);
    assert!(h.controller.is_running());
    h.controller.stop();
}

#[test]
fn test_wrong_shape_frame_is_shown_black() {
    let h = harness(&DisplayConfig::uniform(4, 4, 1, 1));
    h.queue.try_put(VirtualFrame::filled(3, 3, [255, 0, 0])).unwrap();
    h.controller.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.controller.stats().frames_displayed == 1
    }));
    h.controller.stop();

    let driver = h.controller.driver();
    let driver = driver.lock();
    assert!(driver.shown_frames().iter().all(|f| f.is_black()));
}

#[test]
fn test_power_limit_applied_before_show() {
    let config = DisplayConfig::uniform(16, 16, 2, 2);
    let h = harness(&config);
    h.controller.power_limiter().set_max_current(10.0);
    h.controller.driver().lock().set_brightness(255).unwrap();

    h.queue
        .try_put(VirtualFrame::filled(32, 32, [255, 255, 255]))
        .unwrap();
    h.controller.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.controller.stats().frames_displayed == 1
    }));
    h.controller.stop();

    // 1024 white LEDs draw 61.44A at full brightness; 10A allows 42
    assert_eq!(h.controller.driver().lock().brightness(), 42);
    assert!(h.controller.power_limiter().stats().limit_applied_count >= 1);
}

#[test]
fn test_clear_queue_and_queue_size() {
    let h = harness(&DisplayConfig::uniform(4, 4, 1, 1));
    for _ in 0..4 {
        h.queue.try_put(TestPattern::Cross.render(4, 4)).unwrap();
    }
    assert_eq!(h.controller.queue_size(), 4);
    assert_eq!(h.controller.clear_queue(), 4);
    assert_eq!(h.controller.queue_size(), 0);
}

#[test]
fn test_full_queue_drops_newest_frames() {
    let h = harness(&DisplayConfig::uniform(4, 4, 1, 1));
    let producer = h.queue.claim_producer("test");
    let mut dropped = 0;
    for _ in 0..15 {
        if producer.try_put(VirtualFrame::new(4, 4)).is_err() {
            dropped += 1;
        }
    }
    assert_eq!(dropped, 5);
    assert_eq!(h.controller.stats().frames_dropped, 5);
    assert_eq!(h.controller.stats().queue_size, 10);
}

#[test]
#[traced_test]
fn test_invalid_target_fps_is_ignored() {
    let h = harness(&DisplayConfig::uniform(4, 4, 1, 1));
    h.controller.set_target_fps(60.0);
    h.controller.set_target_fps(0.0);
    h.controller.set_target_fps(-1.0);
    assert!((h.controller.target_fps() - 60.0).abs() < 1e-6);
    assert!(logs_contain("Invalid FPS ignored"));
}

#[test]
fn test_measured_fps_tracks_target() {
    let h = harness(&DisplayConfig::uniform(2, 2, 1, 1));
    h.controller.set_target_fps(50.0);
    let queue = Arc::clone(&h.queue);
    let producer = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_millis(1500);
        while Instant::now() < deadline {
            let _ = queue.try_put(VirtualFrame::new(2, 2));
            thread::sleep(Duration::from_millis(5));
        }
    });

    h.controller.start().unwrap();
    producer.join().unwrap();
    let fps = h.controller.fps();
    h.controller.stop();

    assert!(fps > 20.0 && fps <= 55.0, "fps = {}", fps);
}
