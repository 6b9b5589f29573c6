// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture session lifecycle
//!
//! A scripted frame source stands in for the GStreamer pipeline: it pushes
//! frames into the session's sink from its own thread, like a streaming
//! thread would.

use gst_capture_ring::{
    Camera, CaptureError, CaptureResult, Config, FrameLayout, FrameSink, FrameSource,
    SessionState, SourceType, UnifiedAllocator,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pushes a fixed frame on a timer until stopped
struct ScriptedSource {
    sink: Arc<dyn FrameSink>,
    frame: Vec<u8>,
    layout: FrameLayout,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
    fail_start: bool,
}

impl FrameSource for ScriptedSource {
    fn start(&mut self) -> CaptureResult<()> {
        self.calls.lock().unwrap().push("start");
        if self.fail_start {
            return Err(CaptureError::Pipeline("no such element".to_string()));
        }

        self.running.store(true, Ordering::SeqCst);
        let sink = Arc::clone(&self.sink);
        let running = Arc::clone(&self.running);
        let frame = self.frame.clone();
        let layout = self.layout;
        self.worker = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                sink.on_frame_ready(&frame, layout);
                thread::sleep(Duration::from_millis(5));
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> CaptureResult<()> {
        self.calls.lock().unwrap().push("stop");
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.join().unwrap();
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

fn rgb_config() -> Config {
    Config {
        width: 4,
        height: 2,
        source: SourceType::External { device: 0 },
        ring_buffers: 4,
        ..Config::default()
    }
}

fn camera(
    config: Config,
    fail_start: bool,
) -> (Camera, Arc<Mutex<Vec<&'static str>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_clone = Arc::clone(&calls);
    let layout = FrameLayout::packed(config.width, config.height);
    let frame = vec![100u8; (config.width * config.height * 3) as usize];

    let camera = Camera::with_source(config, Arc::new(UnifiedAllocator), move |sink| {
        Ok(Box::new(ScriptedSource {
            sink,
            frame,
            layout,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            calls: calls_clone,
            fail_start,
        }) as Box<dyn FrameSource>)
    })
    .unwrap();

    (camera, calls)
}

#[test]
fn test_lifecycle() {
    let (mut camera, calls) = camera(rgb_config(), false);
    assert_eq!(camera.state(), SessionState::Unopened);
    assert!(matches!(
        camera.capture(Duration::ZERO),
        Err(CaptureError::InvalidState(_))
    ));

    camera.open().unwrap();
    assert_eq!(camera.state(), SessionState::Playing);

    let frame = camera.capture(Duration::from_secs(2)).unwrap();
    assert_eq!(frame.data(), &[100u8; 24][..]);

    let rgba = camera.convert_rgba(&frame, false).unwrap();
    assert_eq!(rgba.floats().len(), 4 * 2 * 4);
    assert_eq!(rgba.pixels()[0].g, 100.0);
    drop(frame);

    camera.close().unwrap();
    assert_eq!(camera.state(), SessionState::Closed);
    assert!(matches!(
        camera.capture(Duration::ZERO),
        Err(CaptureError::Closed)
    ));
    assert!(matches!(camera.open(), Err(CaptureError::InvalidState(_))));

    camera.close().unwrap();
    assert_eq!(*calls.lock().unwrap(), vec!["start", "stop"]);
}

#[test]
fn test_session_params_before_and_after_first_frame() {
    let (mut camera, _) = camera(rgb_config(), false);

    assert_eq!(camera.width(), 4);
    assert_eq!(camera.height(), 2);
    assert_eq!(camera.pixel_depth(), 24);
    assert_eq!(camera.size(), 24);

    camera.open().unwrap();
    camera.capture(Duration::from_secs(2)).unwrap();
    assert_eq!(camera.pixel_depth(), 24);
    assert!(camera.stats().published >= 1);
}

#[test]
fn test_requested_onboard_params() {
    let config = Config {
        source: SourceType::Onboard,
        ..Config::default()
    };
    let (camera, _) = camera(config, false);
    assert_eq!(camera.pixel_depth(), 12);
    assert_eq!(camera.size(), 1280 * 720 * 3 / 2);
}

#[test]
fn test_failed_open_stays_unopened() {
    let (mut camera, _) = camera(rgb_config(), true);
    assert!(matches!(camera.open(), Err(CaptureError::Pipeline(_))));
    assert_eq!(camera.state(), SessionState::Unopened);
}

#[test]
fn test_close_wakes_waiting_consumer() {
    let (mut camera, _) = camera(rgb_config(), false);
    let ring = Arc::clone(camera.ring());

    let waiter = thread::spawn(move || ring.acquire(Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(30));
    camera.close().unwrap();

    assert!(matches!(waiter.join().unwrap(), Err(CaptureError::Closed)));
}

#[test]
fn test_invalid_config_rejected() {
    let config = Config {
        ring_buffers: 1,
        ..rgb_config()
    };
    let result = Camera::with_source(config, Arc::new(UnifiedAllocator), |_| {
        Err(CaptureError::Pipeline("not reached".to_string()))
    });
    assert!(matches!(result, Err(CaptureError::Config(_))));
}
