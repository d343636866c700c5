//! Integration tests for the capture facade over simulated hardware
//!
//! Drives the public `CameraControl` surface end to end: the worker thread,
//! the session state machine, request coordination and the frame bridge.

use crabcapture::request::{FlashMode, Trigger};
use crabcapture::testing::{
    synthetic_back_camera, synthetic_front_camera, HalCall, ListenerEvent, OpenBehavior,
    RecordingListener, RecordingSink, SessionBehavior, SimulatedHardware, TestSurface,
};
use crabcapture::types::{MeteringFlags, Rect, SensorOrientation, VideoOrientation};
use crabcapture::{
    CameraControl, CameraError, CameraErrorKind, CameraStateListener, CaptureFacade,
    CrabCaptureConfig, DeviceDescriptor, Facing, FramePipelineBridge, SessionState, Size,
};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    camera: CaptureFacade,
    hardware: Arc<SimulatedHardware>,
    listener: Arc<RecordingListener>,
    sink: Arc<RecordingSink>,
    surface: Arc<TestSurface>,
}

fn harness() -> Harness {
    let hardware = Arc::new(SimulatedHardware::new(vec![
        synthetic_back_camera(),
        synthetic_front_camera(),
    ]));
    let listener = Arc::new(RecordingListener::default());
    let sink = Arc::new(RecordingSink::default());
    let surface = Arc::new(TestSurface::default());
    let bridge = Arc::new(FramePipelineBridge::new(surface.clone(), sink.clone()));
    bridge.on_surface_changed(Size::new(1080, 1920));

    let camera = CaptureFacade::new(
        hardware.clone(),
        bridge,
        listener.clone(),
        CrabCaptureConfig::default(),
    )
    .expect("facade construction");

    Harness {
        camera,
        hardware,
        listener,
        sink,
        surface,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_open_streams_with_negotiated_size() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    assert_eq!(h.listener.wait_for_events(1, WAIT), vec![ListenerEvent::Opened]);
    assert!(h.camera.flush(WAIT));

    let snapshot = h.camera.snapshot();
    assert_eq!(snapshot.state, SessionState::Streaming);
    assert_eq!(snapshot.facing, Some(Facing::Back));
    assert_eq!(snapshot.stream_size, Some(Size::new(1280, 720)));
    assert_eq!(h.surface.buffer_size(), Some(Size::new(1280, 720)));

    assert_eq!(
        h.listener.states(),
        vec![
            SessionState::Opening,
            SessionState::Opened,
            SessionState::ConfiguringSession,
            SessionState::Streaming
        ]
    );
    h.camera.close();
}

#[test]
fn test_geometry_reaches_sink_on_open() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);

    let geometry = h.sink.last().expect("geometry pushed");
    assert_eq!(geometry.surface, Size::new(1080, 1920));
    assert_eq!(geometry.frame, Size::new(1280, 720));
    assert_eq!(geometry.sensor_orientation, SensorOrientation::Deg90);
    assert!(!geometry.front_facing);
    assert_eq!(geometry.oriented_frame_size(), Size::new(720, 1280));

    h.camera.set_video_orientation(VideoOrientation::LandscapeRight);
    assert!(h.camera.flush(WAIT));
    let rotated = h.sink.last().expect("geometry pushed after rotation");
    assert_eq!(rotated.video_orientation, VideoOrientation::LandscapeRight);
    assert_eq!(rotated.rotation_degrees(), 0);
    h.camera.close();
}

#[test]
fn test_close_releases_hardware_in_order() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);
    h.hardware.clear_journal();

    h.camera.close();
    assert_eq!(
        h.hardware.journal(),
        vec![
            HalCall::StopRepeating,
            HalCall::CloseSession,
            HalCall::CloseDevice("back-0".to_string())
        ]
    );
    assert_eq!(h.hardware.open_devices(), 0);
    assert_eq!(h.camera.state(), SessionState::Idle);
    assert_eq!(
        h.listener.events(),
        vec![ListenerEvent::Opened, ListenerEvent::Closed]
    );
}

#[test]
fn test_close_twice_is_harmless() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);
    h.camera.close();
    h.camera.close();
    assert_eq!(
        h.listener.events(),
        vec![ListenerEvent::Opened, ListenerEvent::Closed]
    );
}

#[test]
fn test_reopen_after_close() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);
    h.camera.close();

    h.camera.open(Facing::Front, 720, 1280);
    let events = h.listener.wait_for_events(3, WAIT);
    assert_eq!(events.last(), Some(&ListenerEvent::Opened));
    assert!(h.camera.flush(WAIT));
    assert_eq!(h.camera.snapshot().facing, Some(Facing::Front));
    assert!(!h.camera.is_flash_available());
    h.camera.close();
}

// ═══════════════════════════════════════════════════════════════════════════
// OPEN/CLOSE RACES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_close_during_open_never_streams() {
    let h = harness();
    h.hardware.set_open_behavior(OpenBehavior::Deferred);

    h.camera.open(Facing::Back, 720, 1280);
    assert!(h.camera.flush(WAIT));
    h.camera.close();

    // The device shows up after the worker is gone and must be closed again.
    assert!(h.hardware.complete_pending_open());
    assert_eq!(h.hardware.open_devices(), 0);
    assert!(!h.listener.states().contains(&SessionState::Streaming));
    assert_eq!(h.listener.events(), vec![ListenerEvent::Closed]);
    assert_eq!(h.camera.state(), SessionState::Idle);
}

#[test]
fn test_late_open_after_reopen_is_discarded() {
    let h = harness();
    h.hardware.set_open_behavior(OpenBehavior::Deferred);
    h.camera.open(Facing::Back, 720, 1280);
    assert!(h.camera.flush(WAIT));
    h.camera.close();

    h.hardware.set_open_behavior(OpenBehavior::Immediate);
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(2, WAIT);

    // Stale device from the first attempt arrives while the second streams.
    assert!(h.hardware.complete_pending_open());
    assert!(h.camera.flush(WAIT));
    assert_eq!(h.hardware.open_devices(), 1);
    assert_eq!(h.camera.state(), SessionState::Streaming);
    h.camera.close();
    assert_eq!(h.hardware.open_devices(), 0);
}

#[test]
fn test_close_during_session_configuration() {
    let h = harness();
    h.hardware.set_session_behavior(SessionBehavior::Deferred);
    h.camera.open(Facing::Back, 720, 1280);
    assert!(h.listener.wait_for_state(SessionState::ConfiguringSession, WAIT));

    h.camera.close();
    assert!(h.hardware.complete_pending_session());
    assert!(!h.listener.states().contains(&SessionState::Streaming));
    assert_eq!(h.hardware.open_devices(), 0);
    assert!(h
        .hardware
        .journal()
        .iter()
        .all(|call| !matches!(call, HalCall::SetRepeating(_))));
}

// ═══════════════════════════════════════════════════════════════════════════
// FAILURES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_open_failure_reports_access_error() {
    let h = harness();
    h.hardware
        .set_open_behavior(OpenBehavior::Fail(CameraError::AccessError("busy".into())));
    h.camera.open(Facing::Back, 720, 1280);

    let events = h.listener.wait_for_events(1, WAIT);
    assert!(matches!(&events[..], [ListenerEvent::Error(CameraError::AccessError(_))]));
    assert!(h.camera.flush(WAIT));
    assert_eq!(h.camera.state(), SessionState::Idle);
    assert_eq!(h.hardware.open_devices(), 0);
}

#[test]
fn test_disconnect_while_streaming() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);

    assert!(h.hardware.disconnect());
    let events = h.listener.wait_for_events(2, WAIT);
    match &events[..] {
        [ListenerEvent::Opened, ListenerEvent::Error(e)] => {
            assert_eq!(e.kind(), CameraErrorKind::RuntimeDevice)
        }
        other => panic!("unexpected events: {:?}", other),
    }
    assert!(h.camera.flush(WAIT));
    assert_eq!(h.camera.state(), SessionState::Idle);
    assert_eq!(h.hardware.open_devices(), 0);

    // The facade is reusable after a fault.
    h.camera.open(Facing::Back, 720, 1280);
    assert_eq!(h.listener.wait_for_events(3, WAIT).last(), Some(&ListenerEvent::Opened));
    h.camera.close();
}

#[test]
fn test_rejected_submission_tears_session_down() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);

    h.hardware.fail_submissions(true);
    h.camera.enable_torch(true);
    let events = h.listener.wait_for_events(2, WAIT);
    assert!(matches!(events.last(), Some(ListenerEvent::Error(_))));
    assert!(h.camera.flush(WAIT));
    assert_eq!(h.camera.state(), SessionState::Idle);
}

// ═══════════════════════════════════════════════════════════════════════════
// REQUEST MUTATIONS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_zoom_is_clamped_and_cropped() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);

    h.camera.set_zoom_ratio(10.0);
    assert!(h.camera.flush(WAIT));
    assert_eq!(h.camera.zoom_ratio(), 4.0);

    let last = h.hardware.repeating_requests().pop().expect("repeating request");
    assert_eq!(last.crop_region, Some(Rect::new(1500, 1125, 2500, 1875)));
    h.camera.close();
}

#[test]
fn test_torch_toggles_flash_mode() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);

    h.camera.enable_torch(true);
    assert!(h.camera.flush(WAIT));
    assert_eq!(
        h.hardware.repeating_requests().last().map(|r| r.flash_mode),
        Some(FlashMode::Torch)
    );

    h.camera.enable_torch(false);
    assert!(h.camera.flush(WAIT));
    assert_eq!(
        h.hardware.repeating_requests().last().map(|r| r.flash_mode),
        Some(FlashMode::Off)
    );
    h.camera.close();
}

#[test]
fn test_center_focus_sends_one_shot_then_idle_repeating() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);

    h.camera.start_focus_and_metering_center();
    assert!(h.camera.flush(WAIT));

    let capture = h.hardware.captures().pop().expect("one-shot capture");
    assert_eq!(capture.af_trigger, Trigger::Start);
    assert_eq!(capture.af_regions[0].rect, Rect::new(1800, 1350, 2200, 1650));

    let repeating = h.hardware.repeating_requests().pop().expect("repeating request");
    assert_eq!(repeating.af_trigger, Trigger::Idle);
    assert_eq!(repeating.ae_precapture_trigger, Trigger::Idle);
    assert_eq!(repeating.af_regions, capture.af_regions);
    h.camera.close();
}

#[test]
fn test_tap_focus_with_ae_only() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);

    h.camera
        .start_focus_and_metering(270.0, 480.0, 108.0, 192.0, MeteringFlags::AE);
    assert!(h.camera.flush(WAIT));

    let capture = h.hardware.captures().pop().expect("one-shot capture");
    assert_eq!(capture.af_trigger, Trigger::Idle);
    assert_eq!(capture.ae_precapture_trigger, Trigger::Start);
    assert!(capture.af_regions.is_empty());
    assert_eq!(capture.ae_regions[0].rect, Rect::new(800, 600, 1200, 900));
    h.camera.close();
}

#[test]
fn test_commands_without_camera_do_nothing() {
    let h = harness();
    h.camera.set_zoom_ratio(2.0);
    h.camera.enable_torch(true);
    h.camera.start_focus_and_metering_center();
    assert!(h.hardware.journal().is_empty());
    assert!(h.listener.events().is_empty());
}

#[test]
fn test_switch_camera_reopens_opposite_facing() {
    let h = harness();
    h.camera.open(Facing::Back, 720, 1280);
    h.listener.wait_for_events(1, WAIT);

    h.camera.switch_camera();
    h.listener.wait_for_events(3, WAIT);
    assert!(h.camera.flush(WAIT));
    assert_eq!(h.camera.snapshot().facing, Some(Facing::Front));
    assert_eq!(h.hardware.open_devices(), 1);
    assert!(h.sink.last().expect("front geometry").front_facing);
    h.camera.close();
}

// ═══════════════════════════════════════════════════════════════════════════
// LISTENER RE-ENTRANCY
// ═══════════════════════════════════════════════════════════════════════════

type Hook = Box<dyn FnOnce(&CaptureFacade) + Send>;

/// Records like [`RecordingListener`] and runs a one-shot hook against the
/// camera from inside a callback.
#[derive(Default)]
struct ReentrantListener {
    recorder: RecordingListener,
    camera: OnceLock<Weak<CaptureFacade>>,
    on_opened_once: Mutex<Option<Hook>>,
    on_error_once: Mutex<Option<Hook>>,
}

impl ReentrantListener {
    fn run_hook(&self, slot: &Mutex<Option<Hook>>) {
        let hook = slot.lock().unwrap().take();
        if let (Some(hook), Some(camera)) = (hook, self.camera.get().and_then(Weak::upgrade)) {
            hook(&camera);
        }
    }
}

impl CameraStateListener for ReentrantListener {
    fn on_opened(&self) {
        self.recorder.on_opened();
        self.run_hook(&self.on_opened_once);
    }

    fn on_closed(&self) {
        self.recorder.on_closed();
    }

    fn on_error(&self, error: &CameraError) {
        self.recorder.on_error(error);
        self.run_hook(&self.on_error_once);
    }

    fn on_state_changed(&self, state: SessionState) {
        self.recorder.on_state_changed(state);
    }
}

struct ReentrantHarness {
    camera: Arc<CaptureFacade>,
    hardware: Arc<SimulatedHardware>,
    listener: Arc<ReentrantListener>,
    sink: Arc<RecordingSink>,
}

fn reentrant_harness(devices: Vec<DeviceDescriptor>) -> ReentrantHarness {
    let hardware = Arc::new(SimulatedHardware::new(devices));
    let listener = Arc::new(ReentrantListener::default());
    let sink = Arc::new(RecordingSink::default());
    let bridge = Arc::new(FramePipelineBridge::new(
        Arc::new(TestSurface::default()),
        sink.clone(),
    ));
    bridge.on_surface_changed(Size::new(1080, 1920));

    let camera = Arc::new(
        CaptureFacade::new(
            hardware.clone(),
            bridge,
            listener.clone(),
            CrabCaptureConfig::default(),
        )
        .expect("facade construction"),
    );
    listener
        .camera
        .set(Arc::downgrade(&camera))
        .expect("camera registered once");

    ReentrantHarness {
        camera,
        hardware,
        listener,
        sink,
    }
}

fn set_hook(slot: &Mutex<Option<Hook>>, hook: impl FnOnce(&CaptureFacade) + Send + 'static) {
    *slot.lock().unwrap() = Some(Box::new(hook));
}

#[test]
fn test_switch_from_on_opened_keeps_one_device() {
    let h = reentrant_harness(vec![synthetic_back_camera(), synthetic_front_camera()]);
    set_hook(&h.listener.on_opened_once, |camera| camera.switch_camera());

    h.camera.open(Facing::Back, 720, 1280);
    assert_eq!(
        h.listener.recorder.wait_for_events(3, WAIT),
        vec![ListenerEvent::Opened, ListenerEvent::Closed, ListenerEvent::Opened]
    );
    assert!(h.camera.flush(WAIT));

    assert_eq!(h.hardware.open_devices(), 1);
    let snapshot = h.camera.snapshot();
    assert_eq!(snapshot.state, SessionState::Streaming);
    assert_eq!(snapshot.facing, Some(Facing::Front));
    assert!(h.sink.last().expect("front geometry").front_facing);

    let journal = h.hardware.journal();
    let closed_back = journal
        .iter()
        .position(|call| *call == HalCall::CloseDevice("back-0".to_string()))
        .expect("back camera closed");
    let opened_front = journal
        .iter()
        .position(|call| *call == HalCall::OpenDevice("front-1".to_string()))
        .expect("front camera opened");
    assert!(closed_back < opened_front);

    h.camera.close();
    assert_eq!(h.hardware.open_devices(), 0);
}

#[test]
fn test_close_from_on_opened_then_reopen() {
    let h = reentrant_harness(vec![synthetic_back_camera(), synthetic_front_camera()]);
    set_hook(&h.listener.on_opened_once, |camera| camera.close());

    h.camera.open(Facing::Back, 720, 1280);
    assert_eq!(
        h.listener.recorder.wait_for_events(2, WAIT),
        vec![ListenerEvent::Opened, ListenerEvent::Closed]
    );
    assert!(h.camera.flush(WAIT));
    assert_eq!(h.hardware.open_devices(), 0);
    assert_eq!(h.camera.state(), SessionState::Idle);

    h.camera.open(Facing::Back, 720, 1280);
    assert_eq!(h.listener.recorder.wait_for_events(3, WAIT).len(), 3);
    assert!(h.camera.flush(WAIT));
    assert_eq!(h.camera.state(), SessionState::Streaming);
    assert_eq!(h.hardware.open_devices(), 1);
    h.camera.close();
}

#[test]
fn test_reopen_from_on_error() {
    let h = reentrant_harness(vec![synthetic_back_camera()]);
    set_hook(&h.listener.on_error_once, |camera| {
        camera.close();
        camera.open(Facing::Back, 720, 1280);
    });

    h.camera.open(Facing::Front, 720, 1280);
    let events = h.listener.recorder.wait_for_events(2, WAIT);
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        ListenerEvent::Error(e) if e.kind() == CameraErrorKind::Access
    ));
    assert_eq!(events[1], ListenerEvent::Opened);

    assert!(h.camera.flush(WAIT));
    assert_eq!(h.hardware.open_devices(), 1);
    assert_eq!(h.camera.snapshot().facing, Some(Facing::Back));
    h.camera.close();
}

#[test]
fn test_flush_does_not_block_callbacks() {
    let h = reentrant_harness(vec![synthetic_back_camera()]);
    let (signal, entered) = crossbeam_channel::bounded(1);
    set_hook(&h.listener.on_opened_once, move |camera| {
        // Flushing from the worker itself must not wait on the worker.
        let _ = signal.send(camera.flush(WAIT));
        thread::sleep(Duration::from_millis(100));
        camera.set_zoom_ratio(2.0);
    });

    h.camera.open(Facing::Back, 720, 1280);
    let nested_flush = entered.recv_timeout(WAIT).expect("on_opened ran");
    assert!(!nested_flush);

    let start = Instant::now();
    assert!(h.camera.flush(WAIT));
    assert!(start.elapsed() < Duration::from_secs(1));

    assert!(h.camera.flush(WAIT));
    assert_eq!(h.camera.zoom_ratio(), 2.0);
    h.camera.close();
}
