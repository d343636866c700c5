//! Platform-delegated camera control backed by nokhwa
//!
//! The platform camera stack owns focus, exposure and white balance here, so
//! this implementation only maps what it exposes: zoom through the platform
//! zoom control when there is one. Torch is reported unavailable and
//! focus-and-meter requests are logged and left to the platform's automatic
//! modes. Geometry still flows through a [`FramePipelineBridge`].
//!
//! The nokhwa camera is created on, and never leaves, its own thread.

use crate::bridge::FramePipelineBridge;
use crate::config::CrabCaptureConfig;
use crate::control::{CameraControl, CameraStateListener};
use crate::errors::CameraError;
use crate::session::{ControlSnapshot, SharedSnapshot};
use crate::types::{
    DeviceDescriptor, Facing, MeteringFlags, SensorOrientation, SessionState, Size, ZoomRange,
};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, ControlValueDescription, ControlValueSetter,
    FrameFormat, KnownCameraControl, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{query, Camera};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Desktop cameras do not report facing; the first one is taken to face the
/// user and the rest to face away.
pub fn list_native_devices() -> Result<Vec<DeviceDescriptor>, CameraError> {
    let cameras = query(ApiBackend::Auto)
        .map_err(|e| CameraError::InitializationError(format!("Failed to query cameras: {}", e)))?;

    Ok(cameras
        .iter()
        .enumerate()
        .map(|(position, info)| {
            let facing = if position == 0 { Facing::Front } else { Facing::Back };
            DeviceDescriptor::new(info.index().to_string(), facing)
        })
        .collect())
}

#[derive(Debug)]
enum NativeCommand {
    SetZoom(f32),
    Close,
}

/// Integer platform zoom control mapped onto ratios, `value / min`.
#[derive(Debug, Clone, Copy)]
struct ZoomControl {
    min: i64,
    max: i64,
}

impl ZoomControl {
    fn from_description(description: &ControlValueDescription) -> Option<Self> {
        match description {
            ControlValueDescription::IntegerRange { min, max, .. } if *min > 0 && max > min => {
                Some(Self {
                    min: *min,
                    max: *max,
                })
            }
            _ => None,
        }
    }

    fn range(&self) -> ZoomRange {
        ZoomRange::from_device(Some(1.0), Some(self.max as f32 / self.min as f32))
    }

    fn value_for(&self, ratio: f32) -> i64 {
        ((self.min as f32 * ratio).round() as i64).clamp(self.min, self.max)
    }
}

struct NativeWorker {
    sender: Sender<NativeCommand>,
    handle: Option<JoinHandle<()>>,
}

/// Poll `handle` until it finishes or `timeout` passes; detaches on timeout.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let start = Instant::now();
    while !handle.is_finished() {
        if start.elapsed() >= timeout {
            log::warn!("Native camera worker did not stop within {:?}; detaching", timeout);
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    let _ = handle.join();
    true
}

/// A lone webcam serves either facing.
fn pick_device(devices: &[DeviceDescriptor], facing: Facing) -> Result<u32, CameraError> {
    devices
        .iter()
        .find(|d| d.facing == facing)
        .or_else(|| devices.first())
        .and_then(|d| d.id.parse::<u32>().ok())
        .ok_or_else(|| CameraError::AccessError(format!("no {} camera on this host", facing)))
}

struct WorkerContext {
    index: u32,
    facing: Facing,
    requested: Size,
    bridge: Arc<FramePipelineBridge>,
    listener: Arc<dyn CameraStateListener>,
    snapshot: SharedSnapshot,
    epoch: u64,
    current: Arc<AtomicU64>,
    predecessor: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl WorkerContext {
    /// False once a newer worker owns the bridge and the snapshot.
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.epoch
    }

    fn publish(&self, update: impl FnOnce(&mut ControlSnapshot)) {
        if !self.is_current() {
            return;
        }
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut snapshot);
    }

    fn set_state(&self, state: SessionState) {
        if !self.is_current() {
            return;
        }
        self.publish(|s| s.state = state);
        self.listener.on_state_changed(state);
    }

    fn fail(&self, error: CameraError) {
        log::error!("Native camera {} failed: {}", self.index, error);
        self.set_state(SessionState::Error);
        if self.is_current() {
            self.bridge.on_camera_closed();
        }
        self.publish(|s| s.stream_size = None);
        self.set_state(SessionState::Idle);
        self.listener.on_error(&error);
    }

    fn finish_close(&self) {
        if self.is_current() {
            self.bridge.on_camera_closed();
        }
        self.publish(|s| s.stream_size = None);
        self.set_state(SessionState::Idle);
        log::info!("Native camera {} closed", self.index);
        self.listener.on_closed();
    }
}

/// Drain commands queued while the camera was still opening. True when a
/// close arrived; the last zoom request is kept for once streaming starts.
fn close_requested(receiver: &Receiver<NativeCommand>, pending_zoom: &mut Option<f32>) -> bool {
    loop {
        match receiver.try_recv() {
            Ok(NativeCommand::SetZoom(ratio)) => *pending_zoom = Some(ratio),
            Ok(NativeCommand::Close) | Err(TryRecvError::Disconnected) => return true,
            Err(TryRecvError::Empty) => return false,
        }
    }
}

fn apply_zoom(ctx: &WorkerContext, camera: &mut Camera, zoom: Option<ZoomControl>, ratio: f32) {
    let Some(zoom) = zoom else {
        log::warn!(
            "Ignoring zoom: {}",
            CameraError::UnsupportedCapability("no platform zoom control".to_string())
        );
        return;
    };
    let ratio = zoom.range().clamp(ratio);
    match camera.set_camera_control(
        KnownCameraControl::Zoom,
        ControlValueSetter::Integer(zoom.value_for(ratio)),
    ) {
        Ok(()) => ctx.publish(|s| s.zoom_ratio = ratio),
        Err(e) => log::warn!("Platform zoom rejected: {}", e),
    }
}

fn run(mut ctx: WorkerContext, receiver: Receiver<NativeCommand>) {
    // One device at a time: the previous camera thread releases first.
    if let Some(previous) = ctx.predecessor.take() {
        join_with_timeout(previous, ctx.join_timeout);
    }
    ctx.set_state(SessionState::Opening);

    let mut pending_zoom = None;
    if close_requested(&receiver, &mut pending_zoom) {
        return ctx.finish_close();
    }

    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
        Resolution::new(ctx.requested.width, ctx.requested.height),
        FrameFormat::MJPEG,
        30,
    )));

    let mut camera = match Camera::new(CameraIndex::Index(ctx.index), format) {
        Ok(camera) => camera,
        Err(e) => return ctx.fail(CameraError::AccessError(e.to_string())),
    };
    ctx.set_state(SessionState::Opened);
    if close_requested(&receiver, &mut pending_zoom) {
        ctx.set_state(SessionState::Closing);
        return ctx.finish_close();
    }

    ctx.set_state(SessionState::ConfiguringSession);
    if let Err(e) = camera.open_stream() {
        return ctx.fail(CameraError::ConfigurationError(e.to_string()));
    }
    if close_requested(&receiver, &mut pending_zoom) {
        ctx.set_state(SessionState::Closing);
        if let Err(e) = camera.stop_stream() {
            log::warn!("Failed to stop native stream: {}", e);
        }
        return ctx.finish_close();
    }

    let resolution = camera.resolution();
    let frame_size = Size::new(resolution.width_x, resolution.height_y);
    let zoom = camera
        .camera_control(KnownCameraControl::Zoom)
        .ok()
        .and_then(|control| ZoomControl::from_description(control.description()));

    if ctx.is_current() {
        ctx.bridge
            .on_camera_frame_size(frame_size, SensorOrientation::Deg0, ctx.facing);
    }
    ctx.publish(|s| {
        s.facing = Some(ctx.facing);
        s.stream_size = Some(frame_size);
        s.zoom_range = zoom.map(|z| z.range()).unwrap_or_default();
        s.zoom_ratio = 1.0;
        s.flash_available = false;
    });
    if let Some(ratio) = pending_zoom {
        apply_zoom(&ctx, &mut camera, zoom, ratio);
    }
    ctx.set_state(SessionState::Streaming);
    log::info!("Native camera {} streaming at {}", ctx.index, frame_size);
    if ctx.is_current() {
        ctx.listener.on_opened();
    }

    loop {
        match receiver.try_recv() {
            Ok(NativeCommand::SetZoom(ratio)) => {
                apply_zoom(&ctx, &mut camera, zoom, ratio);
                continue;
            }
            Ok(NativeCommand::Close) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match camera.frame() {
            Ok(_) => ctx.bridge.on_frame_available(),
            Err(e) => {
                let _ = camera.stop_stream();
                return ctx.fail(CameraError::RuntimeDeviceError(e.to_string()));
            }
        }
    }

    ctx.set_state(SessionState::Closing);
    if let Err(e) = camera.stop_stream() {
        log::warn!("Failed to stop native stream: {}", e);
    }
    ctx.finish_close();
}

type Enumerator = fn() -> Result<Vec<DeviceDescriptor>, CameraError>;

/// [`CameraControl`] over the platform camera stack.
pub struct NativeCamera {
    bridge: Arc<FramePipelineBridge>,
    listener: Arc<dyn CameraStateListener>,
    config: CrabCaptureConfig,
    snapshot: SharedSnapshot,
    enumerate: Enumerator,
    epoch: Arc<AtomicU64>,
    worker: Mutex<Option<NativeWorker>>,
    /// Camera thread closed from its own listener callback, not yet joined.
    retiring: Mutex<Option<JoinHandle<()>>>,
    last_size: Mutex<Option<Size>>,
}

impl NativeCamera {
    pub fn new(
        bridge: Arc<FramePipelineBridge>,
        listener: Arc<dyn CameraStateListener>,
        config: CrabCaptureConfig,
    ) -> Result<Self, CameraError> {
        Self::with_enumerator(bridge, listener, config, list_native_devices)
    }

    fn with_enumerator(
        bridge: Arc<FramePipelineBridge>,
        listener: Arc<dyn CameraStateListener>,
        config: CrabCaptureConfig,
        enumerate: Enumerator,
    ) -> Result<Self, CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::InitializationError(format!("Invalid configuration: {}", e)))?;
        Ok(Self {
            bridge,
            listener,
            config,
            snapshot: SharedSnapshot::default(),
            enumerate,
            epoch: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
            retiring: Mutex::new(None),
            last_size: Mutex::new(None),
        })
    }

    fn snapshot(&self) -> ControlSnapshot {
        *self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<NativeWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_retiring(&self) -> Option<JoinHandle<()>> {
        self.retiring.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn open_with(&self, facing: Facing, size: Size) {
        // The listener may call straight back into the camera.
        if let Err(e) = self.start_worker(facing, size) {
            log::error!("Native open failed: {}", e);
            self.listener.on_error(&e);
        }
    }

    fn start_worker(&self, facing: Facing, size: Size) -> Result<(), CameraError> {
        let mut worker = self.lock_worker();
        if worker.is_some() && self.snapshot().state != SessionState::Idle {
            log::warn!(
                "Rejecting open: {}",
                CameraError::InvalidState("native camera already open; close first".to_string())
            );
            return Ok(());
        }
        *self.last_size.lock().unwrap_or_else(PoisonError::into_inner) = Some(size);

        let devices = (self.enumerate)()?;
        let index = pick_device(&devices, facing)?;

        let predecessor = match worker.take() {
            Some(mut previous) => {
                let _ = previous.sender.send(NativeCommand::Close);
                previous.handle.take()
            }
            None => None,
        }
        .or_else(|| self.take_retiring());

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            *snapshot = ControlSnapshot {
                state: SessionState::Opening,
                facing: Some(facing),
                ..ControlSnapshot::default()
            };
        }

        let (sender, receiver) = crossbeam_channel::unbounded();
        let ctx = WorkerContext {
            index,
            facing,
            requested: size,
            bridge: Arc::clone(&self.bridge),
            listener: Arc::clone(&self.listener),
            snapshot: Arc::clone(&self.snapshot),
            epoch,
            current: Arc::clone(&self.epoch),
            predecessor,
            join_timeout: self.config.worker.join_timeout(),
        };
        let handle = thread::Builder::new()
            .name(self.config.worker.thread_name.clone())
            .spawn(move || run(ctx, receiver))
            .map_err(|e| {
                self.snapshot.write().unwrap_or_else(PoisonError::into_inner).state =
                    SessionState::Idle;
                CameraError::InitializationError(format!("worker spawn failed: {e}"))
            })?;
        *worker = Some(NativeWorker {
            sender,
            handle: Some(handle),
        });
        Ok(())
    }

    fn stop_worker(&self) {
        let worker = self.lock_worker().take();
        let handle = match worker {
            Some(mut worker) => {
                let _ = worker.sender.send(NativeCommand::Close);
                worker.handle.take()
            }
            None => self.take_retiring(),
        };
        let Some(handle) = handle else {
            return;
        };

        if handle.thread().id() == thread::current().id() {
            // Inside a listener callback: the camera thread closes once the
            // callback returns, and the next open joins it.
            log::debug!("Close requested from a listener callback; not joining the camera thread");
            *self.retiring.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            return;
        }
        join_with_timeout(handle, self.config.worker.join_timeout());
    }
}

impl CameraControl for NativeCamera {
    fn open(&self, facing: Facing, width: u32, height: u32) {
        self.open_with(facing, Size::new(width, height));
    }

    fn close(&self) {
        self.stop_worker();
    }

    fn switch_camera(&self) {
        let facing = self
            .snapshot()
            .facing
            .unwrap_or(self.config.camera.default_facing)
            .opposite();
        let size = self
            .last_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(|| self.config.camera.default_size());
        self.close();
        self.open_with(facing, size);
    }

    fn zoom_ratio(&self) -> f32 {
        self.snapshot().zoom_ratio
    }

    fn set_zoom_ratio(&self, ratio: f32) {
        if let Some(worker) = self.lock_worker().as_ref() {
            let _ = worker.sender.send(NativeCommand::SetZoom(ratio));
        }
    }

    fn min_zoom_ratio(&self) -> f32 {
        self.snapshot().zoom_range.min
    }

    fn max_zoom_ratio(&self) -> f32 {
        self.snapshot().zoom_range.max
    }

    fn is_flash_available(&self) -> bool {
        false
    }

    fn enable_torch(&self, enabled: bool) {
        log::warn!(
            "Ignoring torch {}: {}",
            if enabled { "on" } else { "off" },
            CameraError::UnsupportedCapability("platform camera exposes no torch".to_string())
        );
    }

    fn start_focus_and_metering_center(&self) {
        log::debug!("Center focus left to the platform's automatic focus");
    }

    fn start_focus_and_metering(&self, x: f32, y: f32, _width: f32, _height: f32, flags: MeteringFlags) {
        log::debug!(
            "Focus at ({}, {}) with flags {:#b} left to the platform's automatic modes",
            x,
            y,
            flags.bits()
        );
    }

    fn state(&self) -> SessionState {
        self.snapshot().state
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, TestSurface};
    use std::sync::atomic::AtomicBool;
    use std::sync::{OnceLock, Weak};

    /// Closes the camera from `on_error`, and reopens once if asked to.
    #[derive(Default)]
    struct ClosingListener {
        camera: OnceLock<Weak<NativeCamera>>,
        errors: Mutex<Vec<CameraError>>,
        reopen: AtomicBool,
    }

    impl CameraStateListener for ClosingListener {
        fn on_opened(&self) {}

        fn on_closed(&self) {}

        fn on_error(&self, error: &CameraError) {
            self.errors.lock().unwrap().push(error.clone());
            if let Some(camera) = self.camera.get().and_then(Weak::upgrade) {
                camera.close();
                if self.reopen.swap(false, Ordering::SeqCst) {
                    camera.open(Facing::Back, 640, 480);
                }
            }
        }
    }

    fn camera_with(enumerate: Enumerator, listener: Arc<ClosingListener>) -> Arc<NativeCamera> {
        let bridge = Arc::new(FramePipelineBridge::new(
            Arc::new(TestSurface::default()),
            Arc::new(RecordingSink::default()),
        ));
        let camera = Arc::new(
            NativeCamera::with_enumerator(bridge, listener.clone(), CrabCaptureConfig::default(), enumerate)
                .unwrap(),
        );
        listener.camera.set(Arc::downgrade(&camera)).unwrap();
        camera
    }

    #[test]
    fn test_close_from_on_error_without_devices() {
        let listener = Arc::new(ClosingListener::default());
        listener.reopen.store(true, Ordering::SeqCst);
        let camera = camera_with(|| Ok(Vec::new()), listener.clone());

        camera.open(Facing::Front, 640, 480);

        let errors = listener.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, CameraError::AccessError(_))));
        assert_eq!(camera.state(), SessionState::Idle);
    }

    #[test]
    fn test_close_from_on_error_when_enumeration_fails() {
        let listener = Arc::new(ClosingListener::default());
        let camera = camera_with(
            || Err(CameraError::InitializationError("no camera backend".to_string())),
            listener.clone(),
        );

        camera.open(Facing::Back, 640, 480);
        camera.switch_camera();

        let errors = listener.errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], CameraError::InitializationError(_)));
        assert_eq!(camera.state(), SessionState::Idle);
    }

    #[test]
    fn test_pick_device_prefers_facing_then_first() {
        let devices = vec![
            DeviceDescriptor::new("0", Facing::Front),
            DeviceDescriptor::new("3", Facing::Back),
        ];
        assert_eq!(pick_device(&devices, Facing::Back).unwrap(), 3);
        assert_eq!(pick_device(&devices, Facing::Front).unwrap(), 0);

        let lone = vec![DeviceDescriptor::new("2", Facing::Front)];
        assert_eq!(pick_device(&lone, Facing::Back).unwrap(), 2);

        assert!(matches!(pick_device(&[], Facing::Back), Err(CameraError::AccessError(_))));
        let unnamed = vec![DeviceDescriptor::new("usb-cam", Facing::Back)];
        assert!(pick_device(&unnamed, Facing::Back).is_err());
    }

    #[test]
    fn test_close_queued_while_opening_is_seen() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut pending_zoom = None;

        sender.send(NativeCommand::SetZoom(2.0)).unwrap();
        sender.send(NativeCommand::SetZoom(3.0)).unwrap();
        assert!(!close_requested(&receiver, &mut pending_zoom));
        assert_eq!(pending_zoom, Some(3.0));

        sender.send(NativeCommand::Close).unwrap();
        assert!(close_requested(&receiver, &mut pending_zoom));

        drop(sender);
        assert!(close_requested(&receiver, &mut pending_zoom));
    }

    #[test]
    fn test_join_with_timeout_detaches_stuck_thread() {
        let quick = thread::spawn(|| {});
        assert!(join_with_timeout(quick, Duration::from_secs(1)));

        let stuck = thread::spawn(|| thread::sleep(Duration::from_millis(500)));
        assert!(!join_with_timeout(stuck, Duration::from_millis(20)));
    }

    #[test]
    fn test_zoom_control_maps_ratio_to_integer_range() {
        let zoom = ZoomControl::from_description(&ControlValueDescription::IntegerRange {
            min: 100,
            max: 400,
            value: 100,
            step: 1,
            default: 100,
        })
        .unwrap();
        assert_eq!(zoom.range().max, 4.0);
        assert_eq!(zoom.value_for(2.0), 200);
        assert_eq!(zoom.value_for(10.0), 400);
    }

    #[test]
    fn test_zero_based_zoom_is_unusable() {
        let zoom = ZoomControl::from_description(&ControlValueDescription::IntegerRange {
            min: 0,
            max: 10,
            value: 0,
            step: 1,
            default: 0,
        });
        assert!(zoom.is_none());
    }
}
