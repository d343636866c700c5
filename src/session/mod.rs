//! Session state machine
//!
//! # Spell: SessionLifecycle
//! ^ Intent: own the device and session handles and drive them through one
//!   well-defined lifecycle, whatever order the hardware answers in
//!
//! @SessionStateMachine
//!   : Idle -> Opening -> Opened -> ConfiguringSession -> Streaming -> Closing -> Idle
//!   : Opening | ConfiguringSession | Streaming -> Error -> Idle
//!   ! at_most_one_live_session
//!   ! close_releases_session_then_device
//!   ! stale_callbacks_rolled_back
//!   ! streaming_requires_bound_surface
//!   - open_replacing_live_session
//!
//! The machine is not thread-safe by itself; it lives on the camera worker
//! (see [`worker`]) and sees one message at a time.

pub mod worker;

use crate::assert_invariant;
use crate::bridge::FramePipelineBridge;
use crate::config::{CrabCaptureConfig, FocusConfig};
use crate::control::CameraStateListener;
use crate::errors::CameraError;
use crate::invariant_ppt::STREAMING_HAS_SURFACE;
use crate::negotiation::SizeNegotiator;
use crate::platform::{CameraDevice, CameraHardware, CaptureSession, CaptureSurface, HardwareCallbacks};
use crate::request::{FocusRequest, RequestCoordinator, Submission};
use crate::types::{DeviceDescriptor, Facing, SessionState, Size, VideoOrientation, ZoomRange};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use worker::{Command, HardwareEvent, WorkerMessage};

/// Read-only view the worker publishes after every message, so getters never
/// wait on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlSnapshot {
    pub state: SessionState,
    pub facing: Option<Facing>,
    pub zoom_ratio: f32,
    pub zoom_range: ZoomRange,
    pub flash_available: bool,
    /// Negotiated stream size of the live session.
    pub stream_size: Option<Size>,
}

impl Default for ControlSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            facing: None,
            zoom_ratio: 1.0,
            zoom_range: ZoomRange::default(),
            flash_available: false,
            stream_size: None,
        }
    }
}

pub type SharedSnapshot = Arc<RwLock<ControlSnapshot>>;

/// Collaborators shared by every worker a facade spawns.
#[derive(Clone)]
pub struct SessionContext {
    pub hardware: Arc<dyn CameraHardware>,
    pub bridge: Arc<FramePipelineBridge>,
    pub listener: Arc<dyn CameraStateListener>,
    pub snapshot: SharedSnapshot,
}

pub struct SessionStateMachine {
    ctx: SessionContext,
    sender: Sender<WorkerMessage>,
    negotiator: SizeNegotiator,
    focus: FocusConfig,
    state: SessionState,
    /// Bumped per open attempt and on every teardown; callbacks carrying an
    /// older value are stale.
    generation: u64,
    descriptor: Option<DeviceDescriptor>,
    coordinator: Option<RequestCoordinator>,
    device: Option<Box<dyn CameraDevice>>,
    session: Option<Box<dyn CaptureSession>>,
    surface: Option<Arc<dyn CaptureSurface>>,
    stream_size: Option<Size>,
}

impl SessionStateMachine {
    pub fn new(ctx: SessionContext, config: &CrabCaptureConfig, sender: Sender<WorkerMessage>) -> Self {
        Self {
            ctx,
            sender,
            negotiator: SizeNegotiator::new(config.camera.match_rotated_sizes),
            focus: config.focus.clone(),
            state: SessionState::Idle,
            generation: 0,
            descriptor: None,
            coordinator: None,
            device: None,
            session: None,
            surface: None,
            stream_size: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn coordinator(&self) -> Option<&RequestCoordinator> {
        self.coordinator.as_ref()
    }

    /// Process one message from the worker queue.
    pub fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Command(command) => self.handle_command(command),
            WorkerMessage::Hardware { generation, event } => {
                self.handle_hardware(generation, event)
            }
            WorkerMessage::Shutdown => {}
        }
        self.publish();
    }

    /// Handle a message left in the queue after shutdown: no hardware calls,
    /// only rollback of resources that arrived too late.
    pub fn drain(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Hardware { event, .. } => event.roll_back(),
            WorkerMessage::Command(Command::Flush(reply)) => {
                let _ = reply.send(());
            }
            WorkerMessage::Command(command) => {
                log::debug!("Dropping {:?} queued after shutdown", command);
            }
            WorkerMessage::Shutdown => {}
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { facing, size } => self.open(facing, size),
            Command::Close => self.close(),
            Command::SetZoom(ratio) => {
                self.mutate("zoom", |coordinator, session| coordinator.set_zoom(ratio, session))
            }
            Command::SetTorch(enabled) => {
                self.mutate("torch", |coordinator, session| coordinator.set_torch(enabled, session))
            }
            Command::FocusAndMeter(focus) => self.focus_and_meter(focus),
            Command::FocusAndMeterCenter => match self.preview_size() {
                Some(preview) => self.focus_and_meter(FocusRequest::center(
                    preview,
                    self.focus.center_region_fraction,
                )),
                None => log::warn!("No preview size known; ignoring center focus"),
            },
            Command::SetVideoOrientation(orientation) => self.set_video_orientation(orientation),
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        log::debug!("Camera session {} -> {}", self.state, next);
        self.state = next;
        self.publish();
        self.ctx.listener.on_state_changed(next);
    }

    fn publish(&self) {
        let coordinator = self.coordinator.as_ref();
        let zoom_range = coordinator
            .map(|c| c.zoom_range())
            .or_else(|| {
                self.descriptor
                    .as_ref()
                    .map(|d| ZoomRange::from_device(Some(d.zoom_range.min), Some(d.zoom_range.max)))
            })
            .unwrap_or_default();

        let snapshot = ControlSnapshot {
            state: self.state,
            facing: self.descriptor.as_ref().map(|d| d.facing),
            zoom_ratio: coordinator.map_or(zoom_range.min, |c| c.zoom_ratio()),
            zoom_range,
            flash_available: self.descriptor.as_ref().is_some_and(|d| d.flash_available),
            stream_size: self.stream_size,
        };

        *self
            .ctx
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn callbacks(&self) -> HardwareCallbacks {
        HardwareCallbacks::new(self.generation, self.sender.clone())
    }

    fn open(&mut self, facing: Facing, requested: Size) {
        if self.state != SessionState::Idle {
            let err = CameraError::InvalidState(format!(
                "open requested while {}; close first",
                self.state
            ));
            log::warn!("Rejecting open: {}", err);
            return;
        }

        log::info!("Opening {} camera at {}", facing, requested);
        self.generation += 1;
        self.transition(SessionState::Opening);

        if let Err(e) = self.begin_open(facing, requested) {
            self.fail(e);
        }
    }

    fn begin_open(&mut self, facing: Facing, requested: Size) -> Result<(), CameraError> {
        let descriptor = self
            .ctx
            .hardware
            .devices()?
            .into_iter()
            .find(|d| d.facing == facing)
            .ok_or_else(|| CameraError::AccessError(format!("no {} camera on this host", facing)))?;

        let size = self.negotiator.choose(
            &descriptor.output_sizes,
            requested,
            descriptor.sensor_orientation,
        )?;

        let surface = self.ctx.bridge.surface();
        surface.set_default_buffer_size(size);

        self.surface = Some(surface);
        self.stream_size = Some(size);
        self.coordinator = Some(
            RequestCoordinator::new(descriptor.clone()).with_metering_weight(self.focus.metering_weight),
        );
        let device_id = descriptor.id.clone();
        self.descriptor = Some(descriptor);

        self.ctx.hardware.open_device(&device_id, self.callbacks())
    }

    fn handle_hardware(&mut self, generation: u64, event: HardwareEvent) {
        if generation != self.generation {
            log::warn!(
                "Stale {} callback from attempt {} (current {})",
                event.name(),
                generation,
                self.generation
            );
            event.roll_back();
            return;
        }

        match event {
            HardwareEvent::DeviceOpened(device) => self.on_device_opened(device),
            HardwareEvent::SessionConfigured(session) => self.on_session_configured(session),
            HardwareEvent::OpenFailed(e) => self.fail_if_live(e),
            HardwareEvent::SessionConfigureFailed(e) => {
                let e = match e {
                    CameraError::ConfigurationError(_) => e,
                    other => CameraError::ConfigurationError(other.message().to_string()),
                };
                self.fail_if_live(e)
            }
            HardwareEvent::Disconnected => {
                let e = if self.state == SessionState::Opening {
                    CameraError::AccessError("device disconnected while opening".to_string())
                } else {
                    CameraError::RuntimeDeviceError("device disconnected".to_string())
                };
                self.fail_if_live(e)
            }
            HardwareEvent::DeviceError(e) => self.fail_if_live(e),
        }
    }

    fn on_device_opened(&mut self, device: Box<dyn CameraDevice>) {
        if self.state != SessionState::Opening {
            log::warn!("Device {} opened while {}; closing it", device.id(), self.state);
            HardwareEvent::DeviceOpened(device).roll_back();
            return;
        }

        log::debug!("Device {} opened", device.id());
        self.device = Some(device);
        self.transition(SessionState::Opened);

        if let (Some(size), Some(descriptor)) = (self.stream_size, self.descriptor.as_ref()) {
            self.ctx
                .bridge
                .on_camera_frame_size(size, descriptor.sensor_orientation, descriptor.facing);
        }

        self.transition(SessionState::ConfiguringSession);
        let callbacks = self.callbacks();
        let result = match (self.device.as_mut(), self.surface.as_ref()) {
            (Some(device), Some(surface)) => {
                device.create_capture_session(Arc::clone(surface), callbacks)
            }
            _ => Err(CameraError::ConfigurationError(
                "no capture surface bound".to_string(),
            )),
        };

        if let Err(e) = result {
            let e = match e {
                CameraError::ConfigurationError(_) => e,
                other => CameraError::ConfigurationError(other.message().to_string()),
            };
            self.fail(e);
        }
    }

    fn on_session_configured(&mut self, session: Box<dyn CaptureSession>) {
        if self.state != SessionState::ConfiguringSession {
            log::warn!("Capture session configured while {}; closing it", self.state);
            HardwareEvent::SessionConfigured(session).roll_back();
            return;
        }

        self.session = Some(session);

        assert_invariant!(
            self.surface.is_some(),
            STREAMING_HAS_SURFACE,
            "session::on_session_configured"
        );

        let started = match (self.coordinator.as_mut(), self.session.as_mut()) {
            (Some(coordinator), Some(session)) => coordinator.start_repeating(&mut **session),
            _ => Err(CameraError::RuntimeDeviceError(
                "no request state for session".to_string(),
            )),
        };

        match started {
            Ok(()) => {
                self.transition(SessionState::Streaming);
                log::info!("Camera streaming");
                self.ctx.listener.on_opened();
            }
            Err(e) => self.fail(as_runtime_error(e)),
        }
    }

    fn mutate<F>(&mut self, what: &str, apply: F)
    where
        F: FnOnce(&mut RequestCoordinator, Option<&mut dyn CaptureSession>) -> Result<Submission, CameraError>,
    {
        let streaming = self.state == SessionState::Streaming;
        let Some(coordinator) = self.coordinator.as_mut() else {
            let err = CameraError::InvalidState(format!("no open camera for {}", what));
            log::warn!("Ignoring {}: {}", what, err);
            return;
        };

        let session = if streaming {
            self.session
                .as_deref_mut()
                .map(|s| s as &mut dyn CaptureSession)
        } else {
            None
        };

        match apply(coordinator, session) {
            Ok(outcome) => log::debug!("Applied {}: {:?}", what, outcome),
            Err(e) => {
                log::error!("Submitting {} failed: {}", what, e);
                self.fail(as_runtime_error(e));
            }
        }
    }

    fn focus_and_meter(&mut self, focus: FocusRequest) {
        let Some(preview) = self.preview_size() else {
            log::warn!("No preview size known; ignoring focus and metering");
            return;
        };
        self.mutate("focus and metering", |coordinator, session| {
            coordinator.focus_and_meter(focus, preview, session)
        });
    }

    /// Preview-space size for focus coordinates: the render surface if known,
    /// else the stream size turned upright.
    fn preview_size(&self) -> Option<Size> {
        self.ctx.bridge.surface_size().or_else(|| {
            let size = self.stream_size?;
            let descriptor = self.descriptor.as_ref()?;
            Some(if descriptor.sensor_orientation.is_transposed() {
                size.rotated()
            } else {
                size
            })
        })
    }

    fn set_video_orientation(&mut self, orientation: VideoOrientation) {
        log::debug!("Video orientation now {} degrees", orientation.degrees());
        self.ctx.bridge.set_video_orientation(orientation);
    }

    fn close(&mut self) {
        if self.state == SessionState::Idle {
            log::debug!("Close requested while idle; nothing to do");
            return;
        }

        log::info!("Closing camera");
        self.transition(SessionState::Closing);
        self.release();
        self.transition(SessionState::Idle);
        self.ctx.listener.on_closed();
    }

    fn fail_if_live(&mut self, error: CameraError) {
        if self.state == SessionState::Idle {
            log::warn!("Ignoring error reported while idle: {}", error);
            return;
        }
        self.fail(error);
    }

    fn fail(&mut self, error: CameraError) {
        log::error!("Camera failed while {}: {}", self.state, error);
        self.transition(SessionState::Error);
        self.release();
        self.transition(SessionState::Idle);
        self.ctx.listener.on_error(&error);
    }

    /// Stop repeating, close the session, close the device. Every step is
    /// attempted even if an earlier one fails.
    fn release(&mut self) {
        // Anything the hardware delivers for the abandoned attempt is stale now.
        self.generation += 1;

        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.stop_repeating() {
                log::warn!("Failed to stop repeating request: {}", e);
            }
            if let Err(e) = session.close() {
                log::warn!("Failed to close capture session: {}", e);
            }
        }

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.close() {
                log::warn!("Failed to close device {}: {}", device.id(), e);
            }
        }

        self.coordinator = None;
        self.surface = None;
        self.stream_size = None;
        self.ctx.bridge.on_camera_closed();
    }
}

fn as_runtime_error(error: CameraError) -> CameraError {
    match error {
        CameraError::RuntimeDeviceError(_) => error,
        other => CameraError::RuntimeDeviceError(other.message().to_string()),
    }
}

impl Drop for SessionStateMachine {
    fn drop(&mut self) {
        if self.device.is_some() || self.session.is_some() {
            log::warn!("Session state machine dropped with live hardware; releasing");
            self.release();
            self.state = SessionState::Idle;
            self.publish();
        }
    }
}
