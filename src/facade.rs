//! CaptureFacade: the session-managed [`CameraControl`] implementation
//!
//! Public calls only queue commands for the camera worker and return; `close()`
//! is the exception and waits for the worker. The worker is spawned on the
//! first `open()` and joined on `close()` or when the facade is dropped.
//! Getters read the snapshot the worker publishes.
//!
//! Listener callbacks run on the worker, and may call back into the facade.
//! Such calls never spawn a second worker: a close, switch or reopen from a
//! callback is queued behind the message being handled.

use crate::bridge::FramePipelineBridge;
use crate::config::CrabCaptureConfig;
use crate::control::{CameraControl, CameraStateListener};
use crate::errors::CameraError;
use crate::platform::CameraHardware;
use crate::request::FocusRequest;
use crate::session::worker::{self, CameraWorker, Command};
use crate::session::{ControlSnapshot, SessionContext, SessionStateMachine, SharedSnapshot};
use crate::types::{Facing, MeteringFlags, SessionState, Size, VideoOrientation};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Last open intent, reused by `switch_camera`.
#[derive(Debug, Clone, Copy)]
struct OpenIntent {
    facing: Facing,
    size: Size,
}

pub struct CaptureFacade {
    ctx: SessionContext,
    config: CrabCaptureConfig,
    worker: Mutex<Option<CameraWorker>>,
    intent: Mutex<Option<OpenIntent>>,
}

impl CaptureFacade {
    /// Validates `config` and initializes the hardware layer once.
    pub fn new(
        hardware: Arc<dyn CameraHardware>,
        bridge: Arc<FramePipelineBridge>,
        listener: Arc<dyn CameraStateListener>,
        config: CrabCaptureConfig,
    ) -> Result<Self, CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::InitializationError(format!("Invalid configuration: {}", e)))?;
        hardware.initialize()?;

        log::debug!("Capture facade ready");
        Ok(Self {
            ctx: SessionContext {
                hardware,
                bridge,
                listener,
                snapshot: SharedSnapshot::default(),
            },
            config,
            worker: Mutex::new(None),
            intent: Mutex::new(None),
        })
    }

    pub fn bridge(&self) -> &Arc<FramePipelineBridge> {
        &self.ctx.bridge
    }

    pub fn config(&self) -> &CrabCaptureConfig {
        &self.config
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        *self
            .ctx
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Output orientation of the published video; recomputes preview geometry.
    pub fn set_video_orientation(&self, orientation: VideoOrientation) {
        if !self.submit(Command::SetVideoOrientation(orientation)) {
            // No worker to serialize against; the bridge is safe to touch directly.
            self.ctx.bridge.set_video_orientation(orientation);
        }
    }

    /// Block until every command queued so far has been handled.
    /// Returns false if there is no worker or it did not answer in time.
    ///
    /// Inside a listener callback the worker is busy running that callback,
    /// so this returns false at once.
    pub fn flush(&self, timeout: Duration) -> bool {
        let queue = match self.lock_worker().as_ref() {
            Some(worker) if worker.on_worker_thread() => {
                log::debug!("Flush requested from the camera worker; not waiting on itself");
                return false;
            }
            Some(worker) => worker.queue(),
            None => return false,
        };
        worker::flush_queue(&queue, timeout)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<CameraWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, command: Command) -> bool {
        match self.lock_worker().as_ref() {
            Some(worker) => worker.submit(command),
            None => false,
        }
    }

    fn submit_or_log(&self, command: Command) {
        let name = format!("{:?}", command);
        if !self.submit(command) {
            let err = CameraError::InvalidState("camera is not open".to_string());
            log::warn!("Ignoring {}: {}", name, err);
        }
    }

    fn open_with(&self, facing: Facing, size: Size) {
        *self.intent.lock().unwrap_or_else(PoisonError::into_inner) = Some(OpenIntent { facing, size });

        let spawn_error = {
            let mut worker = self.lock_worker();
            let mut spawn_error = None;
            if worker.is_none() {
                let ctx = self.ctx.clone();
                let config = self.config.clone();
                match CameraWorker::spawn(
                    &self.config.worker.thread_name,
                    self.config.worker.join_timeout(),
                    move |sender| SessionStateMachine::new(ctx, &config, sender),
                ) {
                    Ok(spawned) => *worker = Some(spawned),
                    Err(e) => spawn_error = Some(e),
                }
            }
            if let Some(worker) = worker.as_ref() {
                worker.submit(Command::Open { facing, size });
            }
            spawn_error
        };

        // The listener may call straight back into the facade.
        if let Some(e) = spawn_error {
            log::error!("Cannot open camera: {}", e);
            self.ctx.listener.on_error(&e);
        }
    }

    fn shutdown_worker(&self) {
        let worker = {
            let mut guard = self.lock_worker();
            if let Some(worker) = guard.as_ref().filter(|w| w.on_worker_thread()) {
                // Inside a listener callback: the worker keeps running and
                // closes the session right after the callback returns, so
                // anything queued next (a reopen) lands on the same worker.
                log::debug!("Close requested from a listener callback; queuing it");
                worker.submit(Command::Close);
                return;
            }
            guard.take()
        };
        match worker {
            Some(worker) => {
                if let Err(e) = worker.shutdown() {
                    log::warn!("Camera worker shutdown: {}", e);
                }
            }
            None => log::debug!("Close requested with no camera worker; nothing to do"),
        }
    }
}

impl CameraControl for CaptureFacade {
    fn open(&self, facing: Facing, width: u32, height: u32) {
        self.open_with(facing, Size::new(width, height));
    }

    fn close(&self) {
        self.shutdown_worker();
    }

    fn switch_camera(&self) {
        let intent = *self.intent.lock().unwrap_or_else(PoisonError::into_inner);
        let (facing, size) = match (intent, self.snapshot().facing) {
            (Some(intent), Some(current)) => (current.opposite(), intent.size),
            (Some(intent), None) => (intent.facing.opposite(), intent.size),
            (None, _) => (
                self.config.camera.default_facing.opposite(),
                self.config.camera.default_size(),
            ),
        };

        log::info!("Switching to {} camera", facing);
        self.close();
        self.open_with(facing, size);
    }

    fn zoom_ratio(&self) -> f32 {
        self.snapshot().zoom_ratio
    }

    fn set_zoom_ratio(&self, ratio: f32) {
        self.submit_or_log(Command::SetZoom(ratio));
    }

    fn min_zoom_ratio(&self) -> f32 {
        self.snapshot().zoom_range.min
    }

    fn max_zoom_ratio(&self) -> f32 {
        self.snapshot().zoom_range.max
    }

    fn is_flash_available(&self) -> bool {
        self.snapshot().flash_available
    }

    fn enable_torch(&self, enabled: bool) {
        self.submit_or_log(Command::SetTorch(enabled));
    }

    fn start_focus_and_metering_center(&self) {
        self.submit_or_log(Command::FocusAndMeterCenter);
    }

    fn start_focus_and_metering(&self, x: f32, y: f32, width: f32, height: f32, flags: MeteringFlags) {
        self.submit_or_log(Command::FocusAndMeter(FocusRequest::new(
            x, y, width, height, flags,
        )));
    }

    fn state(&self) -> SessionState {
        self.snapshot().state
    }
}

impl Drop for CaptureFacade {
    fn drop(&mut self) {
        self.shutdown_worker();
        self.ctx.hardware.shutdown();
        log::debug!("Capture facade dropped");
    }
}
