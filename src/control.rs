//! The public camera capability contract
//!
//! Two implementations exist: [`CaptureFacade`](crate::facade::CaptureFacade)
//! over the session-managed core, and, with the `native` feature,
//! `platform::native::NativeCamera`, which delegates to the platform camera
//! stack. Callers should depend on [`CameraControl`] only.

use crate::errors::CameraError;
use crate::types::{Facing, MeteringFlags, SessionState};

/// Lifecycle notifications. Called from the camera worker thread.
pub trait CameraStateListener: Send + Sync {
    /// The camera is streaming.
    fn on_opened(&self);

    /// The camera closed cleanly after a `close()`.
    fn on_closed(&self);

    /// The camera closed because of a failure. Never followed by `on_closed`.
    fn on_error(&self, error: &CameraError);

    fn on_state_changed(&self, _state: SessionState) {}
}

/// Listener that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl CameraStateListener for LoggingListener {
    fn on_opened(&self) {
        log::info!("Camera opened");
    }

    fn on_closed(&self) {
        log::info!("Camera closed");
    }

    fn on_error(&self, error: &CameraError) {
        log::error!("Camera error: {}", error);
    }
}

pub trait CameraControl {
    /// Queue an open. Completion arrives through the listener.
    fn open(&self, facing: Facing, width: u32, height: u32);

    /// Close the camera and stop its worker.
    ///
    /// Blocks until the hardware is released and `on_closed` has fired, for at
    /// most the configured worker join timeout. Called from inside a listener
    /// callback it only queues the close and returns.
    fn close(&self);

    /// Close, then reopen with the opposite facing at the last requested size.
    fn switch_camera(&self);

    fn zoom_ratio(&self) -> f32;

    fn set_zoom_ratio(&self, ratio: f32);

    fn min_zoom_ratio(&self) -> f32;

    fn max_zoom_ratio(&self) -> f32;

    fn is_flash_available(&self) -> bool;

    fn enable_torch(&self, enabled: bool);

    fn start_focus_and_metering_center(&self);

    /// Preview-space point and region size; `flags` selects AF, AE and AWB.
    fn start_focus_and_metering(&self, x: f32, y: f32, width: f32, height: f32, flags: MeteringFlags);

    fn state(&self) -> SessionState;
}
