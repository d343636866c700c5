//! Hardware-layer seams
//!
//! The session core never talks to a camera stack directly. It drives these
//! traits, and the hardware layer answers asynchronously through
//! [`HardwareCallbacks`], which feeds every answer into the serialized worker.

use crate::errors::CameraError;
use crate::request::CaptureRequest;
use crate::session::worker::{HardwareEvent, WorkerMessage};
use crate::types::{DeviceDescriptor, Size};
use crossbeam_channel::{SendError, Sender};
use std::sync::Arc;

#[cfg(feature = "native")]
pub mod native;

/// Device enumeration and open, plus one-time library setup.
pub trait CameraHardware: Send + Sync {
    /// Called once when a facade is constructed.
    fn initialize(&self) -> Result<(), CameraError> {
        Ok(())
    }

    /// Called once when the owning facade is dropped.
    fn shutdown(&self) {}

    /// Ordered list of the devices on this host.
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError>;

    /// Begin opening `device_id`. The result arrives through `callbacks`.
    fn open_device(&self, device_id: &str, callbacks: HardwareCallbacks)
        -> Result<(), CameraError>;
}

/// An opened imaging device.
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Begin configuring a capture session targeting `surface`.
    /// The result arrives through `callbacks`.
    fn create_capture_session(
        &mut self,
        surface: Arc<dyn CaptureSurface>,
        callbacks: HardwareCallbacks,
    ) -> Result<(), CameraError>;

    fn close(&mut self) -> Result<(), CameraError>;
}

/// A configured capture session bound to one surface.
pub trait CaptureSession: Send {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), CameraError>;

    /// One-shot capture, not repeated.
    fn capture(&mut self, request: &CaptureRequest) -> Result<(), CameraError>;

    fn stop_repeating(&mut self) -> Result<(), CameraError>;

    fn close(&mut self) -> Result<(), CameraError>;
}

/// The GPU-visible image surface a session renders into.
///
/// Only buffer metadata is touched from the worker; pixel contents belong to
/// the rendering context.
pub trait CaptureSurface: Send + Sync {
    fn set_default_buffer_size(&self, size: Size);
}

/// Handle given to the hardware layer for delivering asynchronous results.
///
/// Each handle is stamped with the open attempt it belongs to. Results for an
/// attempt the worker has since abandoned are rolled back by the worker, and
/// results that cannot be delivered at all (worker already gone) are rolled
/// back here.
#[derive(Clone)]
pub struct HardwareCallbacks {
    generation: u64,
    sender: Sender<WorkerMessage>,
}

impl HardwareCallbacks {
    pub(crate) fn new(generation: u64, sender: Sender<WorkerMessage>) -> Self {
        Self { generation, sender }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device_opened(&self, device: Box<dyn CameraDevice>) {
        self.deliver(HardwareEvent::DeviceOpened(device));
    }

    pub fn open_failed(&self, error: CameraError) {
        self.deliver(HardwareEvent::OpenFailed(error));
    }

    pub fn disconnected(&self) {
        self.deliver(HardwareEvent::Disconnected);
    }

    pub fn device_error(&self, error: CameraError) {
        self.deliver(HardwareEvent::DeviceError(error));
    }

    pub fn session_configured(&self, session: Box<dyn CaptureSession>) {
        self.deliver(HardwareEvent::SessionConfigured(session));
    }

    pub fn session_configure_failed(&self, error: CameraError) {
        self.deliver(HardwareEvent::SessionConfigureFailed(error));
    }

    fn deliver(&self, event: HardwareEvent) {
        let message = WorkerMessage::Hardware {
            generation: self.generation,
            event,
        };

        if let Err(SendError(message)) = self.sender.send(message) {
            log::warn!(
                "Camera worker gone; dropping hardware callback for attempt {}",
                self.generation
            );
            if let WorkerMessage::Hardware { event, .. } = message {
                event.roll_back();
            }
        }
    }
}

impl std::fmt::Debug for HardwareCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareCallbacks")
            .field("generation", &self.generation)
            .finish()
    }
}
