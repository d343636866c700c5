//! CrabCapture: camera capture session control with preview geometry sync
//!
//! Opens an imaging device, negotiates a preview stream, keeps one repeating
//! capture request (zoom crop, torch, AF/AE/AWB regions) in step with the
//! hardware, and tells a downstream frame sink how to draw what arrives.
//!
//! # Features
//! - Serialized camera worker: commands and hardware callbacks never interleave
//! - Open/close races resolved by rolling back late device and session results
//! - Preview-to-sensor coordinate mapping for tap-to-focus and crop zoom
//! - Simulated hardware for offline testing
//! - Optional platform backend via `nokhwa` (feature `native`)
//!
//! # Usage
//! ```rust,ignore
//! use crabcapture::testing::{synthetic_back_camera, RecordingSink, SimulatedHardware, TestSurface};
//! use crabcapture::{CameraControl, CaptureFacade, CrabCaptureConfig, Facing, FramePipelineBridge, LoggingListener};
//! use std::sync::Arc;
//!
//! let bridge = Arc::new(FramePipelineBridge::new(
//!     Arc::new(TestSurface::default()),
//!     Arc::new(RecordingSink::default()),
//! ));
//! let camera = CaptureFacade::new(
//!     Arc::new(SimulatedHardware::new(vec![synthetic_back_camera()])),
//!     bridge,
//!     Arc::new(LoggingListener),
//!     CrabCaptureConfig::default(),
//! )?;
//! camera.open(Facing::Back, 720, 1280);
//! camera.set_zoom_ratio(2.0);
//! camera.start_focus_and_metering_center();
//! camera.close();
//! ```
pub mod bridge;
pub mod config;
pub mod control;
pub mod errors;
pub mod facade;
pub mod geometry;
pub mod invariant_ppt;
pub mod negotiation;
pub mod platform;
pub mod request;
pub mod session;
pub mod types;

// Testing utilities - simulated hardware for offline testing
pub mod testing;

// Re-exports for convenience
pub use bridge::{FrameSink, FramePipelineBridge};
pub use config::CrabCaptureConfig;
pub use control::{CameraControl, CameraStateListener, LoggingListener};
pub use errors::{CameraError, CameraErrorKind};
pub use facade::CaptureFacade;
pub use platform::{CameraDevice, CameraHardware, CaptureSession, CaptureSurface, HardwareCallbacks};
pub use request::{CaptureRequest, Submission};
pub use types::{
    DeviceDescriptor, Facing, MeteringFlags, PreviewGeometry, SensorOrientation, SessionState,
    Size, VideoOrientation,
};

#[cfg(feature = "native")]
pub use platform::native::NativeCamera;

/// Initialize logging for the capture system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcapture=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        native_backend: cfg!(feature = "native"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub native_backend: bool,
}
