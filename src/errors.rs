use thiserror::Error;

/// Errors surfaced by the capture core.
///
/// Hardware failures never escape as panics or dangling state: the session
/// state machine converts them into one of these and hands it to the
/// listener after driving itself back to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// Device busy, disconnected or permission denied while opening.
    #[error("Camera access error: {0}")]
    AccessError(String),
    /// Capture session creation rejected, or no usable stream size.
    #[error("Session configuration error: {0}")]
    ConfigurationError(String),
    /// Asynchronous hardware fault while the session is live.
    #[error("Runtime device error: {0}")]
    RuntimeDeviceError(String),
    /// Zoom, torch or metering requested on a device that lacks it.
    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Camera initialization error: {0}")]
    InitializationError(String),
}

/// Discriminant of [`CameraError`], handy for matching without the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum CameraErrorKind {
    Access,
    Configuration,
    RuntimeDevice,
    UnsupportedCapability,
    InvalidState,
    Initialization,
}

impl CameraError {
    pub fn kind(&self) -> CameraErrorKind {
        match self {
            CameraError::AccessError(_) => CameraErrorKind::Access,
            CameraError::ConfigurationError(_) => CameraErrorKind::Configuration,
            CameraError::RuntimeDeviceError(_) => CameraErrorKind::RuntimeDevice,
            CameraError::UnsupportedCapability(_) => CameraErrorKind::UnsupportedCapability,
            CameraError::InvalidState(_) => CameraErrorKind::InvalidState,
            CameraError::InitializationError(_) => CameraErrorKind::Initialization,
        }
    }

    /// The message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            CameraError::AccessError(msg)
            | CameraError::ConfigurationError(msg)
            | CameraError::RuntimeDeviceError(msg)
            | CameraError::UnsupportedCapability(msg)
            | CameraError::InvalidState(msg)
            | CameraError::InitializationError(msg) => msg,
        }
    }

    /// Whether this error ends a session (as opposed to being logged and ignored).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            CameraError::UnsupportedCapability(_) | CameraError::InvalidState(_)
        )
    }
}
