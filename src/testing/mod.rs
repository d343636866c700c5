//! Testing utilities for CrabCapture
//!
//! Simulated camera hardware with scriptable timing, recording listener and
//! sink doubles, and synthetic device descriptors modelled on common phone
//! camera modules. Everything here runs offline without a camera.

pub mod recording;
pub mod simulated;
pub mod synthetic_data;

pub use recording::{ListenerEvent, RecordingListener, RecordingSink, TestSurface};
pub use simulated::{
    HalCall, HalJournal, OpenBehavior, RecordedSession, SessionBehavior, SimulatedHardware,
};
pub use synthetic_data::{phone_output_sizes, synthetic_back_camera, synthetic_front_camera};
