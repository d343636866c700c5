//! In-memory camera hardware
//!
//! `SimulatedHardware` answers opens and session configuration either right
//! away, on demand (`complete_pending_open` / `complete_pending_session`), or
//! with a scripted failure, and journals every hardware call. That is enough
//! to replay the open/close races a real device produces.

use crate::errors::CameraError;
use crate::platform::{CameraDevice, CameraHardware, CaptureSession, CaptureSurface, HardwareCallbacks};
use crate::request::CaptureRequest;
use crate::types::DeviceDescriptor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One call made into the hardware layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalCall {
    OpenDevice(String),
    CreateSession,
    SetRepeating(CaptureRequest),
    Capture(CaptureRequest),
    StopRepeating,
    CloseSession,
    CloseDevice(String),
}

/// Shared, append-only record of hardware calls.
#[derive(Debug, Clone, Default)]
pub struct HalJournal {
    calls: Arc<Mutex<Vec<HalCall>>>,
}

impl HalJournal {
    fn lock(&self) -> MutexGuard<'_, Vec<HalCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, call: HalCall) {
        self.lock().push(call);
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// How `open_device` answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    Immediate,
    /// Held until `complete_pending_open`.
    Deferred,
    Fail(CameraError),
}

/// How `create_capture_session` answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBehavior {
    Immediate,
    /// Held until `complete_pending_session`.
    Deferred,
    Fail(CameraError),
}

struct SimState {
    open_behavior: OpenBehavior,
    session_behavior: SessionBehavior,
    pending_open: Option<(String, HardwareCallbacks)>,
    pending_session: Option<HardwareCallbacks>,
    live_callbacks: Option<HardwareCallbacks>,
    open_devices: usize,
    fail_submissions: bool,
    fail_session_close: bool,
    initialized: bool,
    shut_down: bool,
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<SimState>>,
    journal: HalJournal,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SimulatedHardware {
    devices: Vec<DeviceDescriptor>,
    shared: Shared,
}

impl SimulatedHardware {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices,
            shared: Shared {
                state: Arc::new(Mutex::new(SimState {
                    open_behavior: OpenBehavior::Immediate,
                    session_behavior: SessionBehavior::Immediate,
                    pending_open: None,
                    pending_session: None,
                    live_callbacks: None,
                    open_devices: 0,
                    fail_submissions: false,
                    fail_session_close: false,
                    initialized: false,
                    shut_down: false,
                })),
                journal: HalJournal::default(),
            },
        }
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        self.shared.lock().open_behavior = behavior;
    }

    pub fn set_session_behavior(&self, behavior: SessionBehavior) {
        self.shared.lock().session_behavior = behavior;
    }

    /// Make every request submission fail.
    pub fn fail_submissions(&self, fail: bool) {
        self.shared.lock().fail_submissions = fail;
    }

    pub fn fail_session_close(&self, fail: bool) {
        self.shared.lock().fail_session_close = fail;
    }

    /// Deliver a deferred open. Returns false if none was pending.
    pub fn complete_pending_open(&self) -> bool {
        let pending = self.shared.lock().pending_open.take();
        match pending {
            Some((id, callbacks)) => {
                self.shared.deliver_device(id, callbacks);
                true
            }
            None => false,
        }
    }

    /// Deliver a deferred session. Returns false if none was pending.
    pub fn complete_pending_session(&self) -> bool {
        let pending = self.shared.lock().pending_session.take();
        match pending {
            Some(callbacks) => {
                callbacks.session_configured(Box::new(SimulatedSession {
                    shared: self.shared.clone(),
                }));
                true
            }
            None => false,
        }
    }

    /// Report the most recently opened device as disconnected.
    pub fn disconnect(&self) -> bool {
        let live = self.shared.lock().live_callbacks.take();
        match live {
            Some(callbacks) => {
                callbacks.disconnected();
                true
            }
            None => false,
        }
    }

    /// Report an asynchronous fault on the most recently opened device.
    pub fn raise_device_error(&self, error: CameraError) -> bool {
        let live = self.shared.lock().live_callbacks.clone();
        match live {
            Some(callbacks) => {
                callbacks.device_error(error);
                true
            }
            None => false,
        }
    }

    /// Devices handed out and not yet closed.
    pub fn open_devices(&self) -> usize {
        self.shared.lock().open_devices
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock().initialized
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shut_down
    }

    pub fn journal(&self) -> Vec<HalCall> {
        self.shared.journal.calls()
    }

    pub fn clear_journal(&self) {
        self.shared.journal.clear();
    }

    pub fn repeating_requests(&self) -> Vec<CaptureRequest> {
        self.journal()
            .into_iter()
            .filter_map(|call| match call {
                HalCall::SetRepeating(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn captures(&self) -> Vec<CaptureRequest> {
        self.journal()
            .into_iter()
            .filter_map(|call| match call {
                HalCall::Capture(request) => Some(request),
                _ => None,
            })
            .collect()
    }
}

impl Shared {
    // Callbacks are invoked without the state lock held: an undeliverable
    // device is closed on the spot, which takes the lock again.
    fn deliver_device(&self, id: String, callbacks: HardwareCallbacks) {
        {
            let mut state = self.lock();
            state.open_devices += 1;
            state.live_callbacks = Some(callbacks.clone());
        }
        callbacks.device_opened(Box::new(SimulatedDevice {
            id,
            shared: self.clone(),
            closed: false,
        }));
    }
}

impl CameraHardware for SimulatedHardware {
    fn initialize(&self) -> Result<(), CameraError> {
        self.shared.lock().initialized = true;
        log::debug!("Simulated camera hardware initialized");
        Ok(())
    }

    fn shutdown(&self) {
        self.shared.lock().shut_down = true;
        log::debug!("Simulated camera hardware shut down");
    }

    fn devices(&self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        Ok(self.devices.clone())
    }

    fn open_device(&self, device_id: &str, callbacks: HardwareCallbacks) -> Result<(), CameraError> {
        self.shared
            .journal
            .record(HalCall::OpenDevice(device_id.to_string()));

        if !self.devices.iter().any(|d| d.id == device_id) {
            return Err(CameraError::AccessError(format!("unknown device {}", device_id)));
        }

        let behavior = self.shared.lock().open_behavior.clone();
        match behavior {
            OpenBehavior::Immediate => self.shared.deliver_device(device_id.to_string(), callbacks),
            OpenBehavior::Deferred => {
                self.shared.lock().pending_open = Some((device_id.to_string(), callbacks));
            }
            OpenBehavior::Fail(error) => callbacks.open_failed(error),
        }
        Ok(())
    }
}

struct SimulatedDevice {
    id: String,
    shared: Shared,
    closed: bool,
}

impl CameraDevice for SimulatedDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        _surface: Arc<dyn CaptureSurface>,
        callbacks: HardwareCallbacks,
    ) -> Result<(), CameraError> {
        self.shared.journal.record(HalCall::CreateSession);

        let behavior = self.shared.lock().session_behavior.clone();
        match behavior {
            SessionBehavior::Immediate => callbacks.session_configured(Box::new(SimulatedSession {
                shared: self.shared.clone(),
            })),
            SessionBehavior::Deferred => self.shared.lock().pending_session = Some(callbacks),
            SessionBehavior::Fail(error) => callbacks.session_configure_failed(error),
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.journal.record(HalCall::CloseDevice(self.id.clone()));

        let mut state = self.shared.lock();
        state.open_devices = state.open_devices.saturating_sub(1);
        state.live_callbacks = None;
        Ok(())
    }
}

struct SimulatedSession {
    shared: Shared,
}

impl SimulatedSession {
    fn check_submission(&self) -> Result<(), CameraError> {
        if self.shared.lock().fail_submissions {
            return Err(CameraError::RuntimeDeviceError(
                "request submission rejected".to_string(),
            ));
        }
        Ok(())
    }
}

impl CaptureSession for SimulatedSession {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), CameraError> {
        self.check_submission()?;
        self.shared.journal.record(HalCall::SetRepeating(request.clone()));
        Ok(())
    }

    fn capture(&mut self, request: &CaptureRequest) -> Result<(), CameraError> {
        self.check_submission()?;
        self.shared.journal.record(HalCall::Capture(request.clone()));
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<(), CameraError> {
        self.shared.journal.record(HalCall::StopRepeating);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.shared.journal.record(HalCall::CloseSession);
        if self.shared.lock().fail_session_close {
            return Err(CameraError::RuntimeDeviceError("session close failed".to_string()));
        }
        Ok(())
    }
}

/// Standalone session recording submissions, for driving a
/// [`RequestCoordinator`](crate::request::RequestCoordinator) directly.
#[derive(Debug, Default)]
pub struct RecordedSession {
    pub repeating: Vec<CaptureRequest>,
    pub captures: Vec<CaptureRequest>,
    /// "capture" / "repeating" in submission order.
    pub order: Vec<&'static str>,
    pub fail_capture: bool,
}

impl CaptureSession for RecordedSession {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), CameraError> {
        self.repeating.push(request.clone());
        self.order.push("repeating");
        Ok(())
    }

    fn capture(&mut self, request: &CaptureRequest) -> Result<(), CameraError> {
        if self.fail_capture {
            return Err(CameraError::RuntimeDeviceError("capture rejected".to_string()));
        }
        self.captures.push(request.clone());
        self.order.push("capture");
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<(), CameraError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        Ok(())
    }
}
