//! The dedicated camera worker thread
//!
//! Every lifecycle transition and every request mutation runs here, one
//! message at a time, in arrival order. Caller commands and hardware
//! callbacks share a single queue so they can never interleave.

use crate::errors::CameraError;
use crate::platform::{CameraDevice, CaptureSession};
use crate::request::FocusRequest;
use crate::session::SessionStateMachine;
use crate::types::{Facing, Size, VideoOrientation};
use crossbeam_channel::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Caller intents, queued from any thread.
#[derive(Debug)]
pub enum Command {
    Open { facing: Facing, size: Size },
    Close,
    SetZoom(f32),
    SetTorch(bool),
    FocusAndMeter(FocusRequest),
    FocusAndMeterCenter,
    SetVideoOrientation(VideoOrientation),
    /// Replies once everything queued before it has been handled.
    Flush(Sender<()>),
}

/// Asynchronous results from the hardware layer.
pub enum HardwareEvent {
    DeviceOpened(Box<dyn CameraDevice>),
    OpenFailed(CameraError),
    Disconnected,
    DeviceError(CameraError),
    SessionConfigured(Box<dyn CaptureSession>),
    SessionConfigureFailed(CameraError),
}

impl HardwareEvent {
    /// Release whatever hardware resource the event carries.
    pub(crate) fn roll_back(self) {
        match self {
            HardwareEvent::DeviceOpened(mut device) => {
                log::warn!("Closing device {} opened after its request was abandoned", device.id());
                if let Err(e) = device.close() {
                    log::error!("Failed to close abandoned device: {}", e);
                }
            }
            HardwareEvent::SessionConfigured(mut session) => {
                log::warn!("Closing capture session configured after its request was abandoned");
                if let Err(e) = session.close() {
                    log::error!("Failed to close abandoned session: {}", e);
                }
            }
            _ => {}
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HardwareEvent::DeviceOpened(_) => "device_opened",
            HardwareEvent::OpenFailed(_) => "open_failed",
            HardwareEvent::Disconnected => "disconnected",
            HardwareEvent::DeviceError(_) => "device_error",
            HardwareEvent::SessionConfigured(_) => "session_configured",
            HardwareEvent::SessionConfigureFailed(_) => "session_configure_failed",
        }
    }
}

impl std::fmt::Debug for HardwareEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub enum WorkerMessage {
    Command(Command),
    Hardware { generation: u64, event: HardwareEvent },
    Shutdown,
}

/// Owner of the worker thread and the sending half of its queue.
pub struct CameraWorker {
    sender: Sender<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl CameraWorker {
    /// Spawn the worker thread; `build` constructs the state machine with a
    /// sender into the worker's own queue.
    pub fn spawn<F>(thread_name: &str, join_timeout: Duration, build: F) -> Result<Self, CameraError>
    where
        F: FnOnce(Sender<WorkerMessage>) -> SessionStateMachine,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let machine = build(sender.clone());

        let handle = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run(machine, receiver))
            .map_err(|e| CameraError::InitializationError(format!("worker spawn failed: {e}")))?;

        log::debug!("Spawned camera worker '{}'", thread_name);
        Ok(Self {
            sender,
            handle: Some(handle),
            join_timeout,
        })
    }

    /// Queue a command. Returns false if the worker has already exited.
    pub fn submit(&self, command: Command) -> bool {
        self.sender.send(WorkerMessage::Command(command)).is_ok()
    }

    /// Block until every command queued so far has been handled.
    pub fn flush(&self, timeout: Duration) -> bool {
        flush_queue(&self.sender, timeout)
    }

    /// A sending handle into the worker queue, usable without holding on to the worker.
    pub(crate) fn queue(&self) -> Sender<WorkerMessage> {
        self.sender.clone()
    }

    /// True when called from the worker itself, i.e. from inside a listener callback.
    pub(crate) fn on_worker_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    /// Close any open device, stop the worker and join it.
    ///
    /// From the worker thread itself the join is skipped; the queued close
    /// and shutdown run once the current callback returns.
    pub fn shutdown(mut self) -> Result<(), CameraError> {
        let _ = self.sender.send(WorkerMessage::Command(Command::Close));
        let _ = self.sender.send(WorkerMessage::Shutdown);

        // Reached when the facade is dropped inside a listener callback.
        if self.on_worker_thread() {
            log::debug!("Camera worker shutdown requested from the worker thread; not joining");
            self.handle.take();
            return Ok(());
        }

        let mut handle = self.handle.take();
        let start = Instant::now();
        loop {
            let finished = handle.as_ref().map_or(true, |h| h.is_finished());
            if finished {
                if let Some(h) = handle.take() {
                    if h.join().is_err() {
                        return Err(CameraError::RuntimeDeviceError(
                            "camera worker panicked".to_string(),
                        ));
                    }
                }
                log::debug!("Camera worker joined");
                return Ok(());
            }

            if start.elapsed() >= self.join_timeout {
                log::warn!(
                    "Camera worker did not stop within {:?}; detaching",
                    self.join_timeout
                );
                return Err(CameraError::RuntimeDeviceError(
                    "camera worker join timed out".to_string(),
                ));
            }

            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for CameraWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.sender.send(WorkerMessage::Command(Command::Close));
            let _ = self.sender.send(WorkerMessage::Shutdown);
        }
    }
}

/// Queue a barrier on `sender` and wait for the worker to reach it.
pub(crate) fn flush_queue(sender: &Sender<WorkerMessage>, timeout: Duration) -> bool {
    let (reply, done) = crossbeam_channel::bounded(1);
    if sender.send(WorkerMessage::Command(Command::Flush(reply))).is_err() {
        return false;
    }
    done.recv_timeout(timeout).is_ok()
}

fn run(mut machine: SessionStateMachine, receiver: Receiver<WorkerMessage>) {
    while let Ok(message) = receiver.recv() {
        if matches!(message, WorkerMessage::Shutdown) {
            break;
        }
        machine.handle(message);
    }

    // Nothing may reach the hardware after teardown begins. Anything still
    // queued is drained, and late results are released.
    for message in receiver.try_iter() {
        machine.drain(message);
    }
    log::debug!("Camera worker exiting");
}
