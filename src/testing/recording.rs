//! Recording doubles for the listener, the frame sink and the capture surface

use crate::bridge::FrameSink;
use crate::control::CameraStateListener;
use crate::errors::CameraError;
use crate::platform::CaptureSurface;
use crate::types::{PreviewGeometry, SessionState, Size};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Opened,
    Closed,
    Error(CameraError),
}

#[derive(Debug, Default)]
struct Recorded {
    events: Vec<ListenerEvent>,
    states: Vec<SessionState>,
}

/// Listener that records every callback and lets tests wait for them.
#[derive(Debug, Default)]
pub struct RecordingListener {
    recorded: Mutex<Recorded>,
    changed: Condvar,
}

impl RecordingListener {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_event(&self, event: ListenerEvent) {
        self.lock().events.push(event);
        self.changed.notify_all();
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.lock().events.clone()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.lock().states.clone()
    }

    /// Wait until at least `count` events were recorded; returns what was
    /// recorded either way.
    pub fn wait_for_events(&self, count: usize, timeout: Duration) -> Vec<ListenerEvent> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while guard.events.len() < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (next, _) = self
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
        guard.events.clone()
    }

    /// Wait until the last recorded state is `state`.
    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if guard.states.last() == Some(&state) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }
}

impl CameraStateListener for RecordingListener {
    fn on_opened(&self) {
        self.record_event(ListenerEvent::Opened);
    }

    fn on_closed(&self) {
        self.record_event(ListenerEvent::Closed);
    }

    fn on_error(&self, error: &CameraError) {
        self.record_event(ListenerEvent::Error(error.clone()));
    }

    fn on_state_changed(&self, state: SessionState) {
        self.lock().states.push(state);
        self.changed.notify_all();
    }
}

/// Frame sink that keeps every geometry pushed to it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    geometries: Mutex<Vec<PreviewGeometry>>,
}

impl RecordingSink {
    pub fn geometries(&self) -> Vec<PreviewGeometry> {
        self.geometries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<PreviewGeometry> {
        self.geometries().last().copied()
    }
}

impl FrameSink for RecordingSink {
    fn on_geometry_changed(&self, geometry: &PreviewGeometry) {
        self.geometries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*geometry);
    }
}

/// Capture surface that remembers its default buffer size.
#[derive(Debug, Default)]
pub struct TestSurface {
    buffer_size: Mutex<Option<Size>>,
}

impl TestSurface {
    pub fn buffer_size(&self) -> Option<Size> {
        *self.buffer_size.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CaptureSurface for TestSurface {
    fn set_default_buffer_size(&self, size: Size) {
        *self.buffer_size.lock().unwrap_or_else(PoisonError::into_inner) = Some(size);
    }
}
