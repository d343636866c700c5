//! Frame pipeline bridge
//!
//! Reconciles two independent event streams, render-surface resizes and
//! camera frame-size reports, into one [`PreviewGeometry`] for the frame
//! sink. Either side may arrive first; until both are known nothing is pushed
//! and draws are deferred.

use crate::geometry::preview_geometry;
use crate::platform::CaptureSurface;
use crate::types::{Facing, PreviewGeometry, SensorOrientation, Size, VideoOrientation};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Downstream consumer of rendered frames, outside this crate.
pub trait FrameSink: Send + Sync {
    /// Rebuild the draw transform before the next frame. Must not call back
    /// into the bridge.
    fn on_geometry_changed(&self, geometry: &PreviewGeometry);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameInfo {
    size: Size,
    sensor_orientation: SensorOrientation,
    facing: Facing,
}

#[derive(Debug, Default)]
struct BridgeState {
    surface_size: Option<Size>,
    frame: Option<FrameInfo>,
    video_orientation: VideoOrientation,
    frame_pending: bool,
    last_pushed: Option<PreviewGeometry>,
}

impl BridgeState {
    fn geometry(&self) -> Option<PreviewGeometry> {
        let surface = self.surface_size?;
        let frame = self.frame?;
        Some(preview_geometry(
            surface,
            frame.size,
            frame.sensor_orientation,
            frame.facing,
            self.video_orientation,
        ))
    }
}

pub struct FramePipelineBridge {
    surface: Arc<dyn CaptureSurface>,
    sink: Arc<dyn FrameSink>,
    state: Mutex<BridgeState>,
}

impl FramePipelineBridge {
    pub fn new(surface: Arc<dyn CaptureSurface>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            surface,
            sink,
            state: Mutex::new(BridgeState::default()),
        }
    }

    /// The capture surface sessions are bound to.
    pub fn surface(&self) -> Arc<dyn CaptureSurface> {
        Arc::clone(&self.surface)
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render surface created or resized. An empty size means the surface is gone.
    pub fn on_surface_changed(&self, size: Size) {
        let mut state = self.lock();
        state.surface_size = if size.is_empty() { None } else { Some(size) };
        log::debug!("Render surface now {}", size);
        self.push(&mut state);
    }

    /// Camera reported the size of frames it will produce.
    pub fn on_camera_frame_size(
        &self,
        size: Size,
        sensor_orientation: SensorOrientation,
        facing: Facing,
    ) {
        let mut state = self.lock();
        state.frame = Some(FrameInfo {
            size,
            sensor_orientation,
            facing,
        });
        log::debug!(
            "Camera frames now {} ({} facing, sensor at {} degrees)",
            size,
            facing,
            sensor_orientation.degrees()
        );
        self.push(&mut state);
    }

    /// Geometry does not survive a close/open cycle.
    pub fn on_camera_closed(&self) {
        let mut state = self.lock();
        state.frame = None;
        state.frame_pending = false;
        state.last_pushed = None;
    }

    pub fn set_video_orientation(&self, orientation: VideoOrientation) {
        let mut state = self.lock();
        state.video_orientation = orientation;
        self.push(&mut state);
    }

    pub fn video_orientation(&self) -> VideoOrientation {
        self.lock().video_orientation
    }

    pub fn surface_size(&self) -> Option<Size> {
        self.lock().surface_size
    }

    pub fn geometry(&self) -> Option<PreviewGeometry> {
        self.lock().geometry()
    }

    /// A new camera frame landed on the surface.
    pub fn on_frame_available(&self) {
        self.lock().frame_pending = true;
    }

    /// Geometry to draw the pending frame with, consuming the pending flag.
    ///
    /// Returns `None` if no frame is pending or the geometry is still
    /// incomplete; in the latter case the frame stays pending.
    pub fn take_draw(&self) -> Option<PreviewGeometry> {
        let mut state = self.lock();
        if !state.frame_pending {
            return None;
        }
        let geometry = state.geometry()?;
        state.frame_pending = false;
        Some(geometry)
    }

    // Pushed under the lock so sinks observe geometries in event order.
    fn push(&self, state: &mut BridgeState) {
        let Some(geometry) = state.geometry() else {
            return;
        };
        if state.last_pushed == Some(geometry) {
            return;
        }
        state.last_pushed = Some(geometry);
        self.sink.on_geometry_changed(&geometry);
    }
}

impl std::fmt::Debug for FramePipelineBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipelineBridge")
            .field("state", &*self.lock())
            .finish()
    }
}
