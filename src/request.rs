//! Repeating request state and its coordinator
//!
//! # Spell: RepeatingRequest
//! ^ Intent: keep one owned capture request, mutate it, resubmit it whole
//!
//! @RequestCoordinator
//!   : (DeviceDescriptor) -> RequestCoordinator
//!   ! read_modify_resubmit
//!   ! lazily_applied_without_session
//!   ! one_shot_capture_before_trigger_reset
//!   ! repeating_request_carries_idle_triggers
//!   - unsupported_capability_raised_as_fault

use crate::assert_invariant;
use crate::errors::CameraError;
use crate::geometry::{zoom_crop, GeometryMapper};
use crate::invariant_ppt::REPEATING_TRIGGERS_IDLE;
use crate::platform::CaptureSession;
use crate::types::{
    AfMode, AwbMode, DeviceDescriptor, MeteringFlags, MeteringRectangle, Point, Rect, Size,
    ZoomRange,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AeMode {
    Off,
    On,
    OnAutoFlash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlashMode {
    Off,
    Torch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    Idle,
    Start,
}

/// The descriptor submitted repeatedly to the hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureRequest {
    /// Sensor-space zoom crop; `None` means the full active array.
    pub crop_region: Option<Rect>,
    pub flash_mode: FlashMode,
    pub af_mode: AfMode,
    pub ae_mode: AeMode,
    pub awb_mode: AwbMode,
    pub af_regions: Vec<MeteringRectangle>,
    pub ae_regions: Vec<MeteringRectangle>,
    pub awb_regions: Vec<MeteringRectangle>,
    pub af_trigger: Trigger,
    pub ae_precapture_trigger: Trigger,
}

impl CaptureRequest {
    /// Initial preview request: continuous-picture AF, auto-flash AE, no zoom, torch off.
    pub fn preview() -> Self {
        Self {
            crop_region: None,
            flash_mode: FlashMode::Off,
            af_mode: AfMode::ContinuousPicture,
            ae_mode: AeMode::OnAutoFlash,
            awb_mode: AwbMode::Auto,
            af_regions: Vec::new(),
            ae_regions: Vec::new(),
            awb_regions: Vec::new(),
            af_trigger: Trigger::Idle,
            ae_precapture_trigger: Trigger::Idle,
        }
    }

    pub fn torch_enabled(&self) -> bool {
        self.flash_mode == FlashMode::Torch
    }

    pub fn triggers_idle(&self) -> bool {
        self.af_trigger == Trigger::Idle && self.ae_precapture_trigger == Trigger::Idle
    }

    fn reset_triggers(&mut self) {
        self.af_trigger = Trigger::Idle;
        self.ae_precapture_trigger = Trigger::Idle;
    }
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self::preview()
    }
}

/// What a mutation did with the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// State changed and the request was resubmitted.
    Submitted,
    /// State changed; applied on the next submission since nothing is streaming.
    Deferred,
    /// Nothing changed (unsupported capability or degenerate region).
    Skipped,
}

/// A focus-and-meter request in preview coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusRequest {
    pub center: Point,
    pub width: f32,
    pub height: f32,
    pub flags: MeteringFlags,
}

impl FocusRequest {
    pub fn new(x: f32, y: f32, width: f32, height: f32, flags: MeteringFlags) -> Self {
        Self {
            center: Point::new(x, y),
            width,
            height,
            flags,
        }
    }

    /// Center of `preview`, region `fraction` of each preview dimension, all capabilities.
    pub fn center(preview: Size, fraction: f32) -> Self {
        Self::new(
            preview.width as f32 / 2.0,
            preview.height as f32 / 2.0,
            preview.width as f32 * fraction,
            preview.height as f32 * fraction,
            MeteringFlags::ALL,
        )
    }
}

/// Owns the [`CaptureRequest`] for one session and applies mutations to it.
#[derive(Debug)]
pub struct RequestCoordinator {
    device: DeviceDescriptor,
    zoom_range: ZoomRange,
    zoom_ratio: f32,
    metering_weight: u32,
    request: CaptureRequest,
}

impl RequestCoordinator {
    pub fn new(device: DeviceDescriptor) -> Self {
        let zoom_range =
            ZoomRange::from_device(Some(device.zoom_range.min), Some(device.zoom_range.max));
        Self {
            device,
            zoom_ratio: zoom_range.min,
            zoom_range,
            metering_weight: MeteringRectangle::MAX_WEIGHT,
            request: CaptureRequest::preview(),
        }
    }

    pub fn with_metering_weight(mut self, weight: u32) -> Self {
        self.metering_weight = weight.min(MeteringRectangle::MAX_WEIGHT);
        self
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn zoom_ratio(&self) -> f32 {
        self.zoom_ratio
    }

    pub fn zoom_range(&self) -> ZoomRange {
        self.zoom_range
    }

    /// Submit the current request as the repeating request.
    pub fn start_repeating(&mut self, session: &mut dyn CaptureSession) -> Result<(), CameraError> {
        self.submit_repeating(session)
    }

    pub fn set_zoom(
        &mut self,
        ratio: f32,
        session: Option<&mut dyn CaptureSession>,
    ) -> Result<Submission, CameraError> {
        let Some(active_array) = self.device.active_array else {
            log::warn!(
                "Device {} reports no active array size; ignoring zoom",
                self.device.id
            );
            return Ok(Submission::Skipped);
        };

        let clamped = self.zoom_range.clamp(ratio);
        if clamped != ratio {
            log::debug!(
                "Zoom ratio {} clamped to {} (range {}..={})",
                ratio,
                clamped,
                self.zoom_range.min,
                self.zoom_range.max
            );
        }

        self.zoom_ratio = clamped;
        self.request.crop_region = Some(zoom_crop(active_array, clamped));
        self.resubmit(session)
    }

    pub fn set_torch(
        &mut self,
        enabled: bool,
        session: Option<&mut dyn CaptureSession>,
    ) -> Result<Submission, CameraError> {
        if !self.device.flash_available {
            self.unsupported("torch", "no flash unit");
            return Ok(Submission::Skipped);
        }

        log::debug!("Torch {}", if enabled { "on" } else { "off" });
        self.request.flash_mode = if enabled {
            FlashMode::Torch
        } else {
            FlashMode::Off
        };
        self.resubmit(session)
    }

    /// Steer AF/AE/AWB to a preview-space region.
    ///
    /// With a streaming session this issues one capture with the triggers
    /// started, then resets the triggers and resubmits the repeating request.
    pub fn focus_and_meter(
        &mut self,
        focus: FocusRequest,
        preview: Size,
        session: Option<&mut dyn CaptureSession>,
    ) -> Result<Submission, CameraError> {
        let Some(active_array) = self.device.active_array else {
            log::warn!(
                "Device {} reports no active array size; ignoring focus and metering",
                self.device.id
            );
            return Ok(Submission::Skipped);
        };
        let Some(mapper) = GeometryMapper::new(preview, active_array) else {
            log::warn!("No preview size known; ignoring focus and metering");
            return Ok(Submission::Skipped);
        };
        let Some(rect) = mapper.focus_region(focus.center, focus.width, focus.height) else {
            log::debug!(
                "Focus region at ({}, {}) size {}x{} is degenerate in sensor space",
                focus.center.x,
                focus.center.y,
                focus.width,
                focus.height
            );
            return Ok(Submission::Skipped);
        };

        let region = MeteringRectangle::new(rect, self.metering_weight);
        let mut applied = false;

        if focus.flags.contains(MeteringFlags::AF) {
            if self.device.supports_af_trigger() {
                self.request.af_mode = AfMode::Auto;
                self.request.af_regions = vec![region];
                self.request.af_trigger = Trigger::Start;
                applied = true;
            } else {
                self.unsupported("autofocus regions", "no triggerable AF mode");
            }
        }

        if focus.flags.contains(MeteringFlags::AE) {
            self.request.ae_regions = vec![region];
            self.request.ae_precapture_trigger = Trigger::Start;
            applied = true;
        }

        if focus.flags.contains(MeteringFlags::AWB) {
            if self.device.supports_auto_white_balance() {
                self.request.awb_mode = AwbMode::Auto;
                self.request.awb_regions = vec![region];
                applied = true;
            } else {
                self.unsupported("white balance regions", "no auto white balance");
            }
        }

        if !applied {
            self.request.reset_triggers();
            return Ok(Submission::Skipped);
        }

        log::debug!("Focus and metering region {}", rect);

        match session {
            Some(session) => {
                let shot = session.capture(&self.request);
                self.request.reset_triggers();
                shot?;
                self.submit_repeating(session)?;
                Ok(Submission::Submitted)
            }
            None => {
                self.request.reset_triggers();
                Ok(Submission::Deferred)
            }
        }
    }

    fn resubmit(&mut self, session: Option<&mut dyn CaptureSession>) -> Result<Submission, CameraError> {
        match session {
            Some(session) => {
                self.submit_repeating(session)?;
                Ok(Submission::Submitted)
            }
            None => Ok(Submission::Deferred),
        }
    }

    fn unsupported(&self, what: &str, reason: &str) {
        let err = CameraError::UnsupportedCapability(format!("{} on {}: {}", what, self.device.id, reason));
        log::warn!("Ignoring {}", err);
    }

    fn submit_repeating(&mut self, session: &mut dyn CaptureSession) -> Result<(), CameraError> {
        assert_invariant!(
            self.request.triggers_idle(),
            REPEATING_TRIGGERS_IDLE,
            "request::submit_repeating"
        );
        session.set_repeating_request(&self.request)
    }
}
