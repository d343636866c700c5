//! Shared value types for the capture core
//!
//! Everything in here is plain data: sizes and rectangles in preview or
//! sensor space, device descriptors, metering flags, and the derived preview
//! geometry pushed to the frame sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::BitOr;

/// Width x height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Same size with width and height swapped.
    pub fn rotated(&self) -> Self {
        Self::new(self.height, self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A point in preview space. Fractional coordinates are allowed (touch input).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Integer rectangle, `right`/`bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle covering a whole `size`, anchored at the origin.
    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// True when the rectangle encloses no pixels.
    pub fn is_degenerate(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{}]-[{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Which way the lens points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
}

impl Facing {
    pub fn opposite(&self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(Facing::Front),
            "back" | "rear" => Ok(Facing::Back),
            other => Err(format!("unknown facing: {other}")),
        }
    }
}

/// Fixed mounting rotation of the sensor relative to the device's natural orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SensorOrientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl SensorOrientation {
    /// Only multiples of 90 in `[0, 360)` are valid mounting angles.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Whether the sensor's long edge runs along the device's short edge.
    pub fn is_transposed(&self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// Output orientation of the published video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoOrientation {
    #[default]
    Portrait,
    LandscapeRight,
    LandscapeLeft,
}

impl VideoOrientation {
    pub fn degrees(&self) -> u32 {
        match self {
            Self::Portrait => 0,
            Self::LandscapeRight => 90,
            Self::LandscapeLeft => 270,
        }
    }
}

/// Zoom ratios a device accepts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomRange {
    pub min: f32,
    pub max: f32,
}

impl ZoomRange {
    /// Build the effective range from device-reported bounds.
    ///
    /// Crop-region zoom cannot widen past the active array, so the minimum is
    /// floored at 1.0 and the maximum never drops below the minimum. Missing
    /// or non-finite values collapse to 1.0.
    pub fn from_device(min: Option<f32>, max: Option<f32>) -> Self {
        let min = min.filter(|v| v.is_finite()).unwrap_or(1.0).max(1.0);
        let max = max.filter(|v| v.is_finite()).unwrap_or(1.0).max(min);
        Self { min, max }
    }

    pub fn clamp(&self, ratio: f32) -> f32 {
        if ratio.is_nan() {
            return self.min;
        }
        ratio.clamp(self.min, self.max)
    }
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self { min: 1.0, max: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AfMode {
    Off,
    Auto,
    Macro,
    ContinuousVideo,
    ContinuousPicture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AwbMode {
    Off,
    Auto,
    Incandescent,
    Fluorescent,
    Daylight,
    Cloudy,
}

/// Immutable description of one imaging device, as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub facing: Facing,
    pub sensor_orientation: SensorOrientation,
    /// Supported output sizes in sensor orientation, in device order.
    pub output_sizes: Vec<Size>,
    /// Full addressable sensor rectangle; some devices do not report it.
    pub active_array: Option<Size>,
    pub zoom_range: ZoomRange,
    pub flash_available: bool,
    pub af_modes: BTreeSet<AfMode>,
    pub awb_modes: BTreeSet<AwbMode>,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, facing: Facing) -> Self {
        Self {
            id: id.into(),
            facing,
            sensor_orientation: SensorOrientation::Deg0,
            output_sizes: Vec::new(),
            active_array: None,
            zoom_range: ZoomRange::default(),
            flash_available: false,
            af_modes: BTreeSet::new(),
            awb_modes: BTreeSet::new(),
        }
    }

    pub fn with_orientation(mut self, orientation: SensorOrientation) -> Self {
        self.sensor_orientation = orientation;
        self
    }

    pub fn with_output_sizes(mut self, sizes: Vec<Size>) -> Self {
        self.output_sizes = sizes;
        self
    }

    pub fn with_active_array(mut self, size: Size) -> Self {
        self.active_array = Some(size);
        self
    }

    pub fn with_zoom_range(mut self, range: ZoomRange) -> Self {
        self.zoom_range = range;
        self
    }

    pub fn with_flash(mut self, available: bool) -> Self {
        self.flash_available = available;
        self
    }

    pub fn with_af_modes(mut self, modes: impl IntoIterator<Item = AfMode>) -> Self {
        self.af_modes = modes.into_iter().collect();
        self
    }

    pub fn with_awb_modes(mut self, modes: impl IntoIterator<Item = AwbMode>) -> Self {
        self.awb_modes = modes.into_iter().collect();
        self
    }

    /// Region-based autofocus needs a triggerable AF mode.
    pub fn supports_af_trigger(&self) -> bool {
        self.af_modes.contains(&AfMode::Auto) || self.af_modes.contains(&AfMode::Macro)
    }

    pub fn supports_auto_white_balance(&self) -> bool {
        self.awb_modes.contains(&AwbMode::Auto)
    }
}

/// Bitmask over the 3A capabilities a focus-and-meter call asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MeteringFlags(u32);

impl MeteringFlags {
    pub const NONE: Self = Self(0);
    pub const AF: Self = Self(1);
    pub const AE: Self = Self(1 << 1);
    pub const AWB: Self = Self(1 << 2);
    pub const ALL: Self = Self(1 | (1 << 1) | (1 << 2));

    /// Unknown bits are dropped.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MeteringFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Sensor-space region with a weight, steering AF/AE/AWB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeteringRectangle {
    pub rect: Rect,
    pub weight: u32,
}

impl MeteringRectangle {
    pub const MAX_WEIGHT: u32 = 1000;

    pub fn new(rect: Rect, weight: u32) -> Self {
        Self {
            rect,
            weight: weight.min(Self::MAX_WEIGHT),
        }
    }
}

/// Inputs the downstream renderer needs to build its draw transform.
///
/// Derived value: recomputed whenever the surface size, frame size or
/// orientation changes, never persisted across a close/open cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewGeometry {
    pub surface: Size,
    pub frame: Size,
    pub sensor_orientation: SensorOrientation,
    pub front_facing: bool,
    pub video_orientation: VideoOrientation,
}

impl PreviewGeometry {
    /// Clockwise rotation to bring sensor output upright for the current
    /// video orientation. Front cameras rotate the other way because the
    /// image is mirrored.
    pub fn rotation_degrees(&self) -> u32 {
        let sensor = self.sensor_orientation.degrees();
        let video = self.video_orientation.degrees();
        if self.front_facing {
            (sensor + video) % 360
        } else {
            (sensor + 360 - video) % 360
        }
    }

    /// Frame size after rotation, i.e. what the sink should letterbox into the surface.
    pub fn oriented_frame_size(&self) -> Size {
        match self.rotation_degrees() {
            90 | 270 => self.frame.rotated(),
            _ => self.frame,
        }
    }
}

/// Lifecycle of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Opening,
    Opened,
    ConfiguringSession,
    Streaming,
    Closing,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Opening => "opening",
            SessionState::Opened => "opened",
            SessionState::ConfiguringSession => "configuring",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}
