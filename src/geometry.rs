//! Preview-space to sensor-space coordinate mapping
//!
//! Pure functions only. Each axis scales independently:
//! `sensor = preview * sensor_dimension / preview_dimension`, truncated
//! toward zero when an integer coordinate is needed.

use crate::assert_invariant;
use crate::invariant_ppt::{ZOOM_CROP_CENTERED, ZOOM_CROP_CONTAINED};
use crate::types::{
    Facing, Point, PreviewGeometry, Rect, SensorOrientation, Size, VideoOrientation,
};

/// Stateless mapper between preview coordinates and the sensor active array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryMapper {
    preview: Size,
    active_array: Size,
}

impl GeometryMapper {
    /// Returns `None` when either size is empty, since no scale can be derived.
    pub fn new(preview: Size, active_array: Size) -> Option<Self> {
        if preview.is_empty() || active_array.is_empty() {
            return None;
        }
        Some(Self {
            preview,
            active_array,
        })
    }

    pub fn preview(&self) -> Size {
        self.preview
    }

    pub fn active_array(&self) -> Size {
        self.active_array
    }

    fn scale_x(&self, value: f64) -> f64 {
        value * self.active_array.width as f64 / self.preview.width as f64
    }

    fn scale_y(&self, value: f64) -> f64 {
        value * self.active_array.height as f64 / self.preview.height as f64
    }

    /// Map a preview point to integer sensor coordinates.
    pub fn to_sensor_point(&self, point: Point) -> (i32, i32) {
        (
            self.scale_x(point.x as f64) as i32,
            self.scale_y(point.y as f64) as i32,
        )
    }

    /// Inverse of [`to_sensor_point`](Self::to_sensor_point), without truncation.
    pub fn to_preview_point(&self, x: i32, y: i32) -> Point {
        Point::new(
            (x as f64 * self.preview.width as f64 / self.active_array.width as f64) as f32,
            (y as f64 * self.preview.height as f64 / self.active_array.height as f64) as f32,
        )
    }

    /// Sensor rectangle centered on a preview point, clamped to the active array.
    ///
    /// Returns `None` if the clamped rectangle is degenerate, e.g. a zero-sized
    /// region or a point far outside the preview.
    pub fn focus_region(&self, center: Point, width: f32, height: f32) -> Option<Rect> {
        let (cx, cy) = self.to_sensor_point(center);
        let half_w = self.scale_x(width as f64) as i32 / 2;
        let half_h = self.scale_y(height as f64) as i32 / 2;

        let rect = Rect::new(
            cx.saturating_sub(half_w).max(0),
            cy.saturating_sub(half_h).max(0),
            cx.saturating_add(half_w).min(self.active_array.width as i32),
            cy.saturating_add(half_h).min(self.active_array.height as i32),
        );

        if rect.is_degenerate() {
            None
        } else {
            Some(rect)
        }
    }
}

/// Centered crop of `active_array` for a zoom `ratio`.
///
/// Ratios below 1.0 are treated as 1.0 since a crop cannot exceed the array.
/// The crop never collapses below one pixel per axis.
pub fn zoom_crop(active_array: Size, ratio: f32) -> Rect {
    let ratio = if ratio.is_finite() { ratio.max(1.0) } else { 1.0 };
    let array_w = active_array.width as i32;
    let array_h = active_array.height as i32;

    let crop_w = ((array_w as f32 / ratio) as i32).clamp(1.min(array_w), array_w);
    let crop_h = ((array_h as f32 / ratio) as i32).clamp(1.min(array_h), array_h);
    let crop_x = (array_w - crop_w) / 2;
    let crop_y = (array_h - crop_h) / 2;

    let crop = Rect::new(crop_x, crop_y, crop_x + crop_w, crop_y + crop_h);

    assert_invariant!(
        Rect::from_size(active_array).contains_rect(&crop),
        ZOOM_CROP_CONTAINED,
        "geometry::zoom_crop"
    );
    assert_invariant!(
        (crop.left - (array_w - crop.right)).abs() <= 1
            && (crop.top - (array_h - crop.bottom)).abs() <= 1,
        ZOOM_CROP_CENTERED,
        "geometry::zoom_crop"
    );

    crop
}

/// Assemble the renderer's transform inputs. Deterministic for identical inputs.
pub fn preview_geometry(
    surface: Size,
    frame: Size,
    sensor_orientation: SensorOrientation,
    facing: Facing,
    video_orientation: VideoOrientation,
) -> PreviewGeometry {
    PreviewGeometry {
        surface,
        frame,
        sensor_orientation,
        front_facing: facing == Facing::Front,
        video_orientation,
    }
}
