//! Synthetic device descriptors
//!
//! Shaped after a typical phone camera pair: a 12MP back module mounted at
//! 90 degrees with flash and 4x crop zoom, and a fixed-focus front module
//! mounted at 270 degrees.

use crate::types::{
    AfMode, AwbMode, DeviceDescriptor, Facing, SensorOrientation, Size, ZoomRange,
};

/// Stream sizes in sensor (landscape) orientation, in device order.
pub fn phone_output_sizes() -> Vec<Size> {
    vec![
        Size::new(640, 480),
        Size::new(1280, 720),
        Size::new(1920, 1080),
    ]
}

/// Back camera: 4000x3000 active array, zoom 1x-4x, flash, full AF and AWB.
pub fn synthetic_back_camera() -> DeviceDescriptor {
    DeviceDescriptor::new("back-0", Facing::Back)
        .with_orientation(SensorOrientation::Deg90)
        .with_output_sizes(phone_output_sizes())
        .with_active_array(Size::new(4000, 3000))
        .with_zoom_range(ZoomRange::from_device(Some(1.0), Some(4.0)))
        .with_flash(true)
        .with_af_modes([
            AfMode::Off,
            AfMode::Auto,
            AfMode::Macro,
            AfMode::ContinuousVideo,
            AfMode::ContinuousPicture,
        ])
        .with_awb_modes([AwbMode::Off, AwbMode::Auto, AwbMode::Daylight, AwbMode::Cloudy])
}

/// Front camera: 3264x2448 active array, no zoom, no flash, fixed focus.
pub fn synthetic_front_camera() -> DeviceDescriptor {
    DeviceDescriptor::new("front-1", Facing::Front)
        .with_orientation(SensorOrientation::Deg270)
        .with_output_sizes(phone_output_sizes())
        .with_active_array(Size::new(3264, 2448))
        .with_af_modes([AfMode::Off])
        .with_awb_modes([AwbMode::Auto])
}
