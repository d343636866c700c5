//! Output size negotiation
//!
//! Picks a concrete stream size from a device's supported list: an exact
//! match if there is one, otherwise the size whose area is closest to the
//! requested area. Supported sizes come in sensor orientation, so a portrait
//! request against a 90/270 degree sensor is rotated before matching.

use crate::errors::CameraError;
use crate::types::{SensorOrientation, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeNegotiator {
    match_rotated: bool,
}

impl SizeNegotiator {
    pub fn new(match_rotated: bool) -> Self {
        Self { match_rotated }
    }

    /// The requested size expressed in sensor orientation.
    pub fn sensor_target(&self, requested: Size, orientation: SensorOrientation) -> Size {
        if self.match_rotated && orientation.is_transposed() {
            requested.rotated()
        } else {
            requested
        }
    }

    pub fn choose(
        &self,
        supported: &[Size],
        requested: Size,
        orientation: SensorOrientation,
    ) -> Result<Size, CameraError> {
        let target = self.sensor_target(requested, orientation);
        let chosen = choose_optimal_size(supported, target).ok_or_else(|| {
            CameraError::ConfigurationError("device reports no output sizes".to_string())
        })?;

        log::debug!(
            "Negotiated output size {} for request {} (sensor target {})",
            chosen,
            requested,
            target
        );
        Ok(chosen)
    }
}

impl Default for SizeNegotiator {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Exact match first, then minimal absolute area difference; the earliest
/// candidate wins ties.
pub fn choose_optimal_size(choices: &[Size], target: Size) -> Option<Size> {
    if let Some(exact) = choices.iter().find(|size| **size == target) {
        return Some(*exact);
    }

    let target_area = target.area();
    choices
        .iter()
        .copied()
        .min_by_key(|size| size.area().abs_diff(target_area))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone_sizes() -> Vec<Size> {
        vec![
            Size::new(640, 480),
            Size::new(1280, 720),
            Size::new(1920, 1080),
        ]
    }

    #[test]
    fn test_portrait_request_rotated_into_sensor_orientation() {
        let negotiator = SizeNegotiator::new(true);
        let chosen = negotiator
            .choose(&phone_sizes(), Size::new(720, 1280), SensorOrientation::Deg270)
            .unwrap();
        assert_eq!(chosen, Size::new(1280, 720));
    }

    #[test]
    fn test_portrait_request_matched_as_is_falls_back_to_area() {
        // No exact 720x1280 entry; 1280x720 has identical area.
        let negotiator = SizeNegotiator::new(false);
        let chosen = negotiator
            .choose(&phone_sizes(), Size::new(720, 1280), SensorOrientation::Deg270)
            .unwrap();
        assert_eq!(chosen, Size::new(1280, 720));
    }

    #[test]
    fn test_landscape_request_on_unrotated_sensor_is_exact() {
        let negotiator = SizeNegotiator::default();
        let chosen = negotiator
            .choose(&phone_sizes(), Size::new(1920, 1080), SensorOrientation::Deg0)
            .unwrap();
        assert_eq!(chosen, Size::new(1920, 1080));
    }

    #[test]
    fn test_closest_area_wins() {
        let chosen = choose_optimal_size(&phone_sizes(), Size::new(800, 600)).unwrap();
        // 480000 vs 307200 (delta 172800) and 921600 (delta 441600)
        assert_eq!(chosen, Size::new(640, 480));
    }

    #[test]
    fn test_tie_keeps_first_candidate() {
        let sizes = vec![Size::new(100, 40), Size::new(40, 100)];
        assert_eq!(
            choose_optimal_size(&sizes, Size::new(50, 80)),
            Some(Size::new(100, 40))
        );
    }

    #[test]
    fn test_empty_size_list_is_configuration_error() {
        let err = SizeNegotiator::default()
            .choose(&[], Size::new(720, 1280), SensorOrientation::Deg90)
            .unwrap_err();
        assert!(matches!(err, CameraError::ConfigurationError(_)));
    }
}
