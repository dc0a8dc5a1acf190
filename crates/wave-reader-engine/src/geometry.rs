//! Pointer-to-transform mapping.

use serde::{Deserialize, Serialize};
use wave_reader_core::{Point, Rect};

/// Transform parameters for one element.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveParams {
    /// Rotation in degrees, in `(-180, 180]`.
    pub rotation_deg: f64,
    /// Translation in percent of the element's size.
    pub translate_pct: f64,
}

impl WaveParams {
    /// Whether either parameter moved by at least `epsilon`.
    #[must_use]
    pub fn differs_from(&self, other: &Self, epsilon: f64) -> bool {
        angle_delta(self.rotation_deg, other.rotation_deg) >= epsilon
            || (self.translate_pct - other.translate_pct).abs() >= epsilon
    }
}

/// Shortest angular distance between two angles in degrees.
#[must_use]
pub fn angle_delta(a: f64, b: f64) -> f64 {
    ((a - b + 180.0).rem_euclid(360.0) - 180.0).abs()
}

/// Fold an angle into `(-180, 180]`.
#[must_use]
pub fn normalize_degrees(angle: f64) -> f64 {
    let folded = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if folded <= -180.0 { folded + 360.0 } else { folded }
}

/// Map the pointer's polar offset from the element's center to transform
/// parameters.
///
/// The angle is rotated by +90° so that a pointer straight above the
/// element reads as zero rotation. The radius is normalized by half the
/// element's larger side and capped at `max_translate_pct`.
///
/// Returns `None` for a degenerate rectangle.
#[must_use]
pub fn compute_params(pointer: Point, rect: &Rect, max_translate_pct: f64) -> Option<WaveParams> {
    if rect.is_degenerate() || !pointer.is_finite() {
        return None;
    }
    let center = rect.center();
    let dx = pointer.x - center.x;
    let dy = pointer.y - center.y;

    let radius = dx.hypot(dy);
    let theta = dy.atan2(dx).to_degrees() + 90.0;

    let half_size = rect.width.max(rect.height) / 2.0;
    let reach = (radius / half_size).min(1.0);

    Some(WaveParams {
        rotation_deg: normalize_degrees(theta),
        translate_pct: reach * max_translate_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECT: Rect = Rect::new(100.0, 100.0, 200.0, 100.0);

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_pointer_above_center_is_zero_rotation() {
        let params = compute_params(Point::new(200.0, 100.0), &RECT, 10.0).unwrap();
        assert!(approx(params.rotation_deg, 0.0));
        // 50px away, half size 100px.
        assert!(approx(params.translate_pct, 5.0));
    }

    #[test]
    fn test_pointer_right_of_center_is_quarter_turn() {
        let params = compute_params(Point::new(250.0, 150.0), &RECT, 10.0).unwrap();
        assert!(approx(params.rotation_deg, 90.0));
    }

    #[test]
    fn test_translation_is_capped() {
        let params = compute_params(Point::new(2000.0, 2000.0), &RECT, 10.0).unwrap();
        assert!(approx(params.translate_pct, 10.0));
    }

    #[test]
    fn test_degenerate_rect_skipped() {
        let flat = Rect::new(0.0, 0.0, 50.0, 0.0);
        assert!(compute_params(Point::default(), &flat, 10.0).is_none());
    }

    #[test]
    fn test_normalize_and_delta() {
        assert!(approx(normalize_degrees(270.0), -90.0));
        assert!(approx(normalize_degrees(-180.0), 180.0));
        assert!(approx(angle_delta(179.95, -179.95), 0.1));
    }

    #[test]
    fn test_epsilon_filter() {
        let a = WaveParams { rotation_deg: 10.0, translate_pct: 5.0 };
        let b = WaveParams { rotation_deg: 10.05, translate_pct: 5.05 };
        let c = WaveParams { rotation_deg: 10.2, translate_pct: 5.0 };
        assert!(!a.differs_from(&b, 0.1));
        assert!(a.differs_from(&c, 0.1));
    }
}
