//! Planar geometry helpers for joint angles.
//!
//! All helpers work in image space (`y` grows downwards) and return `None`
//! for degenerate or non-finite input instead of inventing a value.

/// Minimum vector length considered non-degenerate.
const MIN_SEGMENT: f32 = 1e-4;

/// Angle at `vertex` between the rays towards `a` and `c`, in degrees.
///
/// Uses the dot-product formula `cos(θ) = (v1 · v2) / (|v1| × |v2|)` with the
/// cosine clamped to [-1, 1] before `acos`. The result is in [0°, 180°].
/// Returns `None` when either ray has zero length or a coordinate is not
/// finite.
pub fn three_point_angle(a: (f32, f32), vertex: (f32, f32), c: (f32, f32)) -> Option<f32> {
    let v1 = (a.0 - vertex.0, a.1 - vertex.1);
    let v2 = (c.0 - vertex.0, c.1 - vertex.1);

    let mag1 = segment_length(v1)?;
    let mag2 = segment_length(v2)?;

    let cos_angle = ((v1.0 * v2.0 + v1.1 * v2.1) / (mag1 * mag2)).clamp(-1.0, 1.0);
    finite(cos_angle.acos().to_degrees())
}

/// Signed deviation from the image vertical of the segment `top → bottom`,
/// computed as `atan2(dx, dy)` in degrees.
///
/// Zero means `bottom` sits straight below `top`; positive values lean
/// towards +x. Returns `None` for a zero-length or non-finite segment.
pub fn vertical_deviation(top: (f32, f32), bottom: (f32, f32)) -> Option<f32> {
    let dx = bottom.0 - top.0;
    let dy = bottom.1 - top.1;
    segment_length((dx, dy))?;
    finite(dx.atan2(dy).to_degrees())
}

/// Length of `v`, or `None` if it is degenerate or not finite.
fn segment_length(v: (f32, f32)) -> Option<f32> {
    let len = (v.0 * v.0 + v.1 * v.1).sqrt();
    // NaN fails both comparisons, so check finiteness explicitly.
    (len.is_finite() && len >= MIN_SEGMENT).then_some(len)
}

fn finite(value: f32) -> Option<f32> {
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_straight_limb() {
        let angle = three_point_angle((0.0, 0.0), (0.5, 0.0), (1.0, 0.0)).unwrap();
        assert_abs_diff_eq!(angle, 180.0, epsilon = 0.01);
    }

    #[test]
    fn test_right_angle() {
        let angle = three_point_angle((0.0, 0.0), (0.5, 0.0), (0.5, 0.5)).unwrap();
        assert_abs_diff_eq!(angle, 90.0, epsilon = 0.01);
    }

    #[test]
    fn test_degenerate_segment_is_undefined() {
        assert!(three_point_angle((0.5, 0.5), (0.5, 0.5), (1.0, 1.0)).is_none());
        assert!(vertical_deviation((0.2, 0.2), (0.2, 0.2)).is_none());
    }

    #[test]
    fn test_non_finite_input_is_undefined() {
        assert!(three_point_angle((f32::NAN, 0.0), (0.5, 0.0), (1.0, 0.0)).is_none());
        assert!(three_point_angle((0.0, 0.0), (0.5, 0.0), (f32::INFINITY, 0.5)).is_none());
        assert!(vertical_deviation((0.5, f32::NAN), (0.5, 1.0)).is_none());
        assert!(vertical_deviation((0.5, 0.0), (f32::NEG_INFINITY, 1.0)).is_none());
    }

    #[test]
    fn test_vertical_deviation_sign() {
        assert_abs_diff_eq!(vertical_deviation((0.5, 0.0), (0.5, 1.0)).unwrap(), 0.0);
        let lean = vertical_deviation((0.5, 0.0), (0.5 + 9f32.to_radians().tan(), 1.0)).unwrap();
        assert_abs_diff_eq!(lean, 9.0, epsilon = 0.01);
        let sag = vertical_deviation((0.5, 0.0), (0.5 - 9f32.to_radians().tan(), 1.0)).unwrap();
        assert_abs_diff_eq!(sag, -9.0, epsilon = 0.01);
    }
}
