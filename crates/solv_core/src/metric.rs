use nalgebra::{Vector3, Vector4};

use crate::geometry::Geometry;
use crate::remap::compress;

/// Distance between a target and a forward-mapped candidate, measured in
/// flattened space so that a fixed tolerance means the same grid precision
/// everywhere.
pub fn solution_error(geometry: Geometry, target: &Vector3<f64>, candidate: &Vector4<f64>) -> f64 {
    (compress(geometry, target) - compress(geometry, &candidate.xyz())).norm()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_points_have_zero_error() {
        let target = Vector3::new(0.4, -1.2, 0.3);
        let candidate = Vector4::new(0.4, -1.2, 0.3, 1.0);
        assert_eq!(solution_error(Geometry::Sol, &target, &candidate), 0.0);
    }

    #[test]
    fn far_points_compress_to_small_error() {
        let target = Vector3::new(20.0, 0.0, 0.0);
        let candidate = Vector4::new(25.0, 0.0, 0.0, 1.0);
        assert!(solution_error(Geometry::Sol, &target, &candidate) < 1e-12);

        let near = Vector3::new(0.0, 0.0, 0.0);
        let shifted = Vector4::new(0.1, 0.0, 0.0, 1.0);
        assert!((solution_error(Geometry::Sol, &near, &shifted) - 0.1f64.tanh()).abs() < 1e-15);
    }

    #[test]
    fn error_is_bounded() {
        let target = Vector3::new(-1e6, -1e6, -1e6);
        let candidate = Vector4::new(1e6, 1e6, 1e6, 1.0);
        for geometry in Geometry::ALL {
            assert!(solution_error(geometry, &target, &candidate) <= 2.0 * 3f64.sqrt());
        }
    }

    #[test]
    fn nih_vertical_error_is_scaled() {
        let target = Vector3::zeros();
        let candidate = Vector4::new(0.0, 0.0, 0.4, 1.0);
        let expected = (0.1f64).tanh() / 2.0;
        assert!((solution_error(Geometry::Nih, &target, &candidate) - expected).abs() < 1e-15);
    }
}
