//! Reference forward exponential map by geodesic integration.

use nalgebra::{Vector3, Vector4};

use crate::geometry::Geometry;
use crate::solvers::RK4;
use crate::traits::{DynamicalSystem, ExpMap, TangentPoint};

/// Geodesic equation as a first-order system on `(position, velocity)`.
#[derive(Debug, Clone, Copy)]
pub struct GeodesicFlow {
    pub geometry: Geometry,
}

impl DynamicalSystem<f64> for GeodesicFlow {
    fn dimension(&self) -> usize {
        6
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let velocity = Vector3::new(x[3], x[4], x[5]);
        let acc = self.geometry.geodesic_acceleration(x[2], &velocity);
        out[..3].copy_from_slice(&x[3..6]);
        out[3] = acc.x;
        out[4] = acc.y;
        out[5] = acc.z;
    }
}

/// Integrates the geodesic leaving the origin with the given initial velocity
/// for unit time, in `precision` RK4 steps.
#[derive(Debug, Clone, Copy)]
pub struct NumericalExp {
    pub geometry: Geometry,
}

impl NumericalExp {
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry }
    }
}

impl ExpMap for NumericalExp {
    fn exp(&self, v: &TangentPoint, precision: usize) -> Vector4<f64> {
        let flow = GeodesicFlow {
            geometry: self.geometry,
        };
        let mut state = [0.0, 0.0, 0.0, v.x, v.y, v.z];
        let mut rk4 = RK4::new(flow.dimension());
        rk4.integrate(&flow, 0.0, &mut state, 1.0, precision.max(1));
        Vector4::new(state[0], state[1], state[2], 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::tangent_point;

    #[test]
    fn origin_maps_to_origin() {
        for geometry in Geometry::ALL {
            let p = NumericalExp::new(geometry).exp(&tangent_point(0.0, 0.0, 0.0), 100);
            assert_eq!(p, Vector4::new(0.0, 0.0, 0.0, 1.0));
        }
    }

    #[test]
    fn vertical_geodesics_are_straight() {
        for geometry in Geometry::ALL {
            let p = NumericalExp::new(geometry).exp(&tangent_point(0.0, 0.0, -0.8), 50);
            assert!(p.x.abs() < 1e-15 && p.y.abs() < 1e-15);
            assert!((p.z + 0.8).abs() < 1e-12);
        }
    }

    #[test]
    fn sol_geodesic_along_x_rises() {
        let p = NumericalExp::new(Geometry::Sol).exp(&tangent_point(1.0, 0.0, 0.0), 100);
        assert!(p.x > 0.0 && p.x < 1.0);
        assert!(p.z > 0.0);
        assert!(p.y.abs() < 1e-15);
        assert_eq!(p.w, 1.0);
    }

    #[test]
    fn nih_geodesic_along_x_sinks() {
        let p = NumericalExp::new(Geometry::Nih).exp(&tangent_point(1.0, 0.0, 0.0), 100);
        assert!(p.x > 0.0 && p.x < 1.0);
        assert!(p.z < 0.0);
    }

    #[test]
    fn integration_converges_with_precision() {
        let map = NumericalExp::new(Geometry::Sol);
        let v = tangent_point(0.4, -0.3, 0.2);
        let coarse = map.exp(&v, 50);
        let fine = map.exp(&v, 400);
        assert!((coarse - fine).norm() < 1e-6);
    }

    #[test]
    fn sol_swaps_axes_under_z_flip() {
        let map = NumericalExp::new(Geometry::Sol);
        let p = map.exp(&tangent_point(0.3, 0.5, 0.2), 100);
        let q = map.exp(&tangent_point(0.5, 0.3, -0.2), 100);
        assert!((p.x - q.y).abs() < 1e-12);
        assert!((p.y - q.x).abs() < 1e-12);
        assert!((p.z + q.z).abs() < 1e-12);
    }
}
