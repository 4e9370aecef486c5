//! Conversions between native coordinates and the flattened grid space.
//!
//! Grid samples are evenly spaced in flattened space, which is a bounded
//! compression of the native coordinates. The X and Y axes share one
//! compression; the Z axis depends on the geometry.

use nalgebra::Vector3;

use crate::geometry::Geometry;
use crate::table::LowPoint;
use crate::traits::{tangent_point, TangentPoint};

/// Fixed number of bisection steps used by [`ix_to_x`].
pub const BISECTION_STEPS: usize = 100;

/// Radius substituted for `atanh(1)` when uncanonicalizing a boundary sample.
const BOUNDARY_RADIUS: f64 = 30.0;

/// Native → flattened compression for the X and Y axes.
pub fn x_to_ix(u: f64) -> f64 {
    u.tanh()
}

/// Flattened → native for the X and Y axes, inverting [`x_to_ix`] by bisection.
///
/// `ix` is expected in `[0, 1]`.
pub fn ix_to_x(ix: f64) -> f64 {
    let mut lo = 0.0f64;
    let mut hi = 1.0f64;
    for _ in 0..BISECTION_STEPS {
        let mid = (lo + hi) / 2.0;
        if x_to_ix(mid.atanh()) < ix {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo.atanh()
}

/// Native → flattened compression for the Z axis.
pub fn z_to_iz(geometry: Geometry, z: f64) -> f64 {
    match geometry {
        Geometry::Sol => z.tanh(),
        Geometry::Nih => (z / 4.0).tanh() / 2.0 + 0.5,
    }
}

/// Flattened → native for the Z axis.
pub fn iz_to_z(geometry: Geometry, iz: f64) -> f64 {
    match geometry {
        Geometry::Sol => iz.atanh(),
        Geometry::Nih => (iz * 2.0 - 1.0).atanh() * 4.0,
    }
}

/// Maps a native point into flattened space, axis by axis.
pub fn compress(geometry: Geometry, p: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(x_to_ix(p.x), x_to_ix(p.y), z_to_iz(geometry, p.z))
}

/// Azimuthal equidistant projection of a tangent vector onto the open unit
/// ball, truncated to single precision.
pub fn canonicalize(v: &TangentPoint) -> LowPoint {
    let xyz = v.xyz();
    let r = xyz.norm();
    if r == 0.0 {
        return LowPoint::zeros();
    }
    let d = r.tanh() / r;
    (xyz * d).cast::<f32>()
}

/// Inverse of [`canonicalize`].
pub fn uncanonicalize(p: &LowPoint) -> TangentPoint {
    let xyz = p.cast::<f64>();
    let r = xyz.norm();
    if r == 0.0 {
        return tangent_point(0.0, 0.0, 0.0);
    }
    let target_r = if r == 1.0 { BOUNDARY_RADIUS } else { r.atanh() };
    let d = target_r / r;
    tangent_point(xyz.x * d, xyz.y * d, xyz.z * d)
}

/// Sol symmetry exchanging the horizontal axes and reversing z.
pub fn zflip(p: &LowPoint) -> LowPoint {
    LowPoint::new(p.y, p.x, -p.z)
}
