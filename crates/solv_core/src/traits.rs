use nalgebra::Vector4;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in the geodesic integrator.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A first-order system of ODEs.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer to write dx/dt
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for integrators that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// Homogeneous tangent vector `(x, y, z, 1)` at the origin.
pub type TangentPoint = Vector4<f64>;

/// Builds a tangent point with the homogeneous component set to 1.
pub fn tangent_point(x: f64, y: f64, z: f64) -> TangentPoint {
    Vector4::new(x, y, z, 1.0)
}

/// The forward exponential map: sends a tangent vector at the origin to the
/// point reached after following its geodesic for unit time.
///
/// `precision` is the number of integration steps the evaluator may use.
/// The result is a homogeneous point `(x, y, z, 1)`. Implementations must be
/// deterministic for fixed inputs.
pub trait ExpMap {
    fn exp(&self, v: &TangentPoint, precision: usize) -> Vector4<f64>;
}

impl<F> ExpMap for F
where
    F: Fn(&TangentPoint, usize) -> Vector4<f64>,
{
    fn exp(&self, v: &TangentPoint, precision: usize) -> Vector4<f64> {
        self(v, precision)
    }
}
