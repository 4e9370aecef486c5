pub mod builder;
pub mod exp;
pub mod format;
pub mod geometry;
pub mod inverse;
pub mod metric;
pub mod remap;
pub mod solvers;
pub mod table;
/// The `solv_core` crate builds lookup tables of the inverse exponential map
/// for the Sol and Nih geometries.
///
/// Key components:
/// - **Traits**: `ExpMap` (the forward exponential map), plus `DynamicalSystem` and
///   `Steppable` for the geodesic integrator.
/// - **Remap / Metric**: flattened grid coordinates and the error they induce.
/// - **Inverse**: damped Newton solver with a local-search fallback.
/// - **Builder**: multi-threaded table construction with edge extrapolation.
/// - **Format**: the binary table file.
pub mod traits;

pub use builder::{build_table, BuildError, BuildOutput, BuildSettings, CellFailure};
pub use exp::NumericalExp;
pub use format::{load_table, read_table, save_table, write_table, TableIoError};
pub use geometry::Geometry;
pub use inverse::{InverseError, InverseSettings, InverseSolution};
pub use table::{Dimensions, LowPoint, Table};
pub use traits::{tangent_point, ExpMap, TangentPoint};
