//! The supported non-isotropic geometries.
//!
//! Both are homogeneous spaces whose metric depends only on the vertical
//! coordinate `z`:
//!
//! - **Sol**: `ds² = e^{2z} dx² + e^{-2z} dy² + dz²`
//! - **Nih**: `ds² = 2^{-2z} dx² + 3^{-2z} dy² + dz²`

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::table::Dimensions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    Sol,
    Nih,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown geometry `{0}` (expected `sol` or `nih`)")]
pub struct ParseGeometryError(pub String);

impl Geometry {
    pub const ALL: [Geometry; 2] = [Geometry::Sol, Geometry::Nih];

    pub fn name(self) -> &'static str {
        match self {
            Geometry::Sol => "sol",
            Geometry::Nih => "nih",
        }
    }

    /// Table dimensions used when none are requested explicitly.
    pub fn default_dimensions(self) -> Dimensions {
        Dimensions::new(64, 64, 64)
    }

    /// Whether the Z compression is singular at flattened coordinate 0,
    /// so the first Z-slice must be extrapolated instead of solved.
    pub fn singular_first_slice(self) -> bool {
        matches!(self, Geometry::Nih)
    }

    /// Smallest Z dimension leaving two solved slices to extrapolate from.
    pub fn min_z_dimension(self) -> usize {
        if self.singular_first_slice() {
            4
        } else {
            3
        }
    }

    /// Geodesic acceleration `-Γ(v, v)` at height `z` for velocity `v`.
    pub fn geodesic_acceleration(self, z: f64, v: &Vector3<f64>) -> Vector3<f64> {
        match self {
            Geometry::Sol => Vector3::new(
                -2.0 * v.x * v.z,
                2.0 * v.y * v.z,
                v.x * v.x * (2.0 * z).exp() - v.y * v.y * (-2.0 * z).exp(),
            ),
            Geometry::Nih => {
                let l2 = std::f64::consts::LN_2;
                let l3 = 3f64.ln();
                Vector3::new(
                    2.0 * l2 * v.x * v.z,
                    2.0 * l3 * v.y * v.z,
                    -l2 * v.x * v.x * (-2.0 * l2 * z).exp()
                        - l3 * v.y * v.y * (-2.0 * l3 * z).exp(),
                )
            }
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Geometry {
    type Err = ParseGeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sol" => Ok(Geometry::Sol),
            "nih" => Ok(Geometry::Nih),
            _ => Err(ParseGeometryError(s.to_string())),
        }
    }
}
