//! The sampled inverse exponential map.
//!
//! Samples are stored in one contiguous buffer indexed as
//! `(z * Y + y) * X + x`: x varies fastest, so every Z-slice is a contiguous
//! run of `X * Y` samples. The binary format uses the same order.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::remap::{self, uncanonicalize, x_to_ix, z_to_iz, zflip};
use crate::traits::TangentPoint;

/// Canonicalized single-precision sample.
pub type LowPoint = Vector3<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Dimensions {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn len(&self) -> usize {
        self.x * self.y * self.z
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slice_len(&self) -> usize {
        self.x * self.y
    }

    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        x < self.x && y < self.y && z < self.z
    }

    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(self.contains(x, y, z), "({x}, {y}, {z}) outside {self:?}");
        (z * self.y + y) * self.x + x
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    dims: Dimensions,
    samples: Vec<LowPoint>,
}

impl Table {
    /// Allocates a zero-filled table.
    pub fn zeroed(dims: Dimensions) -> Self {
        Self {
            dims,
            samples: vec![LowPoint::zeros(); dims.len()],
        }
    }

    /// Wraps an existing sample buffer, which must hold exactly `dims.len()` samples.
    pub fn from_samples(dims: Dimensions, samples: Vec<LowPoint>) -> Option<Self> {
        (samples.len() == dims.len()).then_some(Self { dims, samples })
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn samples(&self) -> &[LowPoint] {
        &self.samples
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> LowPoint {
        self.samples[self.dims.index(x, y, z)]
    }

    pub fn try_get(&self, x: usize, y: usize, z: usize) -> Option<LowPoint> {
        self.dims
            .contains(x, y, z)
            .then(|| self.samples[self.dims.index(x, y, z)])
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: LowPoint) {
        let idx = self.dims.index(x, y, z);
        self.samples[idx] = value;
    }

    /// Splits the table into its Z-slices, each an exclusive mutable view.
    pub fn z_slices_mut(&mut self) -> impl Iterator<Item = ZSliceMut<'_>> {
        let (width, height) = (self.dims.x, self.dims.y);
        self.samples
            .chunks_mut(self.dims.slice_len().max(1))
            .enumerate()
            .map(move |(iz, samples)| ZSliceMut {
                iz,
                width,
                height,
                samples,
            })
    }
}

/// One Z-slice of a [`Table`], borrowed mutably.
#[derive(Debug)]
pub struct ZSliceMut<'a> {
    iz: usize,
    width: usize,
    height: usize,
    samples: &'a mut [LowPoint],
}

impl ZSliceMut<'_> {
    pub fn iz(&self) -> usize {
        self.iz
    }

    pub fn set(&mut self, x: usize, y: usize, value: LowPoint) {
        debug_assert!(x < self.width && y < self.height);
        self.samples[y * self.width + x] = value;
    }
}

/// Nearest-grid lookup of the inverse exponential map at a native point.
///
/// Points outside the sampled octant are folded in by the symmetries of the
/// geometry: sign flips of x and y for both, and for Sol the exchange of the
/// horizontal axes that reverses z.
pub fn nearest_inverse(table: &Table, geometry: Geometry, point: &Vector3<f64>) -> TangentPoint {
    let dims = table.dimensions();
    let (mut x, mut y, mut z) = (point.x, point.y, point.z);
    let flipped = geometry == Geometry::Sol && z < 0.0;
    if flipped {
        std::mem::swap(&mut x, &mut y);
        z = -z;
    }
    let (sx, sy) = (x.signum(), y.signum());

    let to_index = |flat: f64, n: usize| -> usize {
        let scaled = (flat * (n - 1) as f64).round();
        scaled.clamp(0.0, (n - 1) as f64) as usize
    };
    let ix = to_index(x_to_ix(x.abs()), dims.x);
    let iy = to_index(x_to_ix(y.abs()), dims.y);
    let iz = to_index(z_to_iz(geometry, z), dims.z);

    let mut sample = table.get(ix, iy, iz);
    sample.x *= sx as f32;
    sample.y *= sy as f32;
    if flipped {
        sample = zflip(&sample);
    }
    uncanonicalize(&sample)
}

/// Native coordinates of grid node `(ix, iy, iz)`.
pub fn grid_point(geometry: Geometry, dims: Dimensions, ix: usize, iy: usize, iz: usize) -> Vector3<f64> {
    Vector3::new(
        remap::ix_to_x(ix as f64 / (dims.x - 1) as f64),
        remap::ix_to_x(iy as f64 / (dims.y - 1) as f64),
        remap::iz_to_z(geometry, iz as f64 / (dims.z - 1) as f64),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_x_fastest() {
        let dims = Dimensions::new(4, 3, 2);
        assert_eq!(dims.index(0, 0, 0), 0);
        assert_eq!(dims.index(1, 0, 0), 1);
        assert_eq!(dims.index(0, 1, 0), 4);
        assert_eq!(dims.index(0, 0, 1), 12);
        assert_eq!(dims.index(3, 2, 1), 23);
        assert_eq!(dims.len(), 24);
    }

    #[test]
    fn zeroed_table_reads_zero() {
        let table = Table::zeroed(Dimensions::new(3, 3, 3));
        assert_eq!(table.samples().len(), 27);
        assert!(table.samples().iter().all(|p| *p == LowPoint::zeros()));
        assert_eq!(table.try_get(3, 0, 0), None);
        assert_eq!(table.try_get(2, 2, 2), Some(LowPoint::zeros()));
    }

    #[test]
    fn from_samples_checks_length() {
        let dims = Dimensions::new(2, 2, 2);
        assert!(Table::from_samples(dims, vec![LowPoint::zeros(); 7]).is_none());
        assert!(Table::from_samples(dims, vec![LowPoint::zeros(); 8]).is_some());
    }

    #[test]
    fn z_slices_write_through() {
        let mut table = Table::zeroed(Dimensions::new(3, 2, 4));
        for mut slice in table.z_slices_mut() {
            let iz = slice.iz();
            slice.set(2, 1, LowPoint::new(iz as f32, 0.0, 0.0));
        }
        for iz in 0..4 {
            assert_eq!(table.get(2, 1, iz).x, iz as f32);
            assert_eq!(table.get(1, 1, iz), LowPoint::zeros());
        }
        assert_eq!(table.z_slices_mut().count(), 4);
    }

    #[test]
    fn nearest_inverse_uses_symmetries() {
        let dims = Dimensions::new(3, 3, 3);
        let mut table = Table::zeroed(dims);
        let sample = LowPoint::new(0.25, 0.5, 0.125);
        table.set(1, 1, 1, sample);

        let node = grid_point(Geometry::Sol, dims, 1, 1, 1);
        let direct = nearest_inverse(&table, Geometry::Sol, &node);
        let expected = uncanonicalize(&sample);
        assert!((direct - expected).norm() < 1e-12);

        let mirrored = Vector3::new(-node.x, node.y, node.z);
        let v = nearest_inverse(&table, Geometry::Sol, &mirrored);
        assert!((v.x + expected.x).abs() < 1e-12);
        assert!((v.y - expected.y).abs() < 1e-12);

        let flipped = Vector3::new(node.y, node.x, -node.z);
        let v = nearest_inverse(&table, Geometry::Sol, &flipped);
        assert!((v.x - expected.y).abs() < 1e-12);
        assert!((v.y - expected.x).abs() < 1e-12);
        assert!((v.z + expected.z).abs() < 1e-12);
    }

    #[test]
    fn grid_point_matches_remapper() {
        let dims = Dimensions::new(5, 5, 5);
        let p = grid_point(Geometry::Nih, dims, 2, 0, 2);
        assert!((x_to_ix(p.x) - 0.5).abs() < 1e-12);
        assert_eq!(p.y, 0.0);
        assert!(p.z.abs() < 1e-12);
    }
}
