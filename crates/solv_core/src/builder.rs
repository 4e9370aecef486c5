//! Parallel construction of the inverse exponential map table.
//!
//! Z-slices are dealt round-robin to scoped worker threads. Each worker holds
//! the only mutable borrow of its slices, so cells are written without
//! locking. Slices whose Z coordinate is singular or unreachable are filled
//! afterwards by linear extrapolation, as are the last X and Y columns.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::geometry::Geometry;
use crate::inverse::{solve_from_candidates, InverseError, InverseSettings};
use crate::remap::canonicalize;
use crate::table::{grid_point, Dimensions, LowPoint, Table, ZSliceMut};
use crate::traits::{tangent_point, ExpMap, TangentPoint};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Number of worker threads; capped by the number of solved slices.
    pub workers: usize,
    pub solver: InverseSettings,
    /// Cells whose residual exceeds this are reported and left unset.
    pub sanity_threshold: f64,
    /// A candidate solved below this residual ends the candidate loop.
    pub early_accept: f64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            solver: InverseSettings::default(),
            sanity_threshold: 1e-3,
            early_accept: 1e-9,
        }
    }
}

/// A cell the solver could not bring under the sanity threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFailure {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub target: Vector3<f64>,
    pub solution: TangentPoint,
    pub error: f64,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub table: Table,
    pub failures: Vec<CellFailure>,
    /// Largest residual seen over all solved or failed cells.
    pub max_error: f64,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid table dimensions {x}x{y}x{z}: {reason}")]
    InvalidDimensions {
        x: usize,
        y: usize,
        z: usize,
        reason: String,
    },
    #[error("invalid build settings: {0}")]
    InvalidSettings(String),
    #[error("non-finite result at cell ({x}, {y}, {z})")]
    NonFinite { x: usize, y: usize, z: usize },
    #[error("solver exhausted at cell ({x}, {y}, {z}) with error {error}")]
    SolverExhausted {
        x: usize,
        y: usize,
        z: usize,
        error: f64,
    },
    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),
}

struct Progress {
    rings_done: usize,
    rings_total: usize,
    max_error: f64,
}

struct Context<'a, M: ?Sized> {
    map: &'a M,
    geometry: Geometry,
    dims: Dimensions,
    settings: &'a BuildSettings,
    rings: &'a [Vec<(usize, usize)>],
    cancel: &'a AtomicBool,
    progress: &'a Mutex<Progress>,
}

#[derive(Default)]
struct WorkerReport {
    failures: Vec<CellFailure>,
    max_error: f64,
}

enum CellOutcome {
    Solved(LowPoint, f64),
    Failed(CellFailure),
}

/// Builds the table for `geometry` by inverting `map` at every grid node.
///
/// Per-cell inaccuracies are logged and returned in [`BuildOutput::failures`];
/// a non-finite result or an exhausted solver aborts the whole build.
pub fn build_table<M: ExpMap + Sync + ?Sized>(
    map: &M,
    geometry: Geometry,
    dims: Dimensions,
    settings: &BuildSettings,
) -> Result<BuildOutput, BuildError> {
    validate_dimensions(geometry, dims)?;
    if settings.workers == 0 {
        return Err(BuildError::InvalidSettings(
            "workers must be greater than zero".to_string(),
        ));
    }
    settings
        .solver
        .validate()
        .map_err(|e| BuildError::InvalidSettings(e.to_string()))?;

    let started = Instant::now();
    let mut table = Table::zeroed(dims);
    let rings = growing_square_rings(dims.x - 1, dims.y - 1);
    let active: Vec<usize> = (0..dims.z).filter(|&iz| solves_slice(geometry, dims, iz)).collect();
    let workers = settings.workers.min(active.len());
    info!(
        geometry = %geometry,
        x = dims.x,
        y = dims.y,
        z = dims.z,
        workers,
        "building inverse geodesic table"
    );

    let cancel = AtomicBool::new(false);
    let progress = Mutex::new(Progress {
        rings_done: 0,
        rings_total: rings.len() * active.len(),
        max_error: 0.0,
    });
    let ctx = Context {
        map,
        geometry,
        dims,
        settings,
        rings: &rings,
        cancel: &cancel,
        progress: &progress,
    };

    let mut buckets: Vec<Vec<ZSliceMut<'_>>> = (0..workers).map(|_| Vec::new()).collect();
    for slice in table.z_slices_mut() {
        if solves_slice(geometry, dims, slice.iz()) {
            buckets[slice.iz() % workers].push(slice);
        }
    }

    let results: Vec<Result<WorkerReport, BuildError>> = thread::scope(|scope| {
        let ctx = &ctx;
        let handles: Vec<_> = buckets
            .into_iter()
            .filter(|bucket| !bucket.is_empty())
            .map(|bucket| scope.spawn(move || run_worker(ctx, bucket)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|payload| {
                    Err(BuildError::WorkerPanicked(panic_payload_to_string(payload)))
                })
            })
            .collect()
    });

    let mut failures = Vec::new();
    let mut max_error = 0.0f64;
    for result in results {
        let report = result?;
        failures.extend(report.failures);
        max_error = max_error.max(report.max_error);
    }
    failures.sort_by_key(|f| (f.z, f.y, f.x));

    extrapolate_edges(&mut table, geometry);

    info!(
        failures = failures.len(),
        max_error,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "table complete"
    );
    Ok(BuildOutput {
        table,
        failures,
        max_error,
    })
}

fn validate_dimensions(geometry: Geometry, dims: Dimensions) -> Result<(), BuildError> {
    let invalid = |reason: String| BuildError::InvalidDimensions {
        x: dims.x,
        y: dims.y,
        z: dims.z,
        reason,
    };
    if dims.x < 3 || dims.y < 3 {
        return Err(invalid("X and Y need at least 3 samples".to_string()));
    }
    if dims.z < geometry.min_z_dimension() {
        return Err(invalid(format!(
            "{geometry} needs at least {} Z samples",
            geometry.min_z_dimension()
        )));
    }
    let limit = i32::MAX as usize;
    if dims.x > limit || dims.y > limit || dims.z > limit {
        return Err(invalid("dimensions must fit in a 32-bit header".to_string()));
    }
    dims.x
        .checked_mul(dims.y)
        .and_then(|n| n.checked_mul(dims.z))
        .ok_or_else(|| invalid("table size overflows".to_string()))?;
    Ok(())
}

/// Whether slice `iz` is solved directly rather than extrapolated.
fn solves_slice(geometry: Geometry, dims: Dimensions, iz: usize) -> bool {
    !(geometry.singular_first_slice() && iz == 0) && iz + 1 < dims.z
}

/// Cells of `[0, last_x) x [0, last_y)` grouped by growing square radius.
///
/// Radius `it` holds `(it, a)` and `(a, it)` for every `a < it`, followed by
/// the corner `(it, it)`, each only when inside the solved range.
pub fn growing_square_rings(last_x: usize, last_y: usize) -> Vec<Vec<(usize, usize)>> {
    (0..last_x.max(last_y))
        .map(|it| {
            let mut ring = Vec::with_capacity(2 * it + 1);
            for a in 0..it {
                if it < last_x && a < last_y {
                    ring.push((it, a));
                }
                if a < last_x && it < last_y {
                    ring.push((a, it));
                }
            }
            if it < last_x && it < last_y {
                ring.push((it, it));
            }
            ring
        })
        .collect()
}

fn run_worker<M: ExpMap + Sync + ?Sized>(
    ctx: &Context<'_, M>,
    slices: Vec<ZSliceMut<'_>>,
) -> Result<WorkerReport, BuildError> {
    let mut report = WorkerReport::default();
    for mut slice in slices {
        let iz = slice.iz();
        for (radius, ring) in ctx.rings.iter().enumerate() {
            let mut ring_error = 0.0f64;
            for &(ix, iy) in ring {
                if ctx.cancel.load(Ordering::Relaxed) {
                    return Ok(report);
                }
                match solve_cell(ctx, ix, iy, iz) {
                    Ok(CellOutcome::Solved(sample, err)) => {
                        slice.set(ix, iy, sample);
                        ring_error = ring_error.max(err);
                    }
                    Ok(CellOutcome::Failed(failure)) => {
                        ring_error = ring_error.max(failure.error);
                        report.failures.push(failure);
                    }
                    Err(e) => {
                        ctx.cancel.store(true, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }
            report.max_error = report.max_error.max(ring_error);

            let mut progress = ctx.progress.lock().unwrap_or_else(PoisonError::into_inner);
            progress.rings_done += 1;
            progress.max_error = progress.max_error.max(ring_error);
            debug!(
                z = iz,
                radius,
                done = progress.rings_done,
                total = progress.rings_total,
                max_error = progress.max_error,
                "{iz:2}: {radius:2}"
            );
        }
    }
    Ok(report)
}

fn solve_cell<M: ExpMap + ?Sized>(
    ctx: &Context<'_, M>,
    ix: usize,
    iy: usize,
    iz: usize,
) -> Result<CellOutcome, BuildError> {
    let target = grid_point(ctx.geometry, ctx.dims, ix, iy, iz);
    let candidates = [tangent_point(0.0, 0.0, 0.0)];
    let solution = solve_from_candidates(
        ctx.map,
        ctx.geometry,
        &target,
        &candidates,
        &ctx.settings.solver,
        ctx.settings.early_accept,
    )
    .map_err(|e| {
        error!(x = ix, y = iy, z = iz, "{e}");
        match e {
            InverseError::NonFinite { .. } => BuildError::NonFinite {
                x: ix,
                y: iy,
                z: iz,
            },
            InverseError::Exhausted { error, .. } => BuildError::SolverExhausted {
                x: ix,
                y: iy,
                z: iz,
                error,
            },
            InverseError::InvalidSettings(reason) => BuildError::InvalidSettings(reason.to_string()),
        }
    })?;

    if solution.error > ctx.settings.sanity_threshold {
        let canonical = canonicalize(&solution.point);
        warn!(
            x = ix,
            y = iy,
            z = iz,
            error = solution.error,
            "cell left unset: f({:?}) = {:?}, wanted {:?}, canonical {:?}",
            solution.point,
            solution.image,
            target,
            canonical
        );
        return Ok(CellOutcome::Failed(CellFailure {
            x: ix,
            y: iy,
            z: iz,
            target,
            solution: solution.point,
            error: solution.error,
        }));
    }

    let sample = canonicalize(&solution.point);
    if sample.iter().any(|c| !c.is_finite()) {
        error!(x = ix, y = iy, z = iz, "{:?} canonicalized to {:?}", solution.point, sample);
        return Err(BuildError::NonFinite {
            x: ix,
            y: iy,
            z: iz,
        });
    }
    Ok(CellOutcome::Solved(sample, solution.error))
}

/// Fills the samples the solver does not reach by linear extrapolation from
/// the two preceding neighbours: Z first, then Y, then X.
pub fn extrapolate_edges(table: &mut Table, geometry: Geometry) {
    let dims = table.dimensions();
    let (last_x, last_y, last_z) = (dims.x - 1, dims.y - 1, dims.z - 1);

    for x in 0..last_x {
        for y in 0..last_y {
            for z in last_z..dims.z {
                let v = table.get(x, y, z - 1) * 2.0 - table.get(x, y, z - 2);
                table.set(x, y, z, v);
            }
            if geometry.singular_first_slice() {
                let v = table.get(x, y, 1) * 2.0 - table.get(x, y, 2);
                table.set(x, y, 0, v);
            }
        }
    }

    for x in 0..last_x {
        for y in last_y..dims.y {
            for z in 0..dims.z {
                let v = table.get(x, y - 1, z) * 2.0 - table.get(x, y - 2, z);
                table.set(x, y, z, v);
            }
        }
    }

    for x in last_x..dims.x {
        for y in 0..dims.y {
            for z in 0..dims.z {
                let v = table.get(x - 1, y, z) * 2.0 - table.get(x - 2, y, z);
                table.set(x, y, z, v);
            }
        }
    }
}

fn panic_payload_to_string(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    "worker panicked".to_string()
}
