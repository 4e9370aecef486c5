//! Damped Newton inversion of the exponential map.
//!
//! The forward map has no usable closed-form derivative, so the Jacobian is
//! estimated by forward differences. Each Newton correction is clamped and
//! then halved until it lowers the error; when that stalls on a hopeless
//! error, a coarse-to-fine search over the 27 axis offsets takes over.

use nalgebra::{Matrix3, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, trace};

use crate::geometry::Geometry;
use crate::metric::solution_error;
use crate::traits::{tangent_point, ExpMap, TangentPoint};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InverseSettings {
    /// Integration steps handed to the forward map.
    pub precision: usize,
    /// Target error in flattened space.
    pub tolerance: f64,
    /// Forward-difference step for the Jacobian.
    pub jacobian_step: f64,
    /// Largest correction applied in a single Newton step.
    pub max_step: f64,
    pub max_halvings: usize,
    /// Above this error a stalled Newton iteration switches to local search
    /// instead of giving up.
    pub catastrophic_error: f64,
    pub search_start: f64,
    pub search_floor: f64,
}

impl Default for InverseSettings {
    fn default() -> Self {
        Self {
            precision: 100,
            tolerance: 1e-6,
            jacobian_step: 1e-6,
            max_step: 0.1,
            max_halvings: 10,
            catastrophic_error: 999.0,
            search_start: 1.0,
            search_floor: 1e-9,
        }
    }
}

impl InverseSettings {
    pub fn validate(&self) -> Result<(), InverseError> {
        if self.precision == 0 {
            return Err(InverseError::InvalidSettings("precision must be greater than zero"));
        }
        if !(self.tolerance >= 0.0) {
            return Err(InverseError::InvalidSettings("tolerance must be non-negative"));
        }
        if !(self.jacobian_step > 0.0) {
            return Err(InverseError::InvalidSettings("jacobian_step must be positive"));
        }
        if !(self.max_step > 0.0) {
            return Err(InverseError::InvalidSettings("max_step must be positive"));
        }
        if !(self.search_floor > 0.0) || !(self.search_start > self.search_floor) {
            return Err(InverseError::InvalidSettings(
                "search_start must exceed a positive search_floor",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseSolution {
    pub point: TangentPoint,
    /// Forward image of `point`.
    pub image: Vector4<f64>,
    /// Residual in flattened space; may exceed the tolerance when Newton stalled.
    pub error: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InverseError {
    #[error("forward map returned a non-finite point {image:?} for {point:?}")]
    NonFinite {
        point: TangentPoint,
        image: Vector4<f64>,
    },
    #[error("cannot improve error {error} at {point:?}")]
    Exhausted { point: TangentPoint, error: f64 },
    #[error("invalid solver settings: {0}")]
    InvalidSettings(&'static str),
}

struct Probe<'a, M: ?Sized> {
    map: &'a M,
    geometry: Geometry,
    target: &'a Vector3<f64>,
    precision: usize,
}

impl<M: ExpMap + ?Sized> Probe<'_, M> {
    fn image(&self, v: &Vector3<f64>) -> Vector4<f64> {
        self.map.exp(&tangent_point(v.x, v.y, v.z), self.precision)
    }

    fn error(&self, image: &Vector4<f64>) -> f64 {
        solution_error(self.geometry, self.target, image)
    }
}

/// Finds a tangent vector whose image under `map` is within
/// `settings.tolerance` of `target`, starting from `initial`.
///
/// Returns the best estimate found. When the damped Newton iteration stalls
/// at a moderate error, that estimate is returned with its residual; a stall
/// above `catastrophic_error` that local search cannot improve is an error.
pub fn iterative_solve<M: ExpMap + ?Sized>(
    map: &M,
    geometry: Geometry,
    target: &Vector3<f64>,
    initial: &TangentPoint,
    settings: &InverseSettings,
) -> Result<InverseSolution, InverseError> {
    settings.validate()?;
    let probe = Probe {
        map,
        geometry,
        target,
        precision: settings.precision,
    };

    let mut at = initial.xyz();
    let mut ver = probe.image(&at);
    let mut err = probe.error(&ver);
    if !err.is_finite() || ver.iter().any(|c| !c.is_finite()) {
        return Err(InverseError::NonFinite {
            point: *initial,
            image: ver,
        });
    }
    let mut iterations = 0usize;

    while err > settings.tolerance {
        iterations += 1;
        trace!(iteration = iterations, error = err, "newton step at {:?}", at);

        let newton = newton_correction(&probe, &at, &ver, settings)
            .and_then(|bonus| damped_step(&probe, &at, err, bonus, settings.max_halvings));

        let accepted = match newton {
            Some(step) => step,
            None if err > settings.catastrophic_error => match local_search(&probe, &at, err, settings) {
                Some(step) => step,
                None => {
                    let point = tangent_point(at.x, at.y, at.z);
                    error!(error = err, "cannot improve error at {:?}", point);
                    return Err(InverseError::Exhausted { point, error: err });
                }
            },
            None => break,
        };

        (at, ver, err) = accepted;
    }

    Ok(InverseSolution {
        point: tangent_point(at.x, at.y, at.z),
        image: ver,
        error: err,
        iterations,
    })
}

/// Solves from every candidate and keeps the best result. A candidate whose
/// error is already below `early_accept` ends the search.
pub fn solve_from_candidates<M: ExpMap + ?Sized>(
    map: &M,
    geometry: Geometry,
    target: &Vector3<f64>,
    candidates: &[TangentPoint],
    settings: &InverseSettings,
    early_accept: f64,
) -> Result<InverseSolution, InverseError> {
    let mut best: Option<InverseSolution> = None;
    for candidate in candidates {
        let solution = iterative_solve(map, geometry, target, candidate, settings)?;
        let done = solution.error < early_accept;
        if best.map_or(true, |b| solution.error < b.error) {
            best = Some(solution);
        }
        if done {
            break;
        }
    }
    best.ok_or(InverseError::InvalidSettings("no starting candidates"))
}

type Step = (Vector3<f64>, Vector4<f64>, f64);

/// Newton correction from a forward-difference Jacobian, clamped to
/// `max_step`. `None` when the Jacobian cannot be inverted.
fn newton_correction<M: ExpMap + ?Sized>(
    probe: &Probe<'_, M>,
    at: &Vector3<f64>,
    ver: &Vector4<f64>,
    settings: &InverseSettings,
) -> Option<Vector3<f64>> {
    let eps = settings.jacobian_step;
    let here = ver.xyz();
    let columns: Vec<Vector3<f64>> = (0..3)
        .map(|axis| {
            let mut x = *at;
            x[axis] += eps;
            (probe.image(&x).xyz() - here) / eps
        })
        .collect();
    let jacobian = Matrix3::from_columns(&columns);
    let inverse = jacobian.try_inverse()?;

    let mut bonus = inverse * (probe.target - here);
    let len = bonus.norm();
    if len > settings.max_step {
        bonus *= settings.max_step / len;
    }
    bonus.iter().all(|c| c.is_finite()).then_some(bonus)
}

fn damped_step<M: ExpMap + ?Sized>(
    probe: &Probe<'_, M>,
    at: &Vector3<f64>,
    err: f64,
    mut bonus: Vector3<f64>,
    max_halvings: usize,
) -> Option<Step> {
    for _ in 0..=max_halvings {
        let next = at + bonus;
        let image = probe.image(&next);
        let next_err = probe.error(&image);
        if next_err < err {
            return Some((next, image, next_err));
        }
        bonus /= 2.0;
    }
    None
}

/// Tries the 27 offsets `{-s, 0, s}^3` around `at` for shrinking `s` and
/// returns the first that lowers the error.
fn local_search<M: ExpMap + ?Sized>(
    probe: &Probe<'_, M>,
    at: &Vector3<f64>,
    err: f64,
    settings: &InverseSettings,
) -> Option<Step> {
    let mut s = settings.search_start;
    while s.abs() > settings.search_floor {
        for k in 0..27 {
            let mut kk = k;
            let mut next = *at;
            for i in 0..3 {
                match kk % 3 {
                    1 => next[i] += s,
                    2 => next[i] -= s,
                    _ => {}
                }
                kk /= 3;
            }
            let image = probe.image(&next);
            let next_err = probe.error(&image);
            if next_err < err {
                trace!(scale = s, error = next_err, "local search improved");
                return Some((next, image, next_err));
            }
        }
        s *= 0.5;
    }
    None
}
