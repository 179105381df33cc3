use super::solver::{ConstraintError, ConstraintSolver};
use crate::core::models::pbc::PeriodicBox;
use crate::core::models::topology::{Constraint, Topology};
use nalgebra::{Point3, Vector3};
use tracing::trace;

const DEFAULT_TOLERANCE: f64 = 1e-10;
const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Iterative SHAKE over the constraints of a topology.
#[derive(Debug, Clone)]
pub struct ShakeSolver {
    constraints: Vec<Constraint>,
    inv_mass: Vec<f64>,
    tolerance: f64,
    max_iterations: usize,
    scratch: Vec<Vector3<f64>>,
}

impl ShakeSolver {
    /// Builds a solver for all constraints of `topology`.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintError::Massless`] when a constrained particle has no mass.
    pub fn from_topology(topology: &Topology) -> Result<Self, ConstraintError> {
        let inv_mass: Vec<f64> = topology
            .particles()
            .iter()
            .map(|p| if p.mass > 0.0 { 1.0 / p.mass } else { 0.0 })
            .collect();
        for c in topology.constraints() {
            for index in [c.i, c.j] {
                if inv_mass.get(index).is_none_or(|&w| w == 0.0) {
                    return Err(ConstraintError::Massless { index });
                }
            }
        }
        Ok(Self {
            constraints: topology.constraints().to_vec(),
            inv_mass,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            scratch: Vec::new(),
        })
    }

    /// Relative tolerance on the squared constraint lengths.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    fn check_len(&self, found: usize) -> Result<(), ConstraintError> {
        if found == self.inv_mass.len() {
            Ok(())
        } else {
            Err(ConstraintError::SizeMismatch {
                expected: self.inv_mass.len(),
                found,
            })
        }
    }
}

impl ConstraintSolver for ShakeSolver {
    fn constrain_positions(
        &mut self,
        reference: &[Point3<f64>],
        trial: &mut [Point3<f64>],
        pbc: &PeriodicBox,
    ) -> Result<(), ConstraintError> {
        self.check_len(reference.len())?;
        self.check_len(trial.len())?;
        if self.constraints.is_empty() {
            return Ok(());
        }

        for iteration in 0..self.max_iterations {
            let mut converged = true;
            for c in &self.constraints {
                let r_ref = pbc.dx(&reference[c.i], &reference[c.j]);
                let target_sq = if c.is_flexible() {
                    r_ref.norm_squared()
                } else {
                    c.length * c.length
                };
                if target_sq == 0.0 {
                    continue;
                }

                let r = pbc.dx(&trial[c.i], &trial[c.j]);
                let diff = target_sq - r.norm_squared();
                if diff.abs() <= 2.0 * self.tolerance * target_sq {
                    continue;
                }
                converged = false;

                let (wi, wj) = (self.inv_mass[c.i], self.inv_mass[c.j]);
                let denom = 2.0 * (wi + wj) * r.dot(&r_ref);
                if denom.abs() < 1e-12 * target_sq {
                    return Err(ConstraintError::Degenerate { i: c.i, j: c.j });
                }
                let g = diff / denom;
                trial[c.i] += g * wi * r_ref;
                trial[c.j] -= g * wj * r_ref;
            }
            if converged {
                trace!(iterations = iteration, "SHAKE converged.");
                return Ok(());
            }
        }

        Err(ConstraintError::DidNotConverge {
            iterations: self.max_iterations,
        })
    }

    fn project_flexible(
        &mut self,
        reference: &[Point3<f64>],
        derivative: &[Vector3<f64>],
        correction: &mut [Vector3<f64>],
        pbc: &PeriodicBox,
    ) -> Result<(), ConstraintError> {
        self.check_len(reference.len())?;
        self.check_len(derivative.len())?;
        self.check_len(correction.len())?;

        self.scratch.clear();
        self.scratch.extend_from_slice(derivative);

        let directions: Vec<(usize, usize, Vector3<f64>)> = self
            .constraints
            .iter()
            .filter(|c| c.is_flexible())
            .filter_map(|c| {
                let r_ref = pbc.dx(&reference[c.i], &reference[c.j]);
                let len = r_ref.norm();
                (len > 0.0).then(|| (c.i, c.j, r_ref / len))
            })
            .collect();

        let scale = derivative
            .iter()
            .map(|d| d.norm())
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let mut converged = directions.is_empty();
        for _ in 0..self.max_iterations {
            if converged {
                break;
            }
            let mut largest = 0.0_f64;
            for &(i, j, u) in &directions {
                let (wi, wj) = (self.inv_mass[i], self.inv_mass[j]);
                let along = u.dot(&(self.scratch[i] - self.scratch[j]));
                let lambda = along / (wi + wj);
                self.scratch[i] -= lambda * wi * u;
                self.scratch[j] += lambda * wj * u;
                largest = largest.max(along.abs());
            }
            converged = largest <= self.tolerance * scale;
        }
        if !converged {
            return Err(ConstraintError::DidNotConverge {
                iterations: self.max_iterations,
            });
        }

        for ((out, projected), original) in correction
            .iter_mut()
            .zip(self.scratch.iter())
            .zip(derivative.iter())
        {
            *out = projected - original;
        }
        Ok(())
    }
}
