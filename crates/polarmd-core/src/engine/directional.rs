use super::error::EngineError;
use crate::core::constraints::solver::ConstraintSolver;
use crate::core::models::pbc::PeriodicBox;
use crate::core::models::topology::Topology;
use nalgebra::{Point3, Vector3};
use std::ops::Range;

/// Estimates the acceleration of atoms along their flexible constraints.
///
/// The estimator takes one constrained leap-frog step backward and one forward
/// from the configuration under test. The difference between the constrained
/// second derivative and the unconstrained `f/m` is the constraint acceleration;
/// its projection on the flexible bond directions is the force-like quantity that
/// the relaxation drives to zero together with the shell forces.
#[derive(Debug, Clone)]
pub struct DirectionalEstimator {
    dt: f64,
    home: Range<usize>,
    real: Vec<bool>,
    mass: Vec<f64>,
    x_old: Vec<Point3<f64>>,
    backward: Vec<Point3<f64>>,
    forward: Vec<Point3<f64>>,
    accel: Vec<Vector3<f64>>,
    acc_dir: Vec<Vector3<f64>>,
}

impl DirectionalEstimator {
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTimeStep`] for a non-positive `dt` and
    /// [`EngineError::NonPositiveMass`] for a massless real atom in `home`.
    pub fn new(topology: &Topology, dt: f64, home: Range<usize>) -> Result<Self, EngineError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(EngineError::InvalidTimeStep(dt));
        }
        let real: Vec<bool> = topology.particles().iter().map(|p| p.kind.is_real()).collect();
        let mass: Vec<f64> = topology.particles().iter().map(|p| p.mass).collect();
        if let Some(index) = home.clone().find(|&i| real[i] && mass[i] <= 0.0) {
            return Err(EngineError::NonPositiveMass {
                index,
                mass: mass[index],
            });
        }

        let n = topology.particle_count();
        Ok(Self {
            dt,
            home,
            real,
            mass,
            x_old: vec![Point3::origin(); n],
            backward: vec![Point3::origin(); n],
            forward: vec![Point3::origin(); n],
            accel: vec![Vector3::zeros(); n],
            acc_dir: vec![Vector3::zeros(); n],
        })
    }

    fn is_active(&self, index: usize) -> bool {
        self.real[index] && self.home.contains(&index)
    }

    /// Records the previous positions `x - v * dt` at the start of an MD step.
    pub fn prepare_step(&mut self, positions: &[Point3<f64>], velocities: &[Vector3<f64>]) {
        self.x_old.copy_from_slice(positions);
        for i in self.home.clone() {
            self.x_old[i] = positions[i] - velocities[i] * self.dt;
        }
    }

    pub fn x_old(&self) -> &[Point3<f64>] {
        &self.x_old
    }

    pub fn acc_dir(&self) -> &[Vector3<f64>] {
        &self.acc_dir
    }

    /// Estimates the directional acceleration at `x` and returns `Σ m |a_dir|²`
    /// over the home atoms.
    ///
    /// `x_init` is the configuration the MD step started from.
    pub fn estimate(
        &mut self,
        x: &[Point3<f64>],
        x_init: &[Point3<f64>],
        forces: &[Vector3<f64>],
        pbc: &PeriodicBox,
        solver: &mut dyn ConstraintSolver,
    ) -> Result<f64, EngineError> {
        let dt_sq = self.dt * self.dt;
        self.backward.copy_from_slice(x);
        self.forward.copy_from_slice(x);
        for i in self.home.clone() {
            if !self.real[i] {
                continue;
            }
            self.backward[i] = x[i] - (x_init[i] - self.x_old[i]);
            self.forward[i] = x[i] + (x[i] - self.x_old[i]) + forces[i] * (dt_sq / self.mass[i]);
        }

        solver.constrain_positions(x, &mut self.backward, pbc)?;
        solver.constrain_positions(x, &mut self.forward, pbc)?;

        for i in 0..x.len() {
            self.accel[i] = if self.is_active(i) {
                let curvature = (x[i] - self.backward[i]) + (x[i] - self.forward[i]);
                -curvature / dt_sq - forces[i] / self.mass[i]
            } else {
                Vector3::zeros()
            };
        }

        solver.project_flexible(&self.x_old, &self.accel, &mut self.acc_dir, pbc)?;

        let mut sf_dir = 0.0;
        for i in 0..x.len() {
            if self.is_active(i) {
                sf_dir += self.mass[i] * self.acc_dir[i].norm_squared();
            } else {
                self.acc_dir[i] = Vector3::zeros();
            }
        }
        Ok(sf_dir)
    }

    /// Sets home atom velocities to the displacement since `x_old` over one step.
    pub fn update_velocities(
        &self,
        positions: &[Point3<f64>],
        velocities: &mut [Vector3<f64>],
        pbc: &PeriodicBox,
    ) {
        for i in self.home.clone() {
            if self.real[i] {
                velocities[i] = pbc.dx(&positions[i], &self.x_old[i]) / self.dt;
            }
        }
    }

    /// Moves the home atoms of `trial` from `current` along the last estimate.
    pub fn displace(&self, current: &[Point3<f64>], trial: &mut [Point3<f64>], step: f64) {
        for i in self.home.clone() {
            if self.real[i] {
                trial[i] = current[i] + step * self.acc_dir[i];
            }
        }
    }
}
