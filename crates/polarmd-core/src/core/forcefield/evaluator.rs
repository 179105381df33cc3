use super::term::EnergyTerms;
use crate::core::comm::CommError;
use crate::core::models::pbc::PeriodicBox;
use nalgebra::{Matrix3, Point3, Vector3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForceError {
    #[error("Force buffer holds {found} entries but {expected} positions were given")]
    SizeMismatch { expected: usize, found: usize },

    #[error("Non-finite force on particle {index}")]
    NonFinite { index: usize },

    #[error("Force evaluation failed: {0}")]
    Evaluator(String),

    #[error("Force reduction across ranks failed: {0}")]
    Communication(#[from] CommError),
}

/// What the caller needs from a force evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForceFlags {
    pub compute_energy: bool,
    pub compute_virial: bool,
    /// Set on the first evaluation of an MD step; evaluators may rebuild pair lists.
    pub new_pair_list: bool,
}

impl Default for ForceFlags {
    fn default() -> Self {
        Self {
            compute_energy: true,
            compute_virial: true,
            new_pair_list: false,
        }
    }
}

/// Output of one force evaluation, sized to the full particle count.
///
/// Direct-space forces and long-range (mesh) forces are kept apart so that the
/// long-range part can be spread from virtual sites before both are folded together.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceBuffers {
    pub forces: Vec<Vector3<f64>>,
    pub long_range_forces: Vec<Vector3<f64>>,
    pub energies: EnergyTerms,
    pub virial: Matrix3<f64>,
    pub long_range_virial: Matrix3<f64>,
}

impl ForceBuffers {
    pub fn new(len: usize) -> Self {
        Self {
            forces: vec![Vector3::zeros(); len],
            long_range_forces: vec![Vector3::zeros(); len],
            energies: EnergyTerms::default(),
            virial: Matrix3::zeros(),
            long_range_virial: Matrix3::zeros(),
        }
    }

    pub fn len(&self) -> usize {
        self.forces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forces.is_empty()
    }

    /// Zeroes forces, energies and both virial accumulators.
    pub fn clear(&mut self) {
        self.forces.fill(Vector3::zeros());
        self.long_range_forces.fill(Vector3::zeros());
        self.energies = EnergyTerms::default();
        self.virial = Matrix3::zeros();
        self.long_range_virial = Matrix3::zeros();
    }

    /// Adds the long-range forces into the direct forces and zeroes them.
    pub fn fold_long_range(&mut self) {
        for (f, lr) in self.forces.iter_mut().zip(self.long_range_forces.iter_mut()) {
            *f += *lr;
            *lr = Vector3::zeros();
        }
    }

    #[inline]
    pub fn potential_energy(&self) -> f64 {
        self.energies.total()
    }
}

/// Computes forces, energies and virials for a configuration.
///
/// Implementations overwrite every field of `out`. In multi-rank runs the
/// energies and virials are the rank-local contributions; the engine sums them.
pub trait ForceEvaluator {
    fn compute_forces(
        &mut self,
        positions: &[Point3<f64>],
        pbc: &PeriodicBox,
        step: u64,
        flags: ForceFlags,
        out: &mut ForceBuffers,
    ) -> Result<(), ForceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_long_range_moves_forces_into_direct_buffer() {
        let mut buffers = ForceBuffers::new(2);
        buffers.forces[0] = Vector3::new(1.0, 0.0, 0.0);
        buffers.long_range_forces[0] = Vector3::new(0.5, 1.0, 0.0);
        buffers.long_range_forces[1] = Vector3::new(0.0, 0.0, -2.0);

        buffers.fold_long_range();

        assert_eq!(buffers.forces[0], Vector3::new(1.5, 1.0, 0.0));
        assert_eq!(buffers.forces[1], Vector3::new(0.0, 0.0, -2.0));
        assert!(buffers.long_range_forces.iter().all(|f| *f == Vector3::zeros()));
    }

    #[test]
    fn clear_resets_all_accumulators() {
        let mut buffers = ForceBuffers::new(1);
        buffers.forces[0] = Vector3::new(1.0, 2.0, 3.0);
        buffers.energies.coulomb = 4.0;
        buffers.virial = Matrix3::identity();
        buffers.long_range_virial = Matrix3::identity();

        buffers.clear();

        assert_eq!(buffers, ForceBuffers::new(1));
        assert_eq!(buffers.potential_energy(), 0.0);
    }
}
