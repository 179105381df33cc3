use crate::core::models::pbc::PeriodicBox;
use nalgebra::{Point3, Vector3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("Constraint solver did not converge within {iterations} iterations")]
    DidNotConverge { iterations: usize },

    #[error("Constraint between {i} and {j} is degenerate (trial and reference bonds are orthogonal)")]
    Degenerate { i: usize, j: usize },

    #[error("Constrained particle {index} has no mass")]
    Massless { index: usize },

    #[error("Array holds {found} entries but the solver was built for {expected}")]
    SizeMismatch { expected: usize, found: usize },
}

/// Projects configurations and derivative fields onto the constraint manifold.
///
/// All slices are full-system arrays indexed like the topology.
pub trait ConstraintSolver {
    /// Moves `trial` so that every constraint is satisfied, using the bond vectors of
    /// `reference` as the directions of the corrections. Flexible constraints keep the
    /// length they have in `reference`.
    fn constrain_positions(
        &mut self,
        reference: &[Point3<f64>],
        trial: &mut [Point3<f64>],
        pbc: &PeriodicBox,
    ) -> Result<(), ConstraintError>;

    /// Writes into `correction` the change that removes from `derivative` its
    /// components along the flexible constraint directions of `reference`.
    /// Rows of particles without flexible constraints are set to zero.
    fn project_flexible(
        &mut self,
        reference: &[Point3<f64>],
        derivative: &[Vector3<f64>],
        correction: &mut [Vector3<f64>],
        pbc: &PeriodicBox,
    ) -> Result<(), ConstraintError>;
}
