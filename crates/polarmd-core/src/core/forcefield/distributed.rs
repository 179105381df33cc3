use super::evaluator::{ForceBuffers, ForceError, ForceEvaluator, ForceFlags};
use crate::core::comm::Communicator;
use crate::core::models::pbc::PeriodicBox;
use nalgebra::{Point3, Vector3};

/// Completes the forces of an evaluator that only computes the terms its rank owns.
///
/// After the wrapped evaluation, the direct and long-range force arrays are summed
/// over all ranks in one collective call, so every rank sees the full force on every
/// particle. Energies and virials stay rank-local; the relaxation sums the energy.
pub struct RankSummedForces<E, C> {
    inner: E,
    comm: C,
    scratch: Vec<f64>,
}

impl<E: ForceEvaluator, C: Communicator> RankSummedForces<E, C> {
    pub fn new(inner: E, comm: C) -> Self {
        Self {
            inner,
            comm,
            scratch: Vec::new(),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: ForceEvaluator, C: Communicator> ForceEvaluator for RankSummedForces<E, C> {
    fn compute_forces(
        &mut self,
        positions: &[Point3<f64>],
        pbc: &PeriodicBox,
        step: u64,
        flags: ForceFlags,
        out: &mut ForceBuffers,
    ) -> Result<(), ForceError> {
        self.inner.compute_forces(positions, pbc, step, flags, out)?;
        if self.comm.size() <= 1 {
            return Ok(());
        }

        self.scratch.clear();
        for f in out.forces.iter().chain(out.long_range_forces.iter()) {
            self.scratch.extend_from_slice(f.as_slice());
        }
        self.comm.sum(&mut self.scratch)?;

        let (direct, long_range) = self.scratch.split_at(3 * out.len());
        for (f, c) in out.forces.iter_mut().zip(direct.chunks_exact(3)) {
            *f = Vector3::new(c[0], c[1], c[2]);
        }
        for (f, c) in out.long_range_forces.iter_mut().zip(long_range.chunks_exact(3)) {
            *f = Vector3::new(c[0], c[1], c[2]);
        }
        Ok(())
    }
}
