use super::evaluator::{ForceBuffers, ForceError, ForceEvaluator, ForceFlags};
use super::potentials;
use crate::core::models::pbc::PeriodicBox;
use crate::core::models::topology::Topology;
use nalgebra::{Matrix3, Point3, Vector3};
use std::collections::HashSet;
use std::ops::Range;
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Spring {
    shell: usize,
    nucleus: usize,
    k: f64,
}

#[derive(Debug, Clone, Copy)]
struct PairResult {
    i: usize,
    j: usize,
    energy: f64,
    force: Vector3<f64>,
    r: Vector3<f64>,
    long_range: bool,
}

/// A polarizable core-shell model.
///
/// Each shell is tied to its nuclei by harmonic springs whose stiffnesses add up to
/// `1 / k_1`. All charges feel a uniform external field and interact through Coulomb's
/// law, except shells with their own nuclei and virtual sites with their constructors.
/// Pairs beyond the cutoff are reported as long-range forces with their own virial.
#[derive(Debug, Clone)]
pub struct ShellModel {
    springs: Vec<Spring>,
    charges: Vec<f64>,
    pairs: Vec<(usize, usize)>,
    field: Vector3<f64>,
    cutoff: Option<f64>,
    dielectric: f64,
    coulomb_enabled: bool,
    home: Option<Range<usize>>,
}

impl ShellModel {
    pub fn from_topology(topology: &Topology) -> Self {
        let mut springs = Vec::new();
        let mut excluded: HashSet<(usize, usize)> = HashSet::new();
        let ordered = |a: usize, b: usize| if a < b { (a, b) } else { (b, a) };

        for shell in topology.shells() {
            let k = 1.0 / shell.k_1() / shell.nuclei().len() as f64;
            for &nucleus in shell.nuclei() {
                springs.push(Spring {
                    shell: shell.particle(),
                    nucleus,
                    k,
                });
                excluded.insert(ordered(shell.particle(), nucleus));
            }
        }
        for vs in topology.virtual_sites() {
            excluded.insert(ordered(vs.site, vs.from.0));
            excluded.insert(ordered(vs.site, vs.from.1));
        }

        let charges: Vec<f64> = topology.particles().iter().map(|p| p.charge).collect();
        let charged: Vec<usize> = (0..charges.len()).filter(|&i| charges[i] != 0.0).collect();
        let mut pairs = Vec::new();
        for (a, &i) in charged.iter().enumerate() {
            for &j in &charged[a + 1..] {
                if !excluded.contains(&(i, j)) {
                    pairs.push((i, j));
                }
            }
        }

        Self {
            springs,
            charges,
            pairs,
            field: Vector3::zeros(),
            cutoff: None,
            dielectric: 1.0,
            coulomb_enabled: true,
            home: None,
        }
    }

    /// Uniform external electric field in kJ/(mol·nm·e).
    pub fn with_field(mut self, field: Vector3<f64>) -> Self {
        self.field = field;
        self
    }

    /// Pairs farther apart than `cutoff` are treated as long-range.
    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    pub fn with_dielectric(mut self, dielectric: f64) -> Self {
        self.dielectric = dielectric;
        self
    }

    pub fn without_coulomb(mut self) -> Self {
        self.coulomb_enabled = false;
        self
    }

    /// Computes only the terms owned by `home`: springs whose shell is in the range,
    /// field terms of home particles, and pairs whose lower index is home.
    ///
    /// Forces of owned terms still land on both particles, so the full forces are the
    /// sum over ranks. Wrap the model in
    /// [`RankSummedForces`](super::distributed::RankSummedForces) for coupled systems.
    pub fn with_home_range(mut self, home: Range<usize>) -> Self {
        self.home = Some(home);
        self
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    fn owns(&self, index: usize) -> bool {
        self.home.as_ref().is_none_or(|r| r.contains(&index))
    }

    fn pair_result(
        &self,
        positions: &[Point3<f64>],
        pbc: &PeriodicBox,
        i: usize,
        j: usize,
    ) -> PairResult {
        let r = pbc.dx(&positions[i], &positions[j]);
        let (energy, force) =
            potentials::coulomb(&r, self.charges[i], self.charges[j], self.dielectric);
        let long_range = self.cutoff.is_some_and(|rc| r.norm() >= rc);
        PairResult {
            i,
            j,
            energy,
            force,
            r,
            long_range,
        }
    }

    fn compute_pairs(&self, positions: &[Point3<f64>], pbc: &PeriodicBox) -> Vec<PairResult> {
        #[cfg(not(feature = "parallel"))]
        let iterator = self.pairs.iter();

        #[cfg(feature = "parallel")]
        let iterator = self.pairs.par_iter();

        iterator
            .filter(|&&(i, _)| self.owns(i))
            .map(|&(i, j)| self.pair_result(positions, pbc, i, j))
            .collect()
    }
}

impl ForceEvaluator for ShellModel {
    fn compute_forces(
        &mut self,
        positions: &[Point3<f64>],
        pbc: &PeriodicBox,
        step: u64,
        flags: ForceFlags,
        out: &mut ForceBuffers,
    ) -> Result<(), ForceError> {
        if out.len() != positions.len() || self.charges.len() != positions.len() {
            return Err(ForceError::SizeMismatch {
                expected: positions.len(),
                found: out.len().min(self.charges.len()),
            });
        }
        out.clear();

        for spring in &self.springs {
            if !self.owns(spring.shell) {
                continue;
            }
            let d = pbc.dx(&positions[spring.shell], &positions[spring.nucleus]);
            let (energy, force) = potentials::harmonic(&d, spring.k);
            out.forces[spring.shell] += force;
            out.forces[spring.nucleus] -= force;
            if flags.compute_energy {
                out.energies.polarization += energy;
            }
            if flags.compute_virial {
                out.virial -= 0.5 * d * force.transpose();
            }
        }

        if self.field != Vector3::zeros() {
            for (i, &q) in self.charges.iter().enumerate() {
                if q == 0.0 || !self.owns(i) {
                    continue;
                }
                out.forces[i] += q * self.field;
                if flags.compute_energy {
                    out.energies.external -= q * self.field.dot(&positions[i].coords);
                }
            }
        }

        if self.coulomb_enabled {
            for pair in self.compute_pairs(positions, pbc) {
                let (forces, energy, virial) = if pair.long_range {
                    (
                        &mut out.long_range_forces,
                        &mut out.energies.long_range,
                        &mut out.long_range_virial,
                    )
                } else {
                    (&mut out.forces, &mut out.energies.coulomb, &mut out.virial)
                };
                forces[pair.i] += pair.force;
                forces[pair.j] -= pair.force;
                if flags.compute_energy {
                    *energy += pair.energy;
                }
                if flags.compute_virial {
                    let pair_virial: Matrix3<f64> = -0.5 * pair.r * pair.force.transpose();
                    *virial += pair_virial;
                }
            }
        }

        if let Some(index) = out
            .forces
            .iter()
            .chain(out.long_range_forces.iter())
            .position(|f| !f.iter().all(|c| c.is_finite()))
        {
            return Err(ForceError::NonFinite {
                index: index % positions.len(),
            });
        }

        trace!(
            step,
            epot = out.potential_energy(),
            "Core-shell model evaluated."
        );
        Ok(())
    }
}
