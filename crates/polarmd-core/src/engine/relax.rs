use super::buffers::{Slot, SlotArena, SlotData};
use super::config::RelaxConfig;
use super::directional::DirectionalEstimator;
use super::error::EngineError;
use super::predictor::ShellPredictor;
use super::rms::{ForceMeasure, reduce_force_measure};
use super::statistics::RelaxStatistics;
use crate::core::comm::Communicator;
use crate::core::comm::exchange::share_home_rows;
use crate::core::comm::single::SingleRank;
use crate::core::constraints::solver::ConstraintSolver;
use crate::core::forcefield::evaluator::{ForceEvaluator, ForceFlags};
use crate::core::forcefield::term::EnergyTerms;
use crate::core::models::pbc::PeriodicBox;
use crate::core::models::state::MdState;
use crate::core::models::topology::Topology;
use crate::core::vsites::VirtualSiteBuilder;
use nalgebra::{Matrix3, Point3, Vector3};
use std::ops::Range;
use tracing::{debug, instrument, trace, warn};

/// The collaborators a relaxation calls into.
pub struct Services<'s> {
    pub forces: &'s mut dyn ForceEvaluator,
    /// Required when the topology has flexible constraints.
    pub constraints: Option<&'s mut dyn ConstraintSolver>,
    pub virtual_sites: Option<&'s dyn VirtualSiteBuilder>,
}

impl<'s> Services<'s> {
    pub fn new(forces: &'s mut dyn ForceEvaluator) -> Self {
        Self {
            forces,
            constraints: None,
            virtual_sites: None,
        }
    }

    pub fn with_constraints(mut self, constraints: &'s mut dyn ConstraintSolver) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_virtual_sites(mut self, virtual_sites: &'s dyn VirtualSiteBuilder) -> Self {
        self.virtual_sites = Some(virtual_sites);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Converged,
    /// The step size fell below its floor without finding a lower RMS force.
    Stagnated,
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelaxOutcome {
    pub converged: bool,
    pub termination: Termination,
    /// Number of trial configurations evaluated.
    pub iterations: usize,
    pub rms_force: f64,
    /// Potential energy of the accepted configuration, summed over all ranks.
    pub potential_energy: f64,
    /// Rank-local energy terms of the accepted configuration.
    pub energies: EnergyTerms,
    pub virial: Matrix3<f64>,
    pub long_range_virial: Matrix3<f64>,
}

#[derive(Debug, Clone, Copy)]
struct ShellRef {
    particle: usize,
    k_1: f64,
}

/// Per-run state of the shell and flexible-constraint relaxation.
///
/// All buffers are sized at construction; [`RelaxationContext::relax`] is called
/// once per MD step with full-system arrays and updates only the rows in the
/// rank's home range.
pub struct RelaxationContext<C: Communicator> {
    config: RelaxConfig,
    comm: C,
    home: Range<usize>,
    particle_count: usize,
    total_shells: usize,
    n_dir: usize,
    shells: Vec<ShellRef>,
    shell_indices: Vec<usize>,
    vsite_indices: Vec<usize>,
    arena: SlotArena,
    exchange: Vec<f64>,
    predictor: Option<ShellPredictor>,
    directional: Option<DirectionalEstimator>,
    /// Cleared by the first call to [`RelaxationContext::relax`].
    first_call: bool,
    initialized: bool,
    statistics: RelaxStatistics,
}

impl RelaxationContext<SingleRank> {
    /// A context owning every particle of `topology`.
    pub fn serial(topology: &Topology, config: RelaxConfig) -> Result<Self, EngineError> {
        Self::new(topology, config, SingleRank, 0..topology.particle_count())
    }
}

impl<C: Communicator> RelaxationContext<C> {
    pub fn new(
        topology: &Topology,
        config: RelaxConfig,
        comm: C,
        home: Range<usize>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        topology.validate()?;
        let count = topology.particle_count();
        if home.start > home.end || home.end > count {
            return Err(EngineError::InvalidHomeRange {
                start: home.start,
                end: home.end,
                count,
            });
        }

        let shells: Vec<ShellRef> = topology
            .shells()
            .iter()
            .filter(|s| home.contains(&s.particle()))
            .map(|s| ShellRef {
                particle: s.particle(),
                k_1: s.k_1(),
            })
            .collect();
        let n_dir = topology.flexible_constraint_count();

        let predictor = if config.predict_shells && !shells.is_empty() {
            Some(ShellPredictor::new(topology, &home)?)
        } else {
            None
        };
        let directional = if n_dir > 0 {
            Some(DirectionalEstimator::new(
                topology,
                config.time_step,
                home.clone(),
            )?)
        } else {
            None
        };

        debug!(
            rank = comm.rank(),
            home_start = home.start,
            home_end = home.end,
            shells = shells.len(),
            flexible_constraints = n_dir,
            "Relaxation context created."
        );

        Ok(Self {
            comm,
            particle_count: count,
            total_shells: topology.shells().len(),
            n_dir,
            shell_indices: shells.iter().map(|s| s.particle).collect(),
            shells,
            vsite_indices: topology.virtual_sites().iter().map(|v| v.site).collect(),
            arena: SlotArena::new(count),
            exchange: Vec::with_capacity(4 * count),
            predictor,
            directional,
            first_call: true,
            initialized: false,
            statistics: RelaxStatistics::default(),
            home,
            config,
        })
    }

    pub fn config(&self) -> &RelaxConfig {
        &self.config
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn home(&self) -> Range<usize> {
        self.home.clone()
    }

    pub fn statistics(&self) -> RelaxStatistics {
        self.statistics
    }

    /// Makes the next step place shells from scratch, as on the first step.
    pub fn request_reinit(&mut self) {
        self.initialized = false;
    }

    fn check_len(&self, what: &'static str, found: usize) -> Result<(), EngineError> {
        if found == self.particle_count {
            Ok(())
        } else {
            Err(EngineError::SizeMismatch {
                what,
                expected: self.particle_count,
                found,
            })
        }
    }

    /// Relaxes shells and flexible constraints for one MD step.
    ///
    /// On return `forces_out` holds the forces of the accepted configuration, and
    /// `state` its shell positions. With flexible constraints the atom positions are
    /// re-projected and the velocities replaced by the displacement over the step.
    /// Non-convergence is not an error; the lowest-force configuration is kept.
    #[instrument(skip_all, name = "relax_shells", fields(step = step))]
    pub fn relax(
        &mut self,
        step: u64,
        state: &mut MdState,
        forces_out: &mut [Vector3<f64>],
        services: Services<'_>,
    ) -> Result<RelaxOutcome, EngineError> {
        self.check_len("Position array", state.positions.len())?;
        self.check_len("Velocity array", state.velocities.len())?;
        self.check_len("Force array", forces_out.len())?;

        let Services {
            forces: evaluator,
            mut constraints,
            virtual_sites,
        } = services;
        if self.directional.is_some() && constraints.is_none() {
            return Err(EngineError::MissingService("constraint solver"));
        }
        let pbc = state.pbc;
        let first_call = std::mem::replace(&mut self.first_call, false);
        let init = !self.initialized;
        self.initialized = true;

        if let Some(estimator) = self.directional.as_mut() {
            estimator.prepare_step(&state.positions, &state.velocities);
        }
        if let Some(predictor) = &self.predictor {
            // A continuation run trusts the shell positions it starts from, but
            // a requested reinit still places them from scratch.
            if !(first_call && self.config.continuation) {
                predictor.predict(
                    &mut state.positions,
                    &state.velocities,
                    &pbc,
                    self.config.time_step,
                    init,
                );
            }
        }

        let flags = ForceFlags {
            new_pair_list: true,
            ..ForceFlags::default()
        };
        let current = self.arena.get_mut(Slot::Current);
        current.positions.copy_from_slice(&state.positions);
        share_home_rows(&self.comm, &self.home, &mut current.positions, &mut self.exchange)?;
        evaluate(&mut *evaluator, virtual_sites, current, &pbc, step, flags)?;

        let current = self.arena.current();
        let sf_dir = directional_measure(
            self.directional.as_mut(),
            &mut constraints,
            current,
            &state.positions,
            &pbc,
        )?;
        let mut best = reduce_force_measure(
            &self.comm,
            &current.forces.forces,
            &self.shell_indices,
            sf_dir,
            self.n_dir,
            current.forces.potential_energy(),
        )?;
        let (current, trial) = self.arena.split_mut();
        trial.positions.copy_from_slice(&current.positions);

        if self.total_shells == 0 && self.n_dir == 0 {
            return self.finish(
                step,
                state,
                forces_out,
                &mut constraints,
                best,
                Termination::Converged,
                0,
            );
        }

        let tolerance = self.config.force_tolerance;
        let mut converged = best.rms < tolerance;
        let mut termination = Termination::MaxIterations;
        let mut step_size = self.config.initial_step;
        let mut iterations = 0;

        while !converged && iterations < self.config.max_iterations {
            let (current, trial) = self.arena.split_mut();
            if let Some(vsites) = virtual_sites {
                vsites.construct(&mut current.positions, &pbc);
                for &site in &self.vsite_indices {
                    trial.positions[site] = current.positions[site];
                }
            }

            if self.directional.is_some() {
                directional_measure(
                    self.directional.as_mut(),
                    &mut constraints,
                    current,
                    &state.positions,
                    &pbc,
                )?;
                if let Some(estimator) = &self.directional {
                    estimator.displace(
                        &current.positions,
                        &mut trial.positions,
                        self.config.flexcon_step_size,
                    );
                }
            }

            for shell in &self.shells {
                let s = shell.particle;
                trial.positions[s] =
                    current.positions[s] + step_size * shell.k_1 * current.forces.forces[s];
            }
            share_home_rows(&self.comm, &self.home, &mut trial.positions, &mut self.exchange)?;

            evaluate(
                &mut *evaluator,
                virtual_sites,
                trial,
                &pbc,
                step,
                ForceFlags::default(),
            )?;
            let sf_dir = directional_measure(
                self.directional.as_mut(),
                &mut constraints,
                trial,
                &state.positions,
                &pbc,
            )?;
            let measure = reduce_force_measure(
                &self.comm,
                &trial.forces.forces,
                &self.shell_indices,
                sf_dir,
                self.n_dir,
                trial.forces.potential_energy(),
            )?;
            iterations += 1;
            converged = measure.rms < tolerance;

            trace!(
                iteration = iterations,
                rms_trial = measure.rms,
                rms_current = best.rms,
                step_size,
                "Trial configuration evaluated."
            );

            if measure.rms < best.rms {
                self.arena.swap();
                best = measure;
                step_size = self.config.initial_step;
            } else {
                step_size *= self.config.step_shrink;
                if step_size < self.config.min_step {
                    termination = Termination::Stagnated;
                    break;
                }
            }
        }
        if converged {
            termination = Termination::Converged;
        }

        self.finish(
            step,
            state,
            forces_out,
            &mut constraints,
            best,
            termination,
            iterations,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &mut self,
        step: u64,
        state: &mut MdState,
        forces_out: &mut [Vector3<f64>],
        constraints: &mut Option<&mut dyn ConstraintSolver>,
        best: ForceMeasure,
        termination: Termination,
        iterations: usize,
    ) -> Result<RelaxOutcome, EngineError> {
        let converged = termination == Termination::Converged;
        let current = self.arena.current();

        forces_out.copy_from_slice(&current.forces.forces);
        state.positions[self.home.clone()].copy_from_slice(&current.positions[self.home.clone()]);

        if let Some(estimator) = &self.directional {
            let solver = constraints
                .as_deref_mut()
                .ok_or(EngineError::MissingService("constraint solver"))?;
            solver.constrain_positions(&current.positions, &mut state.positions, &state.pbc)?;
            estimator.update_velocities(&state.positions, &mut state.velocities, &state.pbc);
        }

        if !converged {
            if self.comm.is_master() {
                warn!(
                    step,
                    iterations,
                    rms_force = best.rms,
                    tolerance = self.config.force_tolerance,
                    ?termination,
                    "Shell relaxation did not converge; continuing with the lowest-force configuration."
                );
            }
            for &s in &self.shell_indices {
                let force = current.forces.forces[s].norm();
                if force > self.config.force_tolerance {
                    debug!(step, shell = s, force, "Large residual force on shell.");
                }
            }
        }

        self.statistics.record(iterations + 1, converged);

        Ok(RelaxOutcome {
            converged,
            termination,
            iterations,
            rms_force: best.rms,
            potential_energy: best.potential_energy,
            energies: current.forces.energies,
            virial: current.forces.virial,
            long_range_virial: current.forces.long_range_virial,
        })
    }
}

/// Evaluates the configuration held by `slot`, then moves virtual-site forces
/// onto the constructing particles and folds the long-range part in.
fn evaluate(
    evaluator: &mut dyn ForceEvaluator,
    virtual_sites: Option<&dyn VirtualSiteBuilder>,
    slot: &mut SlotData,
    pbc: &PeriodicBox,
    step: u64,
    flags: ForceFlags,
) -> Result<(), EngineError> {
    slot.forces.clear();
    evaluator.compute_forces(&slot.positions, pbc, step, flags, &mut slot.forces)?;
    if let Some(vsites) = virtual_sites {
        vsites.spread_forces(&slot.positions, &mut slot.forces.long_range_forces, pbc);
    }
    slot.forces.fold_long_range();
    if let Some(vsites) = virtual_sites {
        // Direct-space forces on the sites are left in place by the evaluator.
        vsites.spread_forces(&slot.positions, &mut slot.forces.forces, pbc);
    }
    Ok(())
}

fn directional_measure(
    directional: Option<&mut DirectionalEstimator>,
    constraints: &mut Option<&mut dyn ConstraintSolver>,
    slot: &SlotData,
    x_init: &[Point3<f64>],
    pbc: &PeriodicBox,
) -> Result<f64, EngineError> {
    let Some(estimator) = directional else {
        return Ok(0.0);
    };
    let solver = constraints
        .as_deref_mut()
        .ok_or(EngineError::MissingService("constraint solver"))?;
    estimator.estimate(&slot.positions, x_init, &slot.forces.forces, pbc, solver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comm::thread_group::ThreadGroup;
    use crate::core::constraints::shake::ShakeSolver;
    use crate::core::forcefield::distributed::RankSummedForces;
    use crate::core::forcefield::evaluator::{ForceBuffers, ForceError};
    use crate::core::forcefield::shell_model::ShellModel;
    use crate::core::models::particle::{Particle, ParticleKind};
    use crate::core::models::shell::Shell;
    use crate::core::models::topology::{Constraint, VirtualSiteDef};
    use crate::core::vsites::LinearVirtualSites;
    use crate::engine::config::RelaxConfigBuilder;
    use std::thread;

    const TOLERANCE: f64 = 1e-9;

    /// Harmonic tethers of single particles to fixed anchors.
    #[derive(Default)]
    struct Tethers {
        springs: Vec<(usize, Point3<f64>, f64)>,
        pairs: Vec<(usize, usize, f64, f64)>,
        calls: Vec<Vec<Point3<f64>>>,
    }

    impl Tethers {
        fn tether(mut self, particle: usize, anchor: Point3<f64>, k: f64) -> Self {
            self.springs.push((particle, anchor, k));
            self
        }

        fn bond(mut self, i: usize, j: usize, length: f64, k: f64) -> Self {
            self.pairs.push((i, j, length, k));
            self
        }
    }

    impl ForceEvaluator for Tethers {
        fn compute_forces(
            &mut self,
            positions: &[Point3<f64>],
            _pbc: &PeriodicBox,
            _step: u64,
            _flags: ForceFlags,
            out: &mut ForceBuffers,
        ) -> Result<(), ForceError> {
            self.calls.push(positions.to_vec());
            for &(i, anchor, k) in &self.springs {
                let d = positions[i] - anchor;
                out.forces[i] -= k * d;
                out.energies.polarization += 0.5 * k * d.norm_squared();
            }
            for &(i, j, length, k) in &self.pairs {
                let r = positions[i] - positions[j];
                let stretch = r.norm() - length;
                let f = -k * stretch * r.normalize();
                out.forces[i] += f;
                out.forces[j] -= f;
                out.energies.polarization += 0.5 * k * stretch * stretch;
            }
            Ok(())
        }
    }

    /// Records the forces of every evaluation of the wrapped model.
    struct Recording<E> {
        inner: E,
        forces: Vec<Vec<Vector3<f64>>>,
    }

    impl<E: ForceEvaluator> ForceEvaluator for Recording<E> {
        fn compute_forces(
            &mut self,
            positions: &[Point3<f64>],
            pbc: &PeriodicBox,
            step: u64,
            flags: ForceFlags,
            out: &mut ForceBuffers,
        ) -> Result<(), ForceError> {
            self.inner.compute_forces(positions, pbc, step, flags, out)?;
            self.forces.push(out.forces.clone());
            Ok(())
        }
    }

    fn config(tolerance: f64, max_iterations: usize) -> RelaxConfig {
        RelaxConfigBuilder::new()
            .force_tolerance(tolerance)
            .max_iterations(max_iterations)
            .time_step(0.01)
            .predict_shells(false)
            .build()
            .unwrap()
    }

    fn core_and_shell(k_1: f64) -> Topology {
        Topology::new(vec![
            Particle::new("CORE", 10.0, ParticleKind::Atom),
            Particle::new("SHELL", 0.0, ParticleKind::Shell),
        ])
        .with_shells(vec![Shell::new(1, &[0], k_1).unwrap()])
    }

    fn relax_once(
        context: &mut RelaxationContext<SingleRank>,
        state: &mut MdState,
        evaluator: &mut dyn ForceEvaluator,
    ) -> (RelaxOutcome, Vec<Vector3<f64>>) {
        let mut forces = vec![Vector3::zeros(); state.len()];
        let outcome = context
            .relax(0, state, &mut forces, Services::new(evaluator))
            .unwrap();
        (outcome, forces)
    }

    #[test]
    fn system_without_shells_or_flexible_constraints_is_trivially_converged() {
        let topology = Topology::new(vec![Particle::new("A", 1.0, ParticleKind::Atom)]);
        let mut context = RelaxationContext::serial(&topology, config(1e-3, 10)).unwrap();
        let mut state = MdState::new(vec![Point3::new(1.0, 0.0, 0.0)], PeriodicBox::None);
        let mut evaluator = Tethers::default().tether(0, Point3::origin(), 2.0);

        let (outcome, forces) = relax_once(&mut context, &mut state, &mut evaluator);

        assert!(outcome.converged);
        assert_eq!(outcome.termination, Termination::Converged);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.rms_force, 0.0);
        assert!((outcome.potential_energy - 1.0).abs() < TOLERANCE);
        assert_eq!(forces[0], Vector3::new(-2.0, 0.0, 0.0));
        assert_eq!(evaluator.calls.len(), 1);
    }

    #[test]
    fn empty_system_is_trivially_converged() {
        let topology = Topology::default();
        let mut context = RelaxationContext::serial(&topology, config(1e-3, 10)).unwrap();
        let mut state = MdState::default();
        let mut evaluator = Tethers::default();

        let (outcome, forces) = relax_once(&mut context, &mut state, &mut evaluator);

        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.rms_force, 0.0);
        assert!(forces.is_empty());
    }

    #[test]
    fn first_trial_moves_shell_by_k_1_times_force() {
        let mut context =
            RelaxationContext::serial(&core_and_shell(2.0), config(1e-3, 50)).unwrap();
        let mut state = MdState::new(
            vec![Point3::origin(), Point3::new(-4.0, 0.0, 0.0)],
            PeriodicBox::None,
        );
        // Spring of 0.25 gives a force of (1, 0, 0) at the start.
        let mut evaluator = Tethers::default().tether(1, Point3::origin(), 0.25);

        let (outcome, _) = relax_once(&mut context, &mut state, &mut evaluator);

        assert!((evaluator.calls[1][1] - Point3::new(-2.0, 0.0, 0.0)).norm() < TOLERANCE);
        assert_eq!(evaluator.calls[1][0], Point3::origin());
        // Every trial halves the force: 2^-10 is the first value below 1e-3.
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 10);
        assert!(outcome.rms_force < 1e-3);
        assert!((state.positions[1].x + 4.0 / 1024.0).abs() < TOLERANCE);
    }

    #[test]
    fn iteration_budget_keeps_best_configuration() {
        let mut context =
            RelaxationContext::serial(&core_and_shell(2.0), config(1e-3, 3)).unwrap();
        let mut state = MdState::new(
            vec![Point3::origin(), Point3::new(-4.0, 0.0, 0.0)],
            PeriodicBox::None,
        );
        let mut evaluator = Tethers::default().tether(1, Point3::origin(), 0.25);

        let (outcome, forces) = relax_once(&mut context, &mut state, &mut evaluator);

        assert!(!outcome.converged);
        assert_eq!(outcome.termination, Termination::MaxIterations);
        assert_eq!(outcome.iterations, 3);
        assert!((state.positions[1].x + 0.5).abs() < TOLERANCE);
        assert!((forces[1].x - 0.125).abs() < TOLERANCE);
        assert!((outcome.rms_force - 0.125).abs() < TOLERANCE);
    }

    #[test]
    fn overshooting_steps_stagnate_after_twenty_one_rejections() {
        let mut context =
            RelaxationContext::serial(&core_and_shell(2.0), config(1e-6, 100)).unwrap();
        let start = Point3::new(0.1, 0.0, 0.0);
        let mut state = MdState::new(vec![Point3::origin(), start], PeriodicBox::None);
        // k_1 * k = 200: every step of at least 0.01 overshoots the minimum.
        let mut evaluator = Tethers::default().tether(1, Point3::origin(), 100.0);

        let (outcome, forces) = relax_once(&mut context, &mut state, &mut evaluator);

        assert!(!outcome.converged);
        assert_eq!(outcome.termination, Termination::Stagnated);
        assert_eq!(outcome.iterations, 21);
        assert_eq!(state.positions[1], start);
        assert!((forces[1].x + 10.0).abs() < TOLERANCE);
        assert_eq!(context.statistics().force_evaluations, 22);
    }

    #[test]
    fn accepted_configuration_has_the_lowest_rms_force_seen() {
        let topology = Topology::new(vec![
            Particle::new("C0", 10.0, ParticleKind::Atom).with_charge(1.0),
            Particle::new("S0", 0.0, ParticleKind::Shell).with_charge(-1.0),
            Particle::new("C1", 10.0, ParticleKind::Atom).with_charge(1.0),
            Particle::new("S1", 0.0, ParticleKind::Shell).with_charge(-1.0),
        ])
        .with_shells(vec![
            Shell::new(1, &[0], 0.002).unwrap(),
            Shell::new(3, &[2], 0.004).unwrap(),
        ]);
        let mut evaluator = Recording {
            inner: ShellModel::from_topology(&topology).with_field(Vector3::new(5.0, 0.0, 0.0)),
            forces: Vec::new(),
        };
        let mut context = RelaxationContext::serial(&topology, config(1e-4, 200)).unwrap();
        let mut state = MdState::new(
            vec![
                Point3::origin(),
                Point3::new(0.01, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(2.0, 0.02, 0.0),
            ],
            PeriodicBox::None,
        );

        let (outcome, forces) = relax_once(&mut context, &mut state, &mut evaluator);

        let rms = |f: &Vec<Vector3<f64>>| {
            ((f[1].norm_squared() + f[3].norm_squared()) / 2.0).sqrt()
        };
        let lowest = evaluator.forces.iter().map(rms).fold(f64::INFINITY, f64::min);
        assert!((outcome.rms_force - lowest).abs() < 1e-12);
        assert!(outcome.rms_force <= rms(&evaluator.forces[0]));
        assert_eq!(evaluator.forces.len(), outcome.iterations + 1);

        // The returned forces belong to the returned positions.
        let mut check =
            ShellModel::from_topology(&topology).with_field(Vector3::new(5.0, 0.0, 0.0));
        let mut out = ForceBuffers::new(4);
        check
            .compute_forces(&state.positions, &state.pbc, 0, ForceFlags::default(), &mut out)
            .unwrap();
        for (a, b) in out.forces.iter().zip(forces.iter()) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn first_step_places_shells_on_their_nuclei() {
        let topology = core_and_shell(0.5);
        let relax_config = RelaxConfigBuilder::new()
            .force_tolerance(1e-3)
            .max_iterations(10)
            .time_step(0.01)
            .build()
            .unwrap();
        let mut context = RelaxationContext::serial(&topology, relax_config).unwrap();
        let mut state = MdState::new(
            vec![Point3::new(1.0, 1.0, 1.0), Point3::new(5.0, 5.0, 5.0)],
            PeriodicBox::None,
        );
        let mut evaluator = Tethers::default();

        relax_once(&mut context, &mut state, &mut evaluator);

        assert_eq!(evaluator.calls[0][1], Point3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn continuation_run_keeps_shells_on_first_step_then_predicts() {
        let topology = core_and_shell(0.5);
        let relax_config = RelaxConfigBuilder::new()
            .force_tolerance(1e-3)
            .max_iterations(10)
            .time_step(0.5)
            .continuation(true)
            .build()
            .unwrap();
        let mut context = RelaxationContext::serial(&topology, relax_config).unwrap();
        let mut state = MdState::new(
            vec![Point3::origin(), Point3::new(0.0, 3.0, 0.0)],
            PeriodicBox::None,
        )
        .with_velocities(vec![Vector3::new(2.0, 0.0, 0.0), Vector3::zeros()]);
        let mut evaluator = Tethers::default();

        relax_once(&mut context, &mut state, &mut evaluator);
        assert_eq!(evaluator.calls[0][1], Point3::new(0.0, 3.0, 0.0));

        relax_once(&mut context, &mut state, &mut evaluator);
        assert_eq!(evaluator.calls[1][1], Point3::new(1.0, 3.0, 0.0));
        assert_eq!(context.statistics().steps, 2);
    }

    #[test]
    fn reinit_places_shells_even_on_a_continuation_run() {
        let topology = core_and_shell(0.5);
        let relax_config = RelaxConfigBuilder::new()
            .force_tolerance(1e-3)
            .max_iterations(10)
            .time_step(0.01)
            .continuation(true)
            .build()
            .unwrap();
        let mut context = RelaxationContext::serial(&topology, relax_config).unwrap();
        let mut state = MdState::new(
            vec![Point3::origin(), Point3::new(0.0, 3.0, 0.0)],
            PeriodicBox::None,
        );
        let mut evaluator = Tethers::default();

        relax_once(&mut context, &mut state, &mut evaluator);
        assert_eq!(evaluator.calls[0][1], Point3::new(0.0, 3.0, 0.0));

        context.request_reinit();
        relax_once(&mut context, &mut state, &mut evaluator);
        assert_eq!(evaluator.calls[1][1], Point3::origin());
    }

    #[test]
    fn accepted_trial_restores_the_initial_step_size() {
        let mut context =
            RelaxationContext::serial(&core_and_shell(1.0), config(1e-9, 3)).unwrap();
        let mut state = MdState::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)],
            PeriodicBox::None,
        );
        // k_1 * k = 2.2: a full step overshoots, a step of 0.8 does not.
        let mut evaluator = Tethers::default().tether(1, Point3::origin(), 2.2);

        let (outcome, _) = relax_once(&mut context, &mut state, &mut evaluator);

        assert_eq!(outcome.iterations, 3);
        let trial_x: Vec<f64> = evaluator.calls[1..].iter().map(|c| c[1].x).collect();
        // Rejected at step 1.0, accepted at 0.8.
        assert!((trial_x[0] + 1.2).abs() < TOLERANCE);
        assert!((trial_x[1] + 0.76).abs() < TOLERANCE);
        // Back at step 1.0: -0.76 + 1.0 * 1.672.
        assert!((trial_x[2] - 0.912).abs() < TOLERANCE);
    }

    #[test]
    fn flexible_constraint_relaxes_towards_zero_directional_force() {
        let topology = Topology::new(vec![
            Particle::new("A", 1.0, ParticleKind::Atom),
            Particle::new("B", 1.0, ParticleKind::Atom),
        ])
        .with_constraints(vec![Constraint::flexible(0, 1)]);
        let relax_config = RelaxConfigBuilder::new()
            .force_tolerance(1e-3)
            .max_iterations(20)
            .time_step(0.01)
            .flexcon_step_size(0.05)
            .build()
            .unwrap();
        let mut context = RelaxationContext::serial(&topology, relax_config).unwrap();
        let mut solver = ShakeSolver::from_topology(&topology).unwrap();
        let mut state = MdState::new(
            vec![Point3::origin(), Point3::new(1.2, 0.0, 0.0)],
            PeriodicBox::None,
        );
        let mut evaluator = Tethers::default().bond(0, 1, 1.0, 10.0);
        let mut forces = vec![Vector3::zeros(); 2];

        let outcome = context
            .relax(
                0,
                &mut state,
                &mut forces,
                Services::new(&mut evaluator).with_constraints(&mut solver),
            )
            .unwrap();

        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 1);
        let length = (state.positions[1] - state.positions[0]).norm();
        assert!((length - 1.0).abs() < 1e-6);
        assert!((state.velocities[0].x - 10.0).abs() < 1e-3);
        assert!((state.velocities[1].x + 10.0).abs() < 1e-3);
    }

    #[test]
    fn flexible_constraints_require_a_constraint_solver() {
        let topology = Topology::new(vec![
            Particle::new("A", 1.0, ParticleKind::Atom),
            Particle::new("B", 1.0, ParticleKind::Atom),
        ])
        .with_constraints(vec![Constraint::flexible(0, 1)]);
        let mut context = RelaxationContext::serial(&topology, config(1e-3, 5)).unwrap();
        let mut state = MdState::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)],
            PeriodicBox::None,
        );
        let mut evaluator = Tethers::default();
        let mut forces = vec![Vector3::zeros(); 2];

        let result = context.relax(0, &mut state, &mut forces, Services::new(&mut evaluator));

        assert!(matches!(
            result,
            Err(EngineError::MissingService("constraint solver"))
        ));
    }

    #[test]
    fn massless_atom_in_flexible_constraint_is_rejected_at_construction() {
        let topology = Topology::new(vec![
            Particle::new("A", 0.0, ParticleKind::Atom),
            Particle::new("B", 1.0, ParticleKind::Atom),
        ])
        .with_constraints(vec![Constraint::flexible(0, 1)]);
        let result = RelaxationContext::serial(&topology, config(1e-3, 5));
        assert!(matches!(
            result,
            Err(EngineError::NonPositiveMass { index: 0, .. })
        ));
    }

    #[test]
    fn virtual_site_forces_are_moved_onto_constructors() {
        let topology = Topology::new(vec![
            Particle::new("A", 10.0, ParticleKind::Atom).with_charge(0.1),
            Particle::new("B", 10.0, ParticleKind::Atom),
            Particle::new("M", 0.0, ParticleKind::VirtualSite).with_charge(0.1),
            Particle::new("A_S", 0.0, ParticleKind::Shell).with_charge(-0.1),
        ])
        .with_shells(vec![Shell::new(3, &[0], 0.01).unwrap()])
        .with_virtual_sites(vec![VirtualSiteDef {
            site: 2,
            from: (0, 1),
            weight: 0.5,
        }]);
        let vsites = LinearVirtualSites::from_topology(&topology);
        let mut model = ShellModel::from_topology(&topology).with_cutoff(0.1);
        let mut context = RelaxationContext::serial(&topology, config(1e-3, 100)).unwrap();
        let mut state = MdState::new(
            vec![
                Point3::origin(),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.5, 0.0, 0.0),
                Point3::new(0.01, 0.0, 0.0),
            ],
            PeriodicBox::None,
        );
        let mut forces = vec![Vector3::zeros(); 4];

        let outcome = context
            .relax(
                0,
                &mut state,
                &mut forces,
                Services::new(&mut model).with_virtual_sites(&vsites),
            )
            .unwrap();

        assert!(outcome.converged);
        assert!(outcome.iterations > 0);
        assert_eq!(forces[2], Vector3::zeros());
        assert!(forces[1].norm() > 0.0);
        let net: Vector3<f64> = forces.iter().sum();
        assert!(net.norm() < 1e-9);
        assert!((state.positions[2] - Point3::new(0.5, 0.0, 0.0)).norm() < TOLERANCE);
    }

    #[test]
    fn rebuilt_virtual_sites_are_carried_into_the_trial() {
        let topology = Topology::new(vec![
            Particle::new("A", 10.0, ParticleKind::Atom),
            Particle::new("B", 10.0, ParticleKind::Atom),
            Particle::new("M", 0.0, ParticleKind::VirtualSite),
            Particle::new("A_S", 0.0, ParticleKind::Shell),
        ])
        .with_shells(vec![Shell::new(3, &[0], 2.0).unwrap()])
        .with_virtual_sites(vec![VirtualSiteDef {
            site: 2,
            from: (0, 1),
            weight: 0.5,
        }]);
        let vsites = LinearVirtualSites::from_topology(&topology);
        let mut evaluator = Tethers::default().tether(3, Point3::origin(), 0.25);
        let mut context = RelaxationContext::serial(&topology, config(1e-3, 50)).unwrap();
        let mut state = MdState::new(
            vec![
                Point3::origin(),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.5, 0.7, 0.0),
                Point3::new(-1.0, 0.0, 0.0),
            ],
            PeriodicBox::None,
        );
        let mut forces = vec![Vector3::zeros(); 4];

        let outcome = context
            .relax(
                0,
                &mut state,
                &mut forces,
                Services::new(&mut evaluator).with_virtual_sites(&vsites),
            )
            .unwrap();

        assert!(outcome.converged);
        let (initial, first_trial) = (&evaluator.calls[0], &evaluator.calls[1]);
        assert_eq!(first_trial[0], initial[0]);
        assert_eq!(first_trial[1], initial[1]);
        assert_eq!(first_trial[2], Point3::new(0.5, 0.0, 0.0));
        assert!((first_trial[3].x + 0.5).abs() < TOLERANCE);
        assert_eq!(state.positions[2], Point3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn ranks_reach_identical_decisions() {
        let topology = Topology::new(vec![
            Particle::new("C0", 10.0, ParticleKind::Atom),
            Particle::new("S0", 0.0, ParticleKind::Shell).with_charge(-1.0),
            Particle::new("C1", 10.0, ParticleKind::Atom),
            Particle::new("S1", 0.0, ParticleKind::Shell).with_charge(-2.0),
        ])
        .with_shells(vec![
            Shell::new(1, &[0], 0.5).unwrap(),
            Shell::new(3, &[2], 1.0).unwrap(),
        ]);
        let positions = vec![
            Point3::origin(),
            Point3::origin(),
            Point3::new(5.0, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
        ];
        let field = Vector3::new(1.0, 0.0, 0.0);
        let homes = [0..2, 2..4];

        let handles: Vec<_> = ThreadGroup::new(2)
            .into_iter()
            .map(|comm| {
                let topology = topology.clone();
                let home = homes[comm.rank()].clone();
                let mut state = MdState::new(positions.clone(), PeriodicBox::None);
                thread::spawn(move || {
                    let mut model = ShellModel::from_topology(&topology)
                        .with_field(field)
                        .without_coulomb()
                        .with_home_range(home.clone());
                    let mut context =
                        RelaxationContext::new(&topology, config(1e-6, 20), comm, home).unwrap();
                    let mut forces = vec![Vector3::zeros(); 4];
                    let outcome = context
                        .relax(0, &mut state, &mut forces, Services::new(&mut model))
                        .unwrap();
                    (outcome, state)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut serial_model = ShellModel::from_topology(&topology)
            .with_field(field)
            .without_coulomb();
        let mut context = RelaxationContext::serial(&topology, config(1e-6, 20)).unwrap();
        let mut serial_state = MdState::new(positions, PeriodicBox::None);
        let (serial, _) = relax_once(&mut context, &mut serial_state, &mut serial_model);

        for (outcome, _) in &results {
            assert!(outcome.converged);
            assert_eq!(outcome.iterations, serial.iterations);
            assert_eq!(outcome.iterations, 1);
            assert!((outcome.potential_energy - serial.potential_energy).abs() < 1e-12);
        }
        assert!((results[0].1.positions[1].x + 0.5).abs() < TOLERANCE);
        assert!((results[1].1.positions[3].x - 3.0).abs() < TOLERANCE);
        assert!((serial_state.positions[3].x - 3.0).abs() < TOLERANCE);
    }

    #[test]
    fn coupled_ranks_match_the_serial_relaxation() {
        let topology = Topology::new(vec![
            Particle::new("C0", 10.0, ParticleKind::Atom).with_charge(0.2),
            Particle::new("S0", 0.0, ParticleKind::Shell).with_charge(-0.1),
            Particle::new("C1", 10.0, ParticleKind::Atom).with_charge(0.2),
            Particle::new("S1", 0.0, ParticleKind::Shell).with_charge(-0.1),
        ])
        .with_shells(vec![
            Shell::new(1, &[0], 0.01).unwrap(),
            Shell::new(3, &[2], 0.02).unwrap(),
        ]);
        let positions = vec![
            Point3::origin(),
            Point3::origin(),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ];
        let homes = [0..2, 2..4];

        let handles: Vec<_> = ThreadGroup::new(2)
            .into_iter()
            .map(|comm| {
                let topology = topology.clone();
                let home = homes[comm.rank()].clone();
                let mut state = MdState::new(positions.clone(), PeriodicBox::None);
                thread::spawn(move || {
                    let model = ShellModel::from_topology(&topology).with_home_range(home.clone());
                    let mut summed = RankSummedForces::new(model, comm.clone());
                    let mut context =
                        RelaxationContext::new(&topology, config(1e-6, 100), comm, home).unwrap();
                    let mut forces = vec![Vector3::zeros(); 4];
                    let outcome = context
                        .relax(0, &mut state, &mut forces, Services::new(&mut summed))
                        .unwrap();
                    (outcome, state, forces)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut serial_model = ShellModel::from_topology(&topology);
        let mut context = RelaxationContext::serial(&topology, config(1e-6, 100)).unwrap();
        let mut serial_state = MdState::new(positions, PeriodicBox::None);
        let (serial, serial_forces) =
            relax_once(&mut context, &mut serial_state, &mut serial_model);

        assert!(serial.converged);
        assert!(serial.iterations > 1);
        for (outcome, _, forces) in &results {
            assert!(outcome.converged);
            assert_eq!(outcome.iterations, serial.iterations);
            assert!((outcome.potential_energy - serial.potential_energy).abs() < 1e-9);
            for (a, b) in forces.iter().zip(&serial_forces) {
                assert!((a - b).norm() < 1e-9);
            }
        }
        let (rank0, rank1) = (&results[0].1, &results[1].1);
        assert!((rank0.positions[1] - serial_state.positions[1]).norm() < TOLERANCE);
        assert!((rank1.positions[3] - serial_state.positions[3]).norm() < TOLERANCE);
        assert!(serial_state.positions[1].x > 0.0);
    }

    #[test]
    fn mismatched_force_array_is_rejected() {
        let mut context =
            RelaxationContext::serial(&core_and_shell(1.0), config(1e-3, 5)).unwrap();
        let mut state = MdState::new(vec![Point3::origin(); 2], PeriodicBox::None);
        let mut evaluator = Tethers::default();
        let mut forces = vec![Vector3::zeros(); 1];
        let result = context.relax(0, &mut state, &mut forces, Services::new(&mut evaluator));
        assert!(matches!(
            result,
            Err(EngineError::SizeMismatch { found: 1, .. })
        ));
    }

    #[test]
    fn home_range_beyond_system_is_rejected() {
        let result =
            RelaxationContext::new(&core_and_shell(1.0), config(1e-3, 5), SingleRank, 0..3);
        assert!(matches!(result, Err(EngineError::InvalidHomeRange { .. })));
    }
}
