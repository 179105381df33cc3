use crate::core::constraints::solver::ConstraintSolver;
use crate::core::forcefield::evaluator::ForceEvaluator;
use crate::core::models::state::MdState;
use crate::core::models::topology::Topology;
use crate::core::vsites::VirtualSiteBuilder;
use crate::engine::config::DynamicsConfig;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::relax::{RelaxationContext, Services};
use crate::engine::statistics::RelaxStatistics;
use nalgebra::{Point3, Vector3};
use serde::Serialize;
use tracing::{info, instrument};

/// Collaborators of a dynamics run, reused at every step.
pub struct DynamicsServices<'s> {
    pub forces: &'s mut dyn ForceEvaluator,
    pub constraints: Option<&'s mut dyn ConstraintSolver>,
    pub virtual_sites: Option<&'s dyn VirtualSiteBuilder>,
}

/// Observables of one MD step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: u64,
    pub time: f64,
    pub iterations: usize,
    pub converged: bool,
    pub rms_force: f64,
    pub potential_energy: f64,
    pub kinetic_energy: f64,
    pub total_energy: f64,
}

#[derive(Debug, Clone)]
pub struct DynamicsResult {
    pub records: Vec<StepRecord>,
    pub statistics: RelaxStatistics,
}

fn kinetic_energy(masses: &[f64], real: &[bool], velocities: &[Vector3<f64>]) -> f64 {
    masses
        .iter()
        .zip(real)
        .zip(velocities)
        .filter(|((_, is_real), _)| **is_real)
        .map(|((m, _), v)| 0.5 * m * v.norm_squared())
        .sum()
}

/// Runs `config.steps` leap-frog steps starting from `state`.
///
/// Velocities in `state` are taken to lag the positions by half a step. Shells are
/// relaxed before every force evaluation is used; they carry no velocity and are
/// not integrated. The kinetic energy of a step is the mean of the two half-step
/// values around it.
#[instrument(skip_all, name = "dynamics_workflow")]
pub fn run(
    topology: &Topology,
    state: &mut MdState,
    config: &DynamicsConfig,
    services: DynamicsServices<'_>,
    reporter: &ProgressReporter,
) -> Result<DynamicsResult, EngineError> {
    let n = topology.particle_count();
    let dt = config.relax.time_step;
    let masses: Vec<f64> = topology.particles().iter().map(|p| p.mass).collect();
    let real: Vec<bool> = topology.particles().iter().map(|p| p.kind.is_real()).collect();
    if let Some(index) = (0..n).find(|&i| real[i] && masses[i] <= 0.0) {
        return Err(EngineError::NonPositiveMass {
            index,
            mass: masses[index],
        });
    }

    let DynamicsServices {
        forces: evaluator,
        mut constraints,
        virtual_sites,
    } = services;

    let mut context = RelaxationContext::serial(topology, config.relax.clone())?;
    let mut forces = vec![Vector3::zeros(); n];
    let mut previous: Vec<Point3<f64>> = Vec::with_capacity(n);
    let mut records = Vec::with_capacity(config.steps as usize);

    info!(
        steps = config.steps,
        particles = n,
        shells = topology.shells().len(),
        "Starting polarizable dynamics."
    );
    reporter.report(Progress::RunStart {
        total_steps: config.steps,
    });

    for offset in 0..config.steps {
        let step = config.first_step + offset;

        let mut step_services = Services::new(&mut *evaluator);
        if let Some(solver) = constraints.as_deref_mut() {
            step_services = step_services.with_constraints(solver);
        }
        if let Some(vsites) = virtual_sites {
            step_services = step_services.with_virtual_sites(vsites);
        }
        let outcome = context.relax(step, state, &mut forces, step_services)?;

        let ke_before = kinetic_energy(&masses, &real, &state.velocities);
        previous.clear();
        previous.extend_from_slice(&state.positions);
        for i in (0..n).filter(|&i| real[i]) {
            state.velocities[i] += forces[i] * (dt / masses[i]);
            state.positions[i] += state.velocities[i] * dt;
        }

        if let Some(solver) = constraints.as_deref_mut() {
            solver.constrain_positions(&previous, &mut state.positions, &state.pbc)?;
            for i in (0..n).filter(|&i| real[i]) {
                state.velocities[i] = (state.positions[i] - previous[i]) / dt;
            }
        }
        if let Some(vsites) = virtual_sites {
            vsites.construct(&mut state.positions, &state.pbc);
        }

        let ke_after = kinetic_energy(&masses, &real, &state.velocities);
        let kinetic = 0.5 * (ke_before + ke_after);
        records.push(StepRecord {
            step,
            time: step as f64 * dt,
            iterations: outcome.iterations,
            converged: outcome.converged,
            rms_force: outcome.rms_force,
            potential_energy: outcome.potential_energy,
            kinetic_energy: kinetic,
            total_energy: outcome.potential_energy + kinetic,
        });
        reporter.report(Progress::StepFinished {
            step,
            iterations: outcome.iterations,
            converged: outcome.converged,
        });
    }

    let statistics = context.statistics();
    reporter.report(Progress::RunFinish);
    info!(
        steps = statistics.steps,
        average_evaluations = statistics.average_evaluations(),
        converged_fraction = statistics.converged_fraction(),
        "Dynamics complete."
    );

    Ok(DynamicsResult {
        records,
        statistics,
    })
}
