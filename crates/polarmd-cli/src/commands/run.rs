use crate::cli::RunArgs;
use crate::config::PartialRunConfig;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use polarmd::{
    core::{
        constraints::{shake::ShakeSolver, solver::ConstraintSolver},
        io::system_file::{read_system, write_system},
        vsites::{LinearVirtualSites, VirtualSiteBuilder},
    },
    engine::{error::EngineError, progress::ProgressReporter},
    workflows::dynamics::{self, DynamicsServices, StepRecord},
};
use std::path::Path;
use tracing::{info, warn};

pub fn run(args: RunArgs) -> Result<()> {
    let partial_config = match &args.config {
        Some(path) => PartialRunConfig::from_file(path)?,
        None => PartialRunConfig::default(),
    };
    info!("Merging configuration from file and CLI arguments...");
    let settings = partial_config.merge_with_cli(&args)?;

    info!("Loading system from {:?}", &args.input);
    let (topology, mut state) = read_system(&args.input)?;

    let mut model = settings.forcefield.build_model(&topology);
    let mut solver = if topology.constraints().is_empty() {
        None
    } else {
        Some(ShakeSolver::from_topology(&topology).map_err(EngineError::from)?)
    };
    let vsites = LinearVirtualSites::from_topology(&topology);
    if !vsites.is_empty() {
        vsites.construct(&mut state.positions, &state.pbc);
    }

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let services = DynamicsServices {
        forces: &mut model,
        constraints: solver.as_mut().map(|s| s as &mut dyn ConstraintSolver),
        virtual_sites: (!vsites.is_empty()).then_some(&vsites as &dyn VirtualSiteBuilder),
    };

    println!(
        "Running {} steps of dynamics on {} particles ({} shells)...",
        settings.dynamics.steps,
        topology.particle_count(),
        topology.shells().len()
    );
    let result = dynamics::run(&topology, &mut state, &settings.dynamics, services, &reporter)?;

    let stats = result.statistics;
    if stats.converged_steps < stats.steps {
        warn!(
            "Shell relaxation did not converge in {} of {} steps.",
            stats.steps - stats.converged_steps,
            stats.steps
        );
    }
    println!(
        "Dynamics complete: {:.1}% of steps converged, {:.2} force evaluations per step.",
        100.0 * stats.converged_fraction(),
        stats.average_evaluations()
    );
    if let Some(last) = result.records.last() {
        println!(
            "Final energies: potential {:.4}, kinetic {:.4}, total {:.4} kJ/mol",
            last.potential_energy, last.kinetic_energy, last.total_energy
        );
    }

    if let Some(path) = &args.records {
        info!("Writing {} step records to {:?}", result.records.len(), path);
        write_records(path, &result.records)?;
        println!("✓ Step records written to: {}", path.display());
    }
    if let Some(path) = &args.output {
        info!("Writing final system to {:?}", path);
        write_system(path, &topology, &state)?;
        println!("✓ Final system written to: {}", path.display());
    }

    Ok(())
}

pub fn write_records(path: &Path, records: &[StepRecord]) -> Result<()> {
    let to_error = |source: csv::Error| CliError::Records {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(to_error)?;
    for record in records {
        writer.serialize(record).map_err(to_error)?;
    }
    writer.flush()?;
    Ok(())
}
