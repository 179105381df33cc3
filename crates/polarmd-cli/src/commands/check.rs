use crate::cli::CheckArgs;
use crate::error::Result;
use polarmd::core::io::system_file::read_system;
use polarmd::core::models::pbc::PeriodicBox;
use polarmd::core::models::topology::Topology;
use tracing::info;

/// Counts reported by `polarmd check`.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSummary {
    pub particles: usize,
    pub real_atoms: usize,
    pub shells: usize,
    pub rigid_constraints: usize,
    pub flexible_constraints: usize,
    pub virtual_sites: usize,
    pub total_charge: f64,
}

impl SystemSummary {
    pub fn of(topology: &Topology) -> Self {
        let flexible = topology.flexible_constraint_count();
        Self {
            particles: topology.particle_count(),
            real_atoms: topology
                .particles()
                .iter()
                .filter(|p| p.kind.is_real())
                .count(),
            shells: topology.shells().len(),
            rigid_constraints: topology.constraints().len() - flexible,
            flexible_constraints: flexible,
            virtual_sites: topology.virtual_sites().len(),
            total_charge: topology.particles().iter().map(|p| p.charge).sum(),
        }
    }
}

pub fn run(args: CheckArgs) -> Result<()> {
    info!("Validating system file {:?}", &args.input);
    let (topology, state) = read_system(&args.input)?;
    let summary = SystemSummary::of(&topology);

    println!("✓ {} is a valid system.", args.input.display());
    println!("  Particles:            {}", summary.particles);
    println!("  Real atoms:           {}", summary.real_atoms);
    println!("  Shells:               {}", summary.shells);
    println!("  Rigid constraints:    {}", summary.rigid_constraints);
    println!("  Flexible constraints: {}", summary.flexible_constraints);
    println!("  Virtual sites:        {}", summary.virtual_sites);
    println!("  Total charge:         {:.4} e", summary.total_charge);
    match state.pbc {
        PeriodicBox::None => println!("  Box:                  none"),
        PeriodicBox::Rectangular(edges) => println!(
            "  Box:                  {:.4} x {:.4} x {:.4} nm",
            edges.x, edges.y, edges.z
        ),
    }
    Ok(())
}
