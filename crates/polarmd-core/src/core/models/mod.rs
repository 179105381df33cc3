//! # Core Models Module
//!
//! Data structures describing the simulated system.
//!
//! - [`particle`] - Particles and their kinds (atom, shell, virtual site)
//! - [`shell`] - Shell definitions: attached nuclei and displacement scale
//! - [`topology`] - The static system: particles, shells, constraints, virtual sites
//! - [`state`] - Positions, velocities and periodic box of one MD step
//! - [`pbc`] - Periodic boundary conditions and minimum-image displacements
//!
//! ```ignore
//! use polarmd::core::models::{particle::*, shell::Shell, topology::Topology};
//!
//! let topology = Topology::new(vec![
//!     Particle::new("NA", 22.99, ParticleKind::Atom).with_charge(3.0),
//!     Particle::new("NA_S", 0.0, ParticleKind::Shell).with_charge(-2.0),
//! ])
//! .with_shells(vec![Shell::from_force_constant(1, &[0], 4.0e5)?]);
//! topology.validate()?;
//! ```

pub mod particle;
pub mod pbc;
pub mod shell;
pub mod state;
pub mod topology;
