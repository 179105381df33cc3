//! # Force Field Module
//!
//! The force-evaluation seam of the relaxation engine and a reference polarizable
//! model that implements it.
//!
//! ## Key Components
//!
//! - [`evaluator`] - The [`evaluator::ForceEvaluator`] trait, evaluation flags and the
//!   [`evaluator::ForceBuffers`] that every evaluation fills
//! - [`term`] - Potential energy split by interaction group
//! - [`shell_model`] - Harmonic core-shell springs, uniform field and cutoff-split Coulomb
//! - [`distributed`] - Sums the forces of rank-local evaluations across ranks
//!
//! ```ignore
//! use polarmd::core::forcefield::{evaluator::*, shell_model::ShellModel};
//!
//! let mut model = ShellModel::from_topology(&topology).with_cutoff(1.0);
//! let mut out = ForceBuffers::new(topology.particle_count());
//! model.compute_forces(&positions, &pbc, step, ForceFlags::default(), &mut out)?;
//! ```

pub mod distributed;
pub mod evaluator;
pub(crate) mod potentials;
pub mod shell_model;
pub mod term;
