//! # Core Module
//!
//! Data models and collaborator interfaces for the relaxation engine.
//!
//! ## Architecture
//!
//! - **Molecular Representation** ([`models`]) - Particles, shells, constraints, topology, MD state
//!   and periodic boxes
//! - **Force Evaluation** ([`forcefield`]) - The `ForceEvaluator` interface, force buffers, energy
//!   terms, and the reference core-shell model
//! - **Constraints** ([`constraints`]) - The `ConstraintSolver` interface and a SHAKE solver
//! - **Virtual Sites** ([`vsites`]) - Construction and force spreading for virtual sites
//! - **Communication** ([`comm`]) - Collective reductions across cooperating ranks
//! - **File I/O** ([`io`]) - Reading system descriptions from TOML

pub mod comm;
pub mod constraints;
pub mod forcefield;
pub mod io;
pub mod models;
pub mod vsites;
