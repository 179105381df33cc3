//! # Constraints Module
//!
//! - [`solver`] - The [`solver::ConstraintSolver`] interface used by the relaxation engine
//! - [`shake`] - An iterative, mass-weighted SHAKE implementation of it

pub mod shake;
pub mod solver;
