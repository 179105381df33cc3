//! # Workflows Module
//!
//! High-level entry points that drive the engine over a whole run.
//!
//! - **Dynamics Workflow** ([`dynamics`]) - Leap-frog MD of the real atoms with a shell
//!   and flexible-constraint relaxation at every step.

pub mod dynamics;
