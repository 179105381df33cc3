//! # polarmd Core Library
//!
//! Relaxation of shell particles and flexible (zero-length) constraints inside the force
//! evaluation of a polarizable molecular dynamics step.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Particle and topology models, periodic boxes, and the
//!   collaborator interfaces the relaxation needs (force evaluation, constraint projection,
//!   virtual-site construction, collective reduction) together with reference implementations.
//!
//! - **[`engine`]: The Logic Core.** The stateful relaxation context: the two-slot position/force
//!   arena, the shell position predictor, the directional acceleration estimator, the RMS-force
//!   reduction, and the steepest-descent driver that ties them together once per MD step.
//!
//! - **[`workflows`]: The Public API.** Complete procedures built on the engine, such as running
//!   leap-frog dynamics with per-step shell relaxation.

pub mod core;
pub mod engine;
pub mod workflows;
