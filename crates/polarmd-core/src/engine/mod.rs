//! # Engine Module
//!
//! The per-step relaxation of polarizable shells and flexible constraints.
//!
//! ## Overview
//!
//! Once per MD step, [`relax::RelaxationContext::relax`] predicts shell positions,
//! then runs a steepest-descent search over shell positions (and, when flexible
//! constraints are present, over the lengths of those constraints) until the RMS
//! force falls below the tolerance, the step size stagnates, or the iteration budget
//! runs out. The search keeps two configurations, the best one so far and a trial,
//! and accepts a trial only if it lowers the RMS force.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Tolerances, iteration budget and step control
//! - **Driver** ([`relax`]) - The relaxation state machine and its outcome
//! - **Statistics** ([`statistics`]) - Running totals over the relaxed steps
//! - **Progress Monitoring** ([`progress`]) - Callbacks for long runs
//! - **Error Handling** ([`error`]) - Engine-specific error types
//!
//! Force evaluation, constraint projection, virtual sites and collective sums are
//! reached through the traits of [`crate::core`].

pub(crate) mod buffers;
pub mod config;
pub(crate) mod directional;
pub mod error;
pub(crate) mod predictor;
pub mod progress;
pub mod relax;
pub(crate) mod rms;
pub mod statistics;
