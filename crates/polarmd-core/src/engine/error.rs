use thiserror::Error;

use super::config::ConfigError;
use crate::core::comm::CommError;
use crate::core::constraints::solver::ConstraintError;
use crate::core::forcefield::evaluator::ForceError;
use crate::core::models::topology::TopologyError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Invalid topology: {source}")]
    Topology {
        #[from]
        source: TopologyError,
    },

    #[error("Particle {index} has non-positive mass {mass} but its dynamics are required")]
    NonPositiveMass { index: usize, mass: f64 },

    #[error("Shell {shell} is attached to nuclei with zero total mass")]
    MasslessNuclei { shell: usize },

    #[error("Time step must be positive, got {0}")]
    InvalidTimeStep(f64),

    #[error("Home range {start}..{end} does not fit {count} particles")]
    InvalidHomeRange {
        start: usize,
        end: usize,
        count: usize,
    },

    #[error("The relaxation needs a {0} but none was provided")]
    MissingService(&'static str),

    #[error("{what} holds {found} entries but the system has {expected} particles")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Force evaluation failed: {source}")]
    Force {
        #[from]
        source: ForceError,
    },

    #[error("Constraint projection failed: {source}")]
    Constraint {
        #[from]
        source: ConstraintError,
    },

    #[error("Collective communication failed: {source}")]
    Communication {
        #[from]
        source: CommError,
    },
}
