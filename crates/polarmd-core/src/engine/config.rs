use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

pub const DEFAULT_INITIAL_STEP: f64 = 1.0;
pub const DEFAULT_STEP_SHRINK: f64 = 0.8;
pub const DEFAULT_MIN_STEP: f64 = 0.01;

/// Parameters of the per-step shell and flexible-constraint relaxation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxConfig {
    /// RMS force below which the relaxation is converged (kJ/mol/nm).
    pub force_tolerance: f64,
    /// Largest number of trial evaluations per MD step.
    pub max_iterations: usize,
    /// MD time step in ps.
    pub time_step: f64,
    pub predict_shells: bool,
    /// The run continues an earlier one; shells are not predicted on its first step.
    pub continuation: bool,
    /// Steepest-descent scale applied to the directional acceleration of atoms
    /// in flexible constraints.
    pub flexcon_step_size: f64,
    pub initial_step: f64,
    pub step_shrink: f64,
    pub min_step: f64,
}

#[derive(Debug, Default, Clone)]
pub struct RelaxConfigBuilder {
    force_tolerance: Option<f64>,
    max_iterations: Option<usize>,
    time_step: Option<f64>,
    predict_shells: Option<bool>,
    continuation: Option<bool>,
    flexcon_step_size: Option<f64>,
    initial_step: Option<f64>,
    step_shrink: Option<f64>,
    min_step: Option<f64>,
}

impl RelaxConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_tolerance(mut self, tolerance: f64) -> Self {
        self.force_tolerance = Some(tolerance);
        self
    }
    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = Some(iterations);
        self
    }
    pub fn time_step(mut self, dt: f64) -> Self {
        self.time_step = Some(dt);
        self
    }
    pub fn predict_shells(mut self, enabled: bool) -> Self {
        self.predict_shells = Some(enabled);
        self
    }
    pub fn continuation(mut self, enabled: bool) -> Self {
        self.continuation = Some(enabled);
        self
    }
    pub fn flexcon_step_size(mut self, step: f64) -> Self {
        self.flexcon_step_size = Some(step);
        self
    }
    pub fn initial_step(mut self, step: f64) -> Self {
        self.initial_step = Some(step);
        self
    }
    pub fn step_shrink(mut self, factor: f64) -> Self {
        self.step_shrink = Some(factor);
        self
    }
    pub fn min_step(mut self, step: f64) -> Self {
        self.min_step = Some(step);
        self
    }

    pub fn build(self) -> Result<RelaxConfig, ConfigError> {
        let config = RelaxConfig {
            force_tolerance: self
                .force_tolerance
                .ok_or(ConfigError::MissingParameter("force_tolerance"))?,
            max_iterations: self
                .max_iterations
                .ok_or(ConfigError::MissingParameter("max_iterations"))?,
            time_step: self
                .time_step
                .ok_or(ConfigError::MissingParameter("time_step"))?,
            predict_shells: self.predict_shells.unwrap_or(true),
            continuation: self.continuation.unwrap_or(false),
            flexcon_step_size: self.flexcon_step_size.unwrap_or(0.0),
            initial_step: self.initial_step.unwrap_or(DEFAULT_INITIAL_STEP),
            step_shrink: self.step_shrink.unwrap_or(DEFAULT_STEP_SHRINK),
            min_step: self.min_step.unwrap_or(DEFAULT_MIN_STEP),
        };
        config.validate()?;
        Ok(config)
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

impl RelaxConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.force_tolerance.is_finite() && self.force_tolerance > 0.0) {
            return Err(invalid("force_tolerance", "must be a positive number"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations", "must be at least 1"));
        }
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(invalid("time_step", "must be a positive number"));
        }
        if !(self.flexcon_step_size.is_finite() && self.flexcon_step_size >= 0.0) {
            return Err(invalid("flexcon_step_size", "must be non-negative"));
        }
        if !(self.step_shrink > 0.0 && self.step_shrink < 1.0) {
            return Err(invalid("step_shrink", "must lie strictly between 0 and 1"));
        }
        if !(self.min_step > 0.0 && self.min_step < self.initial_step) {
            return Err(invalid(
                "min_step",
                format!("must be positive and below initial_step ({})", self.initial_step),
            ));
        }
        Ok(())
    }
}

/// Parameters of a polarizable MD run.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsConfig {
    pub steps: u64,
    pub first_step: u64,
    pub relax: RelaxConfig,
}

#[derive(Debug, Default, Clone)]
pub struct DynamicsConfigBuilder {
    steps: Option<u64>,
    first_step: Option<u64>,
    relax: Option<RelaxConfig>,
}

impl DynamicsConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(mut self, steps: u64) -> Self {
        self.steps = Some(steps);
        self
    }
    pub fn first_step(mut self, step: u64) -> Self {
        self.first_step = Some(step);
        self
    }
    pub fn relax(mut self, relax: RelaxConfig) -> Self {
        self.relax = Some(relax);
        self
    }

    pub fn build(self) -> Result<DynamicsConfig, ConfigError> {
        Ok(DynamicsConfig {
            steps: self.steps.ok_or(ConfigError::MissingParameter("steps"))?,
            first_step: self.first_step.unwrap_or(0),
            relax: self.relax.ok_or(ConfigError::MissingParameter("relax"))?,
        })
    }
}
