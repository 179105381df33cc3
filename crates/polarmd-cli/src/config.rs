pub mod defaults;

use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use defaults::DefaultsConfig;
use nalgebra::Vector3;
use polarmd::core::forcefield::shell_model::ShellModel;
use polarmd::core::models::topology::Topology;
use polarmd::engine::config::{DynamicsConfig, DynamicsConfigBuilder, RelaxConfigBuilder};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialDynamicsConfig {
    steps: Option<u64>,
    first_step: Option<u64>,
    time_step: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialRelaxationConfig {
    force_tolerance: Option<f64>,
    max_iterations: Option<usize>,
    predict_shells: Option<bool>,
    continuation: Option<bool>,
    flexcon_step_size: Option<f64>,
    initial_step: Option<f64>,
    step_shrink: Option<f64>,
    min_step: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialForcefieldConfig {
    field: Option<[f64; 3]>,
    cutoff: Option<f64>,
    dielectric: Option<f64>,
    coulomb: Option<bool>,
}

/// A run file as read from disk; every field may be left out.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialRunConfig {
    dynamics: Option<PartialDynamicsConfig>,
    relaxation: Option<PartialRelaxationConfig>,
    forcefield: Option<PartialForcefieldConfig>,
}

/// Settings of the reference force field used by the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct ForcefieldSettings {
    pub field: Vector3<f64>,
    pub cutoff: Option<f64>,
    pub dielectric: f64,
    pub coulomb: bool,
}

impl ForcefieldSettings {
    pub fn build_model(&self, topology: &Topology) -> ShellModel {
        let mut model = ShellModel::from_topology(topology)
            .with_field(self.field)
            .with_dielectric(self.dielectric);
        if let Some(cutoff) = self.cutoff {
            model = model.with_cutoff(cutoff);
        }
        if !self.coulomb {
            model = model.without_coulomb();
        }
        model
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub dynamics: DynamicsConfig,
    pub forcefield: ForcefieldSettings,
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading run configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn merge_with_cli(mut self, args: &RunArgs) -> Result<RunSettings> {
        self.apply_set_values(&args.set_values)?;
        let defaults = DefaultsConfig::default();

        let dyn_config = self.dynamics.take().unwrap_or_default();
        let relax_config = self.relaxation.take().unwrap_or_default();
        let ff_config = self.forcefield.take().unwrap_or_default();

        let predict_shells = if args.no_prediction {
            false
        } else {
            relax_config
                .predict_shells
                .unwrap_or(defaults.predict_shells)
        };
        let continuation = args.continuation || relax_config.continuation.unwrap_or(false);

        let mut relax = RelaxConfigBuilder::new()
            .force_tolerance(
                args.force_tolerance
                    .or(relax_config.force_tolerance)
                    .unwrap_or(defaults.force_tolerance),
            )
            .max_iterations(
                args.max_iterations
                    .or(relax_config.max_iterations)
                    .unwrap_or(defaults.max_iterations),
            )
            .time_step(
                args.time_step
                    .or(dyn_config.time_step)
                    .unwrap_or(defaults.time_step),
            )
            .predict_shells(predict_shells)
            .continuation(continuation);
        if let Some(step) = relax_config.flexcon_step_size {
            relax = relax.flexcon_step_size(step);
        }
        if let Some(step) = relax_config.initial_step {
            relax = relax.initial_step(step);
        }
        if let Some(factor) = relax_config.step_shrink {
            relax = relax.step_shrink(factor);
        }
        if let Some(step) = relax_config.min_step {
            relax = relax.min_step(step);
        }
        let relax = relax.build().map_err(|e| CliError::Config(e.to_string()))?;

        let dynamics = DynamicsConfigBuilder::new()
            .steps(args.steps.or(dyn_config.steps).unwrap_or(defaults.steps))
            .first_step(dyn_config.first_step.unwrap_or(0))
            .relax(relax)
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        let dielectric = ff_config.dielectric.unwrap_or(defaults.dielectric);
        if !(dielectric.is_finite() && dielectric > 0.0) {
            return Err(CliError::Config(format!(
                "`forcefield.dielectric` must be positive, got {}",
                dielectric
            )));
        }
        if let Some(cutoff) = ff_config.cutoff {
            if !(cutoff.is_finite() && cutoff > 0.0) {
                return Err(CliError::Config(format!(
                    "`forcefield.cutoff` must be positive, got {}",
                    cutoff
                )));
            }
        }
        let forcefield = ForcefieldSettings {
            field: ff_config.field.map(Vector3::from).unwrap_or_else(Vector3::zeros),
            cutoff: ff_config.cutoff,
            dielectric,
            coulomb: ff_config.coulomb.unwrap_or(true),
        };

        Ok(RunSettings {
            dynamics,
            forcefield,
        })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };
            let key = key.trim();

            match key {
                "dynamics.steps" => {
                    self.dynamics.get_or_insert_with(Default::default).steps =
                        Some(parse_value(key, value)?);
                }
                "dynamics.first-step" => {
                    self.dynamics.get_or_insert_with(Default::default).first_step =
                        Some(parse_value(key, value)?);
                }
                "dynamics.time-step" => {
                    self.dynamics.get_or_insert_with(Default::default).time_step =
                        Some(parse_value(key, value)?);
                }
                "relaxation.force-tolerance" => {
                    self.relaxation.get_or_insert_with(Default::default).force_tolerance =
                        Some(parse_value(key, value)?);
                }
                "relaxation.max-iterations" => {
                    self.relaxation.get_or_insert_with(Default::default).max_iterations =
                        Some(parse_value(key, value)?);
                }
                "relaxation.predict-shells" => {
                    self.relaxation.get_or_insert_with(Default::default).predict_shells =
                        Some(parse_value(key, value)?);
                }
                "relaxation.flexcon-step-size" => {
                    self.relaxation.get_or_insert_with(Default::default).flexcon_step_size =
                        Some(parse_value(key, value)?);
                }
                "relaxation.initial-step" => {
                    self.relaxation.get_or_insert_with(Default::default).initial_step =
                        Some(parse_value(key, value)?);
                }
                "relaxation.step-shrink" => {
                    self.relaxation.get_or_insert_with(Default::default).step_shrink =
                        Some(parse_value(key, value)?);
                }
                "relaxation.min-step" => {
                    self.relaxation.get_or_insert_with(Default::default).min_step =
                        Some(parse_value(key, value)?);
                }
                "forcefield.cutoff" => {
                    self.forcefield.get_or_insert_with(Default::default).cutoff =
                        Some(parse_value(key, value)?);
                }
                "forcefield.dielectric" => {
                    self.forcefield.get_or_insert_with(Default::default).dielectric =
                        Some(parse_value(key, value)?);
                }
                "forcefield.coulomb" => {
                    self.forcefield.get_or_insert_with(Default::default).coulomb =
                        Some(parse_value(key, value)?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}
