// src/config.rs
//
// Shield job specification.
//
// A spec fully defines a reproducible synthesis run:
// - shield_id + spec_version for tracking
// - plug-in model and its parameters
// - optional grid override (defaults to the model's domain)
// - reachability sampling and synthesis options
// - enforcement selection policy
// - rollout seeds for evaluating a random agent under the shield
// - output options
//
// Loaded from YAML. A few knobs can be overridden from the environment:
//   GRIDSHIELD_MAX_PASSES, GRIDSHIELD_PARALLEL, GRIDSHIELD_SAMPLES_PER_AXIS

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::compile::is_c_identifier;
use crate::enforce::SelectionPolicy;
use crate::models::{GridDomain, ModelKind};
use crate::synthesis::SynthesisOptions;

/// Current spec schema version.
pub const SPEC_SCHEMA_VERSION: u32 = 1;

pub const ENV_MAX_PASSES: &str = "GRIDSHIELD_MAX_PASSES";
pub const ENV_PARALLEL: &str = "GRIDSHIELD_PARALLEL";
pub const ENV_SAMPLES_PER_AXIS: &str = "GRIDSHIELD_SAMPLES_PER_AXIS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfig {
    /// Supporting points per state axis (2 = cell corners).
    pub samples_per_axis: usize,
    /// Supporting points per disturbance axis (2 = extremes).
    pub disturbance_samples_per_axis: usize,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            samples_per_axis: 3,
            disturbance_samples_per_axis: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    pub selection: SelectionPolicy,
    /// Refuse to continue when synthesis runs out of passes.
    pub require_converged: bool,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            selection: SelectionPolicy::FirstAllowed,
            require_converged: true,
        }
    }
}

/// Random-agent episodes run under the shield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub base_seed: u64,
    /// Zero skips evaluation.
    pub episodes: u32,
    pub steps: u64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            base_seed: 42,
            episodes: 10,
            steps: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Symbol prefix of the generated C table.
    pub c_prefix: String,
    /// Write one JSON line per enforcement decision.
    pub write_decisions: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            c_prefix: "shield".to_string(),
            write_decisions: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShieldSpec {
    pub shield_id: String,
    /// Schema version (starts at 1).
    pub spec_version: u32,
    #[serde(default)]
    pub model: ModelKind,
    /// Grid override; the model's default domain otherwise.
    #[serde(default)]
    pub grid: Option<GridDomain>,
    #[serde(default)]
    pub reachability: ReachabilityConfig,
    #[serde(default)]
    pub synthesis: SynthesisOptions,
    #[serde(default)]
    pub enforcement: EnforcementConfig,
    #[serde(default)]
    pub rollouts: RolloutConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl ShieldSpec {
    pub fn new(shield_id: impl Into<String>, model: ModelKind) -> Self {
        Self {
            shield_id: shield_id.into(),
            spec_version: SPEC_SCHEMA_VERSION,
            model,
            grid: None,
            reachability: ReachabilityConfig::default(),
            synthesis: SynthesisOptions::default(),
            enforcement: EnforcementConfig::default(),
            rollouts: RolloutConfig::default(),
            output: OutputConfig::default(),
        }
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::IoError {
            path: path.as_ref().display().to_string(),
            detail: e.to_string(),
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let spec: ShieldSpec = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            detail: e.to_string(),
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Grid domain used for synthesis.
    pub fn domain(&self) -> GridDomain {
        self.grid.clone().unwrap_or_else(|| self.model.domain())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shield_id.is_empty() {
            return Err(invalid("shield_id", "shield_id cannot be empty"));
        }
        if self.spec_version == 0 || self.spec_version > SPEC_SCHEMA_VERSION {
            return Err(invalid(
                "spec_version",
                format!("spec_version must be between 1 and {SPEC_SCHEMA_VERSION}"),
            ));
        }

        self.model
            .validate()
            .map_err(|e| invalid(&format!("model.{}", e.field), e.message))?;

        let model_dims = self.model.domain().dimensions();
        if let Some(grid) = &self.grid {
            if grid.dimensions() != model_dims
                || grid.lower.len() != model_dims
                || grid.upper.len() != model_dims
            {
                return Err(invalid(
                    "grid",
                    format!(
                        "grid must have {model_dims} dimensions for model {}",
                        self.model.name()
                    ),
                ));
            }
            if grid.granularity.iter().any(|g| !g.is_finite() || *g <= 0.0) {
                return Err(invalid("grid.granularity", "granularity must be > 0"));
            }
        }

        if self.reachability.samples_per_axis == 0 {
            return Err(invalid("reachability.samples_per_axis", "must be >= 1"));
        }
        if self.reachability.disturbance_samples_per_axis == 0 {
            return Err(invalid(
                "reachability.disturbance_samples_per_axis",
                "must be >= 1",
            ));
        }
        if self.synthesis.max_passes == 0 {
            return Err(invalid("synthesis.max_passes", "max_passes must be >= 1"));
        }
        if self.synthesis.safety_samples_per_axis == 0 {
            return Err(invalid("synthesis.safety_samples_per_axis", "must be >= 1"));
        }
        if self.rollouts.episodes > 0 && self.rollouts.steps == 0 {
            return Err(invalid("rollouts.steps", "steps must be > 0"));
        }
        if !is_c_identifier(&self.output.c_prefix) {
            return Err(invalid(
                "output.c_prefix",
                format!("{:?} is not a C identifier", self.output.c_prefix),
            ));
        }
        Ok(())
    }

    /// Expand rollout seeds into `(episode_index, seed)` pairs.
    pub fn expand_seeds(&self) -> Vec<(u32, u64)> {
        (0..self.rollouts.episodes)
            .map(|k| (k, self.rollouts.base_seed.wrapping_add(k as u64)))
            .collect()
    }

    /// Apply `GRIDSHIELD_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Unparsable values are
    /// logged and ignored; the result is revalidated.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_PASSES) {
            match raw.trim().parse::<u64>() {
                Ok(v) => {
                    info!(key = ENV_MAX_PASSES, value = v, "config override");
                    self.synthesis.max_passes = v;
                }
                Err(_) => warn!(key = ENV_MAX_PASSES, value = %raw, "ignoring unparsable override"),
            }
        }
        if let Some(raw) = lookup(ENV_PARALLEL) {
            match parse_bool(&raw) {
                Some(v) => {
                    info!(key = ENV_PARALLEL, value = v, "config override");
                    self.synthesis.parallel = v;
                }
                None => warn!(key = ENV_PARALLEL, value = %raw, "ignoring unparsable override"),
            }
        }
        if let Some(raw) = lookup(ENV_SAMPLES_PER_AXIS) {
            match raw.trim().parse::<usize>() {
                Ok(v) => {
                    info!(key = ENV_SAMPLES_PER_AXIS, value = v, "config override");
                    self.reachability.samples_per_axis = v;
                }
                Err(_) => {
                    warn!(key = ENV_SAMPLES_PER_AXIS, value = %raw, "ignoring unparsable override")
                }
            }
        }
        self.validate()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read shield spec '{path}': {detail}")]
    IoError { path: String, detail: String },

    #[error("failed to parse shield spec YAML: {detail}")]
    ParseError { detail: String },

    #[error("shield spec validation error in '{field}': {message}")]
    ValidationError { field: String, message: String },
}
