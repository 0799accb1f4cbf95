// src/models/mod.rs
//
// Plug-in simulation models.
//
// A model bundles dynamics, a safety predicate, an action space and a
// default state domain. Models are selected by `ModelKind` and handed to
// generic code with a `match`, so every call stays statically dispatched.

pub mod cruise_control;
pub mod random_walk;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use crate::grid::Grid;
use crate::model::{Dynamics, SafetyPredicate};

pub use cruise_control::CruiseControl;
pub use random_walk::RandomWalk;

/// Box and cell widths from which a shield grid is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDomain {
    pub granularity: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl GridDomain {
    pub fn build(&self) -> crate::error::Result<Grid> {
        Grid::new(
            self.granularity.clone(),
            self.lower.clone(),
            self.upper.clone(),
        )
    }

    pub fn dimensions(&self) -> usize {
        self.granularity.len()
    }
}

/// A model parameter that cannot drive a simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamError {
    pub field: &'static str,
    pub message: String,
}

impl ParamError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub(crate) fn check_finite(field: &'static str, value: f64) -> Result<(), ParamError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ParamError::new(field, format!("{value} is not finite")))
    }
}

pub(crate) fn check_positive(field: &'static str, value: f64) -> Result<(), ParamError> {
    check_finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ParamError::new(field, format!("must be > 0, got {value}")))
    }
}

pub(crate) fn check_non_negative(field: &'static str, value: f64) -> Result<(), ParamError> {
    check_finite(field, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ParamError::new(field, format!("must be >= 0, got {value}")))
    }
}

/// `(lo, hi)` must be finite with `lo <= hi`.
pub(crate) fn check_range(field: &'static str, (lo, hi): (f64, f64)) -> Result<(), ParamError> {
    check_finite(field, lo)?;
    check_finite(field, hi)?;
    if lo <= hi {
        Ok(())
    } else {
        Err(ParamError::new(
            field,
            format!("lower end {lo} exceeds upper end {hi}"),
        ))
    }
}

pub trait ShieldModel: Dynamics + SafetyPredicate {
    fn name(&self) -> &'static str;

    /// Reject parameters the dynamics or episode sampling cannot use.
    fn validate(&self) -> Result<(), ParamError>;

    fn action_names(&self) -> Vec<String>;

    fn domain(&self) -> GridDomain;

    /// Box of disturbances the dynamics accept, if any.
    fn disturbance(&self) -> crate::error::Result<Option<Bounds>>;

    /// Starting state for a simulated episode.
    fn initial_state<R: Rng>(&self, rng: &mut R) -> Vec<f64>;

    /// Draw one disturbance uniformly from the disturbance box.
    fn sample_disturbance<R: Rng>(&self, rng: &mut R) -> crate::error::Result<Vec<f64>> {
        Ok(match self.disturbance()? {
            Some(b) => b
                .lower
                .iter()
                .zip(&b.upper)
                .map(|(&lo, &hi)| rng.gen_range(lo..=hi))
                .collect(),
            None => Vec::new(),
        })
    }
}

/// Model selection with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    RandomWalk(RandomWalk),
    CruiseControl(CruiseControl),
}

impl Default for ModelKind {
    fn default() -> Self {
        ModelKind::RandomWalk(RandomWalk::default())
    }
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::RandomWalk(m) => m.name(),
            ModelKind::CruiseControl(m) => m.name(),
        }
    }

    pub fn domain(&self) -> GridDomain {
        match self {
            ModelKind::RandomWalk(m) => m.domain(),
            ModelKind::CruiseControl(m) => m.domain(),
        }
    }

    pub fn action_names(&self) -> Vec<String> {
        match self {
            ModelKind::RandomWalk(m) => m.action_names(),
            ModelKind::CruiseControl(m) => m.action_names(),
        }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        match self {
            ModelKind::RandomWalk(m) => m.validate(),
            ModelKind::CruiseControl(m) => m.validate(),
        }
    }
}
