// src/models/random_walk.rs
//
// Two-dimensional random walk against a deadline.
//
// State is `[x, t]`. Each step advances time by `time_step` and moves `x`
// forward by the slow or fast step plus a bounded disturbance. Reaching
// `goal` is absorbing. A state is unsafe once the deadline has passed
// without reaching the goal.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use crate::error::Result;
use crate::model::{CollaboratorResult, Dynamics, SafetyPredicate};
use crate::models::{
    check_finite, check_non_negative, check_positive, check_range, GridDomain, ParamError,
    ShieldModel,
};

pub const SLOW: usize = 0;
pub const FAST: usize = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomWalk {
    pub slow_step: f64,
    pub fast_step: f64,
    pub time_step: f64,
    /// Additive disturbance on `x`, symmetric around zero.
    pub disturbance: f64,
    pub goal: f64,
    pub deadline: f64,
    /// Range of starting `x`; episodes start at `t = 0`.
    pub initial_x: (f64, f64),
}

impl Default for RandomWalk {
    fn default() -> Self {
        Self {
            slow_step: 0.1,
            fast_step: 0.17,
            time_step: 0.05,
            disturbance: 0.04,
            goal: 1.0,
            deadline: 1.0,
            initial_x: (0.0, 0.1),
        }
    }
}

impl Dynamics for RandomWalk {
    fn step(
        &self,
        state: &[f64],
        action: usize,
        disturbance: &[f64],
        next: &mut [f64],
    ) -> CollaboratorResult<()> {
        let (x, t) = (state[0], state[1]);
        if x >= self.goal {
            next.copy_from_slice(state);
            return Ok(());
        }
        let step = if action == FAST {
            self.fast_step
        } else {
            self.slow_step
        };
        let d = disturbance.first().copied().unwrap_or(0.0);
        next[0] = x + step + d;
        next[1] = t + self.time_step;
        Ok(())
    }
}

impl SafetyPredicate for RandomWalk {
    fn is_safe(&self, state: &[f64]) -> CollaboratorResult<bool> {
        Ok(state[1] <= self.deadline || state[0] >= self.goal)
    }
}

impl ShieldModel for RandomWalk {
    fn name(&self) -> &'static str {
        "random_walk"
    }

    fn validate(&self) -> std::result::Result<(), ParamError> {
        check_finite("slow_step", self.slow_step)?;
        check_finite("fast_step", self.fast_step)?;
        check_positive("time_step", self.time_step)?;
        check_non_negative("disturbance", self.disturbance)?;
        check_finite("goal", self.goal)?;
        check_finite("deadline", self.deadline)?;
        check_range("initial_x", self.initial_x)
    }

    fn action_names(&self) -> Vec<String> {
        vec!["slow".to_string(), "fast".to_string()]
    }

    fn domain(&self) -> GridDomain {
        // Headroom above the goal for the largest overshoot.
        let x_max = self.goal + self.fast_step + self.disturbance + 0.2;
        GridDomain {
            granularity: vec![0.02, 0.02],
            lower: vec![0.0, 0.0],
            upper: vec![x_max, self.deadline + 0.2],
        }
    }

    fn disturbance(&self) -> Result<Option<Bounds>> {
        Bounds::new(vec![-self.disturbance], vec![self.disturbance]).map(Some)
    }

    fn initial_state<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        let (lo, hi) = self.initial_x;
        vec![rng.gen_range(lo..=hi), 0.0]
    }
}
