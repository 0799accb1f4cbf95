// src/models/cruise_control.rs
//
// Adaptive cruise control behind a car with unknown behaviour.
//
// State is `[v_ego, v_front, distance]`. The ego car accelerates, coasts
// or brakes; the front car's acceleration is the disturbance. Velocities
// saturate at the configured limits and the gap follows the mean velocity
// of each car over the step. Distances beyond `max_distance` are reported
// as `max_distance` (the sensor range). A collision (`distance <= 0`) is
// unsafe.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use crate::error::Result;
use crate::model::{CollaboratorResult, Dynamics, SafetyPredicate};
use crate::models::{
    check_non_negative, check_positive, check_range, GridDomain, ParamError, ShieldModel,
};

pub const ACCELERATE: usize = 0;
pub const COAST: usize = 1;
pub const BRAKE: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CruiseControl {
    pub acceleration: f64,
    pub braking: f64,
    pub dt: f64,
    pub ego_velocity: (f64, f64),
    /// The front car never reverses as fast as the ego car can.
    pub front_velocity: (f64, f64),
    /// Range of the front car's acceleration.
    pub front_acceleration: (f64, f64),
    pub max_distance: f64,
    pub initial_velocity: (f64, f64),
    pub initial_distance: (f64, f64),
}

impl Default for CruiseControl {
    fn default() -> Self {
        Self {
            acceleration: 2.0,
            braking: 2.0,
            dt: 1.0,
            ego_velocity: (-10.0, 20.0),
            front_velocity: (-8.0, 20.0),
            front_acceleration: (-2.0, 2.0),
            max_distance: 200.0,
            initial_velocity: (0.0, 10.0),
            initial_distance: (20.0, 60.0),
        }
    }
}

impl CruiseControl {
    fn ego_acceleration(&self, action: usize) -> f64 {
        match action {
            ACCELERATE => self.acceleration,
            BRAKE => -self.braking,
            _ => 0.0,
        }
    }
}

impl Dynamics for CruiseControl {
    fn step(
        &self,
        state: &[f64],
        action: usize,
        disturbance: &[f64],
        next: &mut [f64],
    ) -> CollaboratorResult<()> {
        let (v_ego, v_front, distance) = (state[0], state[1], state[2]);
        let a_ego = self.ego_acceleration(action);
        let a_front = disturbance.first().copied().unwrap_or(0.0);
        let dt = self.dt;

        let v_ego_next = (v_ego + a_ego * dt).clamp(self.ego_velocity.0, self.ego_velocity.1);
        let v_front_next =
            (v_front + a_front * dt).clamp(self.front_velocity.0, self.front_velocity.1);
        let closing = 0.5 * ((v_ego + v_ego_next) - (v_front + v_front_next)) * dt;
        next[0] = v_ego_next;
        next[1] = v_front_next;
        next[2] = (distance - closing).min(self.max_distance);
        Ok(())
    }
}

impl SafetyPredicate for CruiseControl {
    fn is_safe(&self, state: &[f64]) -> CollaboratorResult<bool> {
        Ok(state[2] > 0.0)
    }
}

impl ShieldModel for CruiseControl {
    fn name(&self) -> &'static str {
        "cruise_control"
    }

    fn validate(&self) -> std::result::Result<(), ParamError> {
        check_non_negative("acceleration", self.acceleration)?;
        check_non_negative("braking", self.braking)?;
        check_positive("dt", self.dt)?;
        check_range("ego_velocity", self.ego_velocity)?;
        check_range("front_velocity", self.front_velocity)?;
        check_range("front_acceleration", self.front_acceleration)?;
        check_positive("max_distance", self.max_distance)?;
        check_range("initial_velocity", self.initial_velocity)?;
        check_range("initial_distance", self.initial_distance)
    }

    fn action_names(&self) -> Vec<String> {
        vec![
            "accelerate".to_string(),
            "coast".to_string(),
            "brake".to_string(),
        ]
    }

    fn domain(&self) -> GridDomain {
        // One extra cell on the upper edges keeps saturated values inside
        // the half-open domain.
        GridDomain {
            granularity: vec![2.0, 2.0, 2.0],
            lower: vec![self.ego_velocity.0, self.front_velocity.0, 0.0],
            upper: vec![
                self.ego_velocity.1 + 2.0,
                self.front_velocity.1 + 2.0,
                self.max_distance + 2.0,
            ],
        }
    }

    fn disturbance(&self) -> Result<Option<Bounds>> {
        let (lo, hi) = self.front_acceleration;
        Bounds::new(vec![lo], vec![hi]).map(Some)
    }

    fn initial_state<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        let (v_lo, v_hi) = self.initial_velocity;
        let (d_lo, d_hi) = self.initial_distance;
        vec![
            rng.gen_range(v_lo..=v_hi),
            rng.gen_range(v_lo..=v_hi),
            rng.gen_range(d_lo..=d_hi),
        ]
    }
}
