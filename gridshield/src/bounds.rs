// src/bounds.rs
//
// Axis-aligned boxes in continuous state space.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShieldError};

/// Closed axis-aligned box `[lower, upper]` in `dimensions()` dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(ShieldError::InvalidGrid(format!(
                "bounds dimension mismatch: lower has {}, upper has {}",
                lower.len(),
                upper.len()
            )));
        }
        for (axis, (lo, hi)) in lower.iter().zip(&upper).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(ShieldError::InvalidGrid(format!(
                    "non-finite bound on axis {axis}"
                )));
            }
            if lo > hi {
                return Err(ShieldError::InvalidGrid(format!(
                    "lower bound {lo} exceeds upper bound {hi} on axis {axis}"
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn dimensions(&self) -> usize {
        self.lower.len()
    }

    /// Width of the box along `axis`.
    pub fn width(&self, axis: usize) -> f64 {
        self.upper[axis] - self.lower[axis]
    }

    /// True when `point` lies in the closed box, allowing `tolerance` slack
    /// on every face.
    pub fn contains(&self, point: &[f64], tolerance: f64) -> bool {
        point.len() == self.dimensions()
            && point
                .iter()
                .zip(self.lower.iter().zip(&self.upper))
                .all(|(x, (lo, hi))| *x >= lo - tolerance && *x <= hi + tolerance)
    }

    /// Pull every coordinate of `point` into the box, axis by axis.
    pub fn clamp(&self, point: &mut [f64]) {
        for (x, (lo, hi)) in point.iter_mut().zip(self.lower.iter().zip(&self.upper)) {
            *x = x.clamp(*lo, *hi);
        }
    }

    pub fn center(&self) -> Vec<f64> {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| lo + (hi - lo) / 2.0)
            .collect()
    }
}
