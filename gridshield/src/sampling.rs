// src/sampling.rs
//
// Deterministic sample lattices over a box.
//
// `SupportingPoints` places `per_axis` evenly spaced coordinates on every
// axis (both faces included when per_axis >= 2) and visits their cartesian
// product in row-major order. With per_axis == 1 the single sample is the
// box centre.

use crate::bounds::Bounds;

#[derive(Debug, Clone, Copy)]
pub struct SupportingPoints<'b> {
    bounds: &'b Bounds,
    per_axis: usize,
}

impl<'b> SupportingPoints<'b> {
    pub fn new(bounds: &'b Bounds, per_axis: usize) -> Self {
        Self {
            bounds,
            per_axis: per_axis.max(1),
        }
    }

    /// Number of points in the lattice.
    pub fn len(&self) -> usize {
        self.per_axis.saturating_pow(self.bounds.dimensions() as u32)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    fn coordinate(&self, axis: usize, k: usize) -> f64 {
        let lo = self.bounds.lower[axis];
        let hi = self.bounds.upper[axis];
        if self.per_axis == 1 {
            return lo + (hi - lo) / 2.0;
        }
        if k + 1 == self.per_axis {
            // Exact upper face, not lo + n*step.
            return hi;
        }
        lo + (hi - lo) * k as f64 / (self.per_axis - 1) as f64
    }

    /// Call `f` once per lattice point, stopping at the first error.
    ///
    /// A zero-dimensional box yields exactly one empty point.
    pub fn try_for_each<E>(&self, mut f: impl FnMut(&[f64]) -> Result<(), E>) -> Result<(), E> {
        let dims = self.bounds.dimensions();
        let mut counters = vec![0usize; dims];
        let mut point: Vec<f64> = (0..dims).map(|axis| self.coordinate(axis, 0)).collect();

        loop {
            f(&point)?;

            // Odometer step, last axis fastest.
            let mut axis = dims;
            loop {
                if axis == 0 {
                    return Ok(());
                }
                axis -= 1;
                counters[axis] += 1;
                if counters[axis] < self.per_axis {
                    point[axis] = self.coordinate(axis, counters[axis]);
                    break;
                }
                counters[axis] = 0;
                point[axis] = self.coordinate(axis, 0);
            }
        }
    }

    /// Collect every lattice point. Intended for tests and small boxes.
    pub fn to_vec(&self) -> Vec<Vec<f64>> {
        let mut out = Vec::with_capacity(self.len());
        let _ = self.try_for_each::<()>(|p| {
            out.push(p.to_vec());
            Ok(())
        });
        out
    }
}
