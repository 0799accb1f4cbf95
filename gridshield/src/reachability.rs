// src/reachability.rs
//
// Sampled over-approximation of the cells reachable from a cell under an
// action.
//
// For a cell and action, `ReachabilityFunction` walks a lattice of states
// spanning the cell (corners included), pairs each with every sample of
// the disturbance box (extremes included), advances them through the
// caller's dynamics and records the cell of every successor. Successors
// that leave the grid set the `outside` flag.
//
// `TransitionTable` evaluates the function once for every (cell, action)
// pair so fixed-point passes do not re-run the dynamics.

use rayon::prelude::*;
use tracing::debug;

use crate::bounds::Bounds;
use crate::error::{Result, ShieldError};
use crate::grid::{CellId, CellRef, Grid};
use crate::model::Dynamics;
use crate::sampling::SupportingPoints;

/// Anything that can enumerate successor cells.
pub trait Reachability: Sync {
    /// Fill `out` with the successors of `cell` under `action`.
    fn reachable(
        &self,
        grid: &Grid,
        cell: CellId,
        action: usize,
        out: &mut ReachableSet,
    ) -> Result<()>;
}

impl<R: Reachability + ?Sized> Reachability for &R {
    fn reachable(
        &self,
        grid: &Grid,
        cell: CellId,
        action: usize,
        out: &mut ReachableSet,
    ) -> Result<()> {
        (**self).reachable(grid, cell, action, out)
    }
}

/// Reusable buffer of successor cells: sorted, deduplicated, plus a flag
/// for the outside sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReachableSet {
    cells: Vec<CellId>,
    outside: bool,
}

impl ReachableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.outside = false;
    }

    pub fn insert(&mut self, cell: CellRef) {
        match cell {
            CellRef::Inside(id) => self.cells.push(id),
            CellRef::Outside => self.outside = true,
        }
    }

    /// Sort and deduplicate after a batch of inserts.
    pub fn finish(&mut self) {
        self.cells.sort_unstable();
        self.cells.dedup();
    }

    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    pub fn includes_outside(&self) -> bool {
        self.outside
    }

    pub fn contains(&self, cell: CellRef) -> bool {
        match cell {
            CellRef::Inside(id) => self.cells.binary_search(&id).is_ok(),
            CellRef::Outside => self.outside,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len() + usize::from(self.outside)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sampling-based reachability over caller-supplied dynamics.
#[derive(Debug, Clone)]
pub struct ReachabilityFunction<D> {
    dynamics: D,
    samples_per_axis: usize,
    disturbances: Vec<Vec<f64>>,
}

impl<D: Dynamics> ReachabilityFunction<D> {
    /// Deterministic dynamics sampled with `samples_per_axis` points per
    /// axis of each cell.
    pub fn new(dynamics: D, samples_per_axis: usize) -> Self {
        Self {
            dynamics,
            samples_per_axis: samples_per_axis.max(1),
            disturbances: vec![Vec::new()],
        }
    }

    /// Sample the bounded disturbance box with `samples_per_axis` points per
    /// axis (corners included) for every state sample.
    pub fn with_disturbance(mut self, disturbance: &Bounds, samples_per_axis: usize) -> Self {
        self.disturbances = SupportingPoints::new(disturbance, samples_per_axis).to_vec();
        self
    }

    pub fn samples_per_axis(&self) -> usize {
        self.samples_per_axis
    }

    /// Number of dynamics evaluations per (cell, action) pair on `grid`.
    pub fn evaluations_per_cell(&self, grid: &Grid) -> usize {
        self.samples_per_axis
            .saturating_pow(grid.dimensions() as u32)
            .saturating_mul(self.disturbances.len())
    }
}

impl<D: Dynamics> Reachability for ReachabilityFunction<D> {
    fn reachable(
        &self,
        grid: &Grid,
        cell: CellId,
        action: usize,
        out: &mut ReachableSet,
    ) -> Result<()> {
        out.clear();
        let cell_bounds = grid.bounds_of(cell);
        let mut next = vec![0.0; grid.dimensions()];

        SupportingPoints::new(&cell_bounds, self.samples_per_axis).try_for_each(|state| {
            for w in &self.disturbances {
                self.dynamics
                    .step(state, action, w, &mut next)
                    .map_err(|e| {
                        ShieldError::CollaboratorFailure(format!(
                            "dynamics failed for action {action} at {state:?}: {e}"
                        ))
                    })?;
                if let Some(x) = next.iter().find(|x| !x.is_finite()) {
                    return Err(ShieldError::CollaboratorFailure(format!(
                        "dynamics returned non-finite coordinate {x} for action {action} at {state:?}"
                    )));
                }
                out.insert(grid.cell_of(&next));
            }
            Ok(())
        })?;

        out.finish();
        Ok(())
    }
}

/// Successors of every (cell, action) pair, computed once.
///
/// Cells excluded at build time (already fully unsafe) report only the
/// outside sentinel.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    num_actions: usize,
    offsets: Vec<usize>,
    targets: Vec<CellId>,
    outside: Vec<bool>,
}

impl TransitionTable {
    /// Evaluate `reach` for every cell where `include(cell)` holds and every
    /// action in `0..num_actions`.
    pub fn build<R, F>(
        grid: &Grid,
        reach: &R,
        num_actions: usize,
        parallel: bool,
        include: F,
    ) -> Result<Self>
    where
        R: Reachability,
        F: Fn(CellId) -> bool + Sync,
    {
        let per_cell = |cell: CellId, scratch: &mut ReachableSet| -> Result<Vec<ReachableSet>> {
            if !include(cell) {
                return Ok(Vec::new());
            }
            let mut sets = Vec::with_capacity(num_actions);
            for action in 0..num_actions {
                reach.reachable(grid, cell, action, scratch)?;
                sets.push(scratch.clone());
            }
            Ok(sets)
        };

        let rows: Vec<Vec<ReachableSet>> = if parallel {
            (0..grid.len())
                .into_par_iter()
                .map_init(ReachableSet::new, |scratch, i| per_cell(CellId(i), scratch))
                .collect::<Result<_>>()?
        } else {
            let mut scratch = ReachableSet::new();
            grid.cells()
                .map(|cell| per_cell(cell, &mut scratch))
                .collect::<Result<_>>()?
        };

        let pairs = grid.len() * num_actions;
        let mut offsets = Vec::with_capacity(pairs + 1);
        let mut targets = Vec::new();
        let mut outside = Vec::with_capacity(pairs);
        offsets.push(0);
        for row in rows {
            if row.is_empty() {
                for _ in 0..num_actions {
                    offsets.push(targets.len());
                    outside.push(true);
                }
                continue;
            }
            for set in row {
                targets.extend_from_slice(set.cells());
                offsets.push(targets.len());
                outside.push(set.includes_outside());
            }
        }

        debug!(
            cells = grid.len(),
            actions = num_actions,
            edges = targets.len(),
            "transition table built"
        );

        Ok(Self {
            num_actions,
            offsets,
            targets,
            outside,
        })
    }

    /// Successor cells and outside flag of one pair, without copying.
    pub fn lookup(&self, cell: CellId, action: usize) -> (&[CellId], bool) {
        let k = cell.0 * self.num_actions + action;
        (
            &self.targets[self.offsets[k]..self.offsets[k + 1]],
            self.outside[k],
        )
    }

    pub fn num_edges(&self) -> usize {
        self.targets.len()
    }
}

impl Reachability for TransitionTable {
    fn reachable(
        &self,
        _grid: &Grid,
        cell: CellId,
        action: usize,
        out: &mut ReachableSet,
    ) -> Result<()> {
        let (targets, outside) = self.lookup(cell, action);
        out.clear();
        out.cells.extend_from_slice(targets);
        out.outside = outside;
        Ok(())
    }
}
