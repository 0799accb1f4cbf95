// src/synthesis.rs
//
// Fixed-point shield synthesis.
//
// 1. Initialization: every unclassified cell is sampled against the safety
//    predicate. A cell with any unsafe sample gets no actions, every other
//    cell gets all of them. Cells that already carry a label are kept, so
//    synthesis can resume from an earlier shield.
// 2. Passes: each pass reads the labels of the previous pass and writes a
//    fresh label per cell. An allowed action is dropped when one of its
//    successors is outside the grid or has no allowed action left. Actions
//    are never re-added, so the number of useful passes is bounded by
//    cells * actions.
// 3. Stop on the first pass that changes nothing (converged) or when the
//    pass budget is spent (incomplete).
//
// Within a pass every cell writes only its own slot of the next buffer, so
// the per-cell updates can run on rayon workers. Passes are sequential.

use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::actions::ActionSet;
use crate::error::{Result, ShieldError};
use crate::grid::{CellId, CellLabel, Grid};
use crate::model::SafetyPredicate;
use crate::reachability::{Reachability, ReachableSet, TransitionTable};
use crate::sampling::SupportingPoints;
use crate::shield::{validate_action_names, Completeness, Shield};

/// Default pass budget.
pub const DEFAULT_MAX_PASSES: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOptions {
    /// Pass budget. Reaching it yields an incomplete result.
    pub max_passes: u64,
    /// Samples per axis when checking a cell against the safety predicate.
    pub safety_samples_per_axis: usize,
    /// Run per-cell work on the rayon pool.
    pub parallel: bool,
    /// Evaluate reachability once per (cell, action) before iterating.
    pub precompute_transitions: bool,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            safety_samples_per_axis: 2,
            parallel: false,
            precompute_transitions: true,
        }
    }
}

/// Outcome of one fixed-point pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    /// 1-based pass number.
    pub pass: u64,
    pub cells_changed: usize,
    pub actions_removed: usize,
    /// Cells with no allowed action after the pass.
    pub fully_unsafe: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub cells: usize,
    pub actions: usize,
    /// Cells marked unsafe by the safety predicate during initialization.
    pub initially_unsafe: usize,
    pub passes: Vec<PassStats>,
    pub completeness: Completeness,
}

impl SynthesisReport {
    pub fn pass_count(&self) -> u64 {
        self.passes.len() as u64
    }
}

/// Result of `synthesize`. The shield is only reachable through
/// `into_converged` or `acknowledge_incomplete`, so the incomplete case
/// cannot be skipped silently.
#[must_use = "check whether synthesis converged before using the shield"]
#[derive(Debug)]
pub struct Synthesized {
    grid: Grid,
    action_names: Vec<String>,
    report: SynthesisReport,
}

impl Synthesized {
    pub fn completeness(&self) -> Completeness {
        self.report.completeness
    }

    pub fn report(&self) -> &SynthesisReport {
        &self.report
    }

    /// The shield, or `ShieldError::Incomplete` if the budget ran out.
    pub fn into_converged(self) -> Result<Shield> {
        match self.report.completeness {
            Completeness::Converged => self.build(),
            Completeness::Incomplete => Err(ShieldError::Incomplete {
                passes: self.report.pass_count(),
            }),
        }
    }

    /// Accept the labels whatever the completeness. The returned shield
    /// carries the flag.
    pub fn acknowledge_incomplete(self) -> Result<Shield> {
        if self.report.completeness == Completeness::Incomplete {
            warn!(
                passes = self.report.pass_count(),
                "using a shield that did not reach a fixed point"
            );
        }
        self.build()
    }

    fn build(self) -> Result<Shield> {
        let passes = self.report.pass_count();
        Shield::new(
            self.grid,
            self.action_names,
            self.report.completeness,
            passes,
        )
    }
}

/// Synthesize a shield over `grid`.
///
/// `action_names` fixes the action space (`0..action_names.len()`).
/// Collaborator failures abort synthesis; an exhausted pass budget does not.
pub fn synthesize<R, S>(
    mut grid: Grid,
    action_names: Vec<String>,
    reach: &R,
    safety: &S,
    options: &SynthesisOptions,
) -> Result<Synthesized>
where
    R: Reachability,
    S: SafetyPredicate,
{
    validate_action_names(&action_names)?;
    let num_actions = action_names.len();
    let span = info_span!("synthesis", cells = grid.len(), actions = num_actions);
    let _guard = span.enter();
    let started = Instant::now();

    info!(
        dimensions = grid.dimensions(),
        max_passes = options.max_passes,
        parallel = options.parallel,
        "starting shield synthesis"
    );

    let initially_unsafe = initialize(&mut grid, safety, num_actions, options)?;
    debug!(initially_unsafe, "initialization done");

    let report = if options.precompute_transitions {
        let table = TransitionTable::build(&grid, reach, num_actions, options.parallel, |cell| {
            !grid.label(cell).is_fully_unsafe()
        })?;
        iterate(&mut grid, &table, num_actions, initially_unsafe, options)?
    } else {
        iterate(&mut grid, reach, num_actions, initially_unsafe, options)?
    };

    let counts = grid.count_labels();
    info!(
        passes = report.pass_count(),
        completeness = ?report.completeness,
        safe_cells = counts.with_actions,
        unsafe_cells = counts.fully_unsafe,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "shield synthesis finished"
    );

    Ok(Synthesized {
        grid,
        action_names,
        report,
    })
}

/// Label every unclassified cell from the safety predicate. Returns the
/// number of cells that start fully unsafe.
fn initialize<S: SafetyPredicate>(
    grid: &mut Grid,
    safety: &S,
    num_actions: usize,
    options: &SynthesisOptions,
) -> Result<usize> {
    let all = ActionSet::all(num_actions);
    let samples = options.safety_samples_per_axis;
    let current = grid.labels();

    let classify = |cell: CellId| -> Result<CellLabel> {
        let label = current[cell.0];
        if label != CellLabel::Unclassified {
            return Ok(label);
        }
        let bounds = grid.bounds_of(cell);
        // Err(None) stops at the first unsafe sample.
        let scan = SupportingPoints::new(&bounds, samples).try_for_each(|p| {
            match safety.is_safe(p) {
                Ok(true) => Ok(()),
                Ok(false) => Err(None),
                Err(e) => Err(Some(ShieldError::CollaboratorFailure(format!(
                    "safety predicate failed at {p:?}: {e}"
                )))),
            }
        });
        match scan {
            Ok(()) => Ok(CellLabel::Classified(all)),
            Err(None) => Ok(CellLabel::Classified(ActionSet::EMPTY)),
            Err(Some(e)) => Err(e),
        }
    };

    let next: Vec<CellLabel> = if options.parallel {
        (0..grid.len())
            .into_par_iter()
            .map(|i| classify(CellId(i)))
            .collect::<Result<_>>()?
    } else {
        grid.cells().map(classify).collect::<Result<_>>()?
    };

    let newly_unsafe = next
        .iter()
        .zip(current)
        .filter(|(n, c)| **c == CellLabel::Unclassified && n.is_fully_unsafe())
        .count();
    grid.replace_labels(next);
    Ok(newly_unsafe)
}

fn iterate<R: Reachability>(
    grid: &mut Grid,
    reach: &R,
    num_actions: usize,
    initially_unsafe: usize,
    options: &SynthesisOptions,
) -> Result<SynthesisReport> {
    let mut passes = Vec::new();
    let completeness = loop {
        if passes.len() as u64 >= options.max_passes {
            warn!(
                max_passes = options.max_passes,
                "pass budget exhausted before reaching a fixed point"
            );
            break Completeness::Incomplete;
        }

        let (next, mut stats) = run_pass(grid, reach, options.parallel)?;
        stats.pass = passes.len() as u64 + 1;
        debug!(
            pass = stats.pass,
            changed = stats.cells_changed,
            removed = stats.actions_removed,
            fully_unsafe = stats.fully_unsafe,
            "pass complete"
        );
        passes.push(stats);

        if stats.cells_changed == 0 {
            break Completeness::Converged;
        }
        grid.replace_labels(next);
    };

    Ok(SynthesisReport {
        cells: grid.len(),
        actions: num_actions,
        initially_unsafe,
        passes,
        completeness,
    })
}

/// Compute the next labels from the current ones without touching `grid`.
fn run_pass<R: Reachability>(
    grid: &Grid,
    reach: &R,
    parallel: bool,
) -> Result<(Vec<CellLabel>, PassStats)> {
    let prev = grid.labels();

    let update = |cell: CellId, scratch: &mut ReachableSet| -> Result<CellLabel> {
        let allowed = match prev[cell.0] {
            CellLabel::Classified(set) if !set.is_empty() => set,
            other => return Ok(other),
        };
        let mut kept = allowed;
        for action in allowed {
            reach.reachable(grid, cell, action, scratch)?;
            let leads_to_unsafe = scratch.includes_outside()
                || scratch
                    .cells()
                    .iter()
                    .any(|succ| prev[succ.0].is_fully_unsafe());
            if leads_to_unsafe {
                kept.remove(action);
            }
        }
        Ok(CellLabel::Classified(kept))
    };

    let next: Vec<CellLabel> = if parallel {
        (0..grid.len())
            .into_par_iter()
            .map_init(ReachableSet::new, |scratch, i| update(CellId(i), scratch))
            .collect::<Result<_>>()?
    } else {
        let mut scratch = ReachableSet::new();
        grid.cells()
            .map(|cell| update(cell, &mut scratch))
            .collect::<Result<_>>()?
    };

    let mut stats = PassStats {
        pass: 0,
        cells_changed: 0,
        actions_removed: 0,
        fully_unsafe: 0,
    };
    for (old, new) in prev.iter().zip(&next) {
        if old != new {
            stats.cells_changed += 1;
            stats.actions_removed += old.allowed().len() - new.allowed().len();
        }
        if new.is_fully_unsafe() {
            stats.fully_unsafe += 1;
        }
    }
    Ok((next, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::model::{dynamics_fn, safety_fn};
    use crate::reachability::ReachabilityFunction;

    /// Reachability that maps every cell to itself.
    struct Identity;

    impl Reachability for Identity {
        fn reachable(
            &self,
            _grid: &Grid,
            cell: CellId,
            _action: usize,
            out: &mut ReachableSet,
        ) -> Result<()> {
            out.clear();
            out.insert(crate::grid::CellRef::Inside(cell));
            out.finish();
            Ok(())
        }
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("a{i}")).collect()
    }

    fn line() -> Grid {
        Grid::new(vec![1.0], vec![0.0], vec![10.0]).unwrap()
    }

    #[test]
    fn identity_line_converges_in_one_pass() {
        let safety = safety_fn(|s| !(s[0] < 2.0 || s[0] > 8.0));
        let result = synthesize(line(), names(1), &Identity, &safety, &Default::default()).unwrap();
        assert_eq!(result.completeness(), Completeness::Converged);
        assert_eq!(result.report().pass_count(), 1);
        assert_eq!(result.report().initially_unsafe, 4);

        let shield = result.into_converged().unwrap();
        let allowed: Vec<bool> = shield
            .grid()
            .cells()
            .map(|c| !shield.grid().label(c).allowed().is_empty())
            .collect();
        assert_eq!(
            allowed,
            vec![false, false, true, true, true, true, true, true, false, false]
        );
    }

    #[test]
    fn drift_action_is_pruned_backwards() {
        // Action 0 stays put, action 1 moves right by one cell.
        let reach = ReachabilityFunction::new(
            dynamics_fn(|s, a, _, out| {
                out[0] = s[0] + a as f64;
                Ok(())
            }),
            1,
        );
        let safety = safety_fn(|s| s[0] <= 8.0);
        let shield = synthesize(line(), names(2), &reach, &safety, &Default::default())
            .unwrap()
            .into_converged()
            .unwrap();

        for cell in shield.grid().cells() {
            let allowed = shield.grid().label(cell).allowed();
            match cell.0 {
                0..=6 => assert_eq!(allowed, ActionSet::all(2), "cell {}", cell.0),
                7 => assert_eq!(allowed, ActionSet::single(0)),
                _ => assert!(allowed.is_empty()),
            }
        }
    }

    #[test]
    fn budget_exhaustion_is_flagged() {
        // Action 0 always drifts right, so unsafety propagates one cell per pass.
        let reach = ReachabilityFunction::new(
            dynamics_fn(|s, _, _, out| {
                out[0] = s[0] + 1.0;
                Ok(())
            }),
            1,
        );
        let safety = safety_fn(|_| true);
        let options = SynthesisOptions {
            max_passes: 3,
            ..Default::default()
        };
        let result = synthesize(line(), names(1), &reach, &safety, &options).unwrap();
        assert_eq!(result.completeness(), Completeness::Incomplete);
        assert_eq!(result.report().pass_count(), 3);
        assert!(matches!(
            result.into_converged(),
            Err(ShieldError::Incomplete { passes: 3 })
        ));

        let result = synthesize(line(), names(1), &reach, &safety, &options).unwrap();
        let shield = result.acknowledge_incomplete().unwrap();
        assert_eq!(shield.completeness(), Completeness::Incomplete);
        // Cells 7, 8, 9 are gone after three passes; the rest still allow action 0.
        assert_eq!(shield.grid().count_labels().fully_unsafe, 3);
    }

    #[test]
    fn parallel_and_direct_paths_agree() {
        let reach = ReachabilityFunction::new(
            dynamics_fn(|s, a, _, out| {
                out[0] = s[0] + if a == 0 { 0.7 } else { -0.4 };
                Ok(())
            }),
            3,
        );
        let safety = safety_fn(|s| s[0] > 0.5 && s[0] < 9.5);
        let grid = Grid::new(vec![0.25], vec![0.0], vec![10.0]).unwrap();
        let base = synthesize(grid.clone(), names(2), &reach, &safety, &Default::default())
            .unwrap()
            .into_converged()
            .unwrap();
        for (parallel, precompute) in [(true, true), (false, false), (true, false)] {
            let options = SynthesisOptions {
                parallel,
                precompute_transitions: precompute,
                ..Default::default()
            };
            let other = synthesize(grid.clone(), names(2), &reach, &safety, &options)
                .unwrap()
                .into_converged()
                .unwrap();
            assert_eq!(base, other, "parallel={parallel} precompute={precompute}");
        }
    }

    #[test]
    fn safety_failure_aborts() {
        struct Broken;
        impl SafetyPredicate for Broken {
            fn is_safe(&self, _state: &[f64]) -> crate::model::CollaboratorResult<bool> {
                Err(CollaboratorError::new("sensor model missing"))
            }
        }
        let err = synthesize(line(), names(1), &Identity, &Broken, &Default::default()).unwrap_err();
        assert!(matches!(err, ShieldError::CollaboratorFailure(_)));
    }

    #[test]
    fn empty_action_space_is_rejected() {
        let safety = safety_fn(|_| true);
        let err = synthesize(line(), vec![], &Identity, &safety, &Default::default()).unwrap_err();
        assert!(matches!(err, ShieldError::InvalidActionSpace(_)));
    }
}
