// src/enforce.rs
//
// Runtime enforcement of a compiled shield.
//
// Each decision clamps the observed state into the grid, looks up the
// allowed actions of its cell and either passes the agent's proposal
// through or replaces it. The enforcer only reads the shield; counters are
// atomics so one enforcer can be shared across threads.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::actions::ActionSet;
use crate::compile::CompiledShield;
use crate::error::{Result, ShieldError};
use crate::model::Policy;

/// How a replacement action is chosen when the proposal is not allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Lowest-indexed allowed action.
    #[default]
    FirstAllowed,
    /// Uniform among allowed actions. With `enforce_with_rng` the caller's
    /// RNG decides; plain `enforce` picks the allowed action at position
    /// `proposed % allowed.len()` so the result stays reproducible.
    Random,
}

/// Outcome of one enforcement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Unchanged { action: usize },
    Corrected { proposed: usize, applied: usize },
    /// The cell allows nothing. The caller decides what to do.
    NoSafeAction { proposed: usize },
}

impl Decision {
    /// Action to execute, or `None` when no action is safe.
    pub fn applied(&self) -> Option<usize> {
        match *self {
            Decision::Unchanged { action } => Some(action),
            Decision::Corrected { applied, .. } => Some(applied),
            Decision::NoSafeAction { .. } => None,
        }
    }

    pub fn is_intervention(&self) -> bool {
        matches!(self, Decision::Corrected { .. })
    }
}

#[derive(Debug, Default)]
pub struct EnforcementCounters {
    decisions: AtomicU64,
    interventions: AtomicU64,
    no_safe_action: AtomicU64,
}

impl EnforcementCounters {
    fn record(&self, decision: &Decision) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
        match decision {
            Decision::Unchanged { .. } => {}
            Decision::Corrected { .. } => {
                self.interventions.fetch_add(1, Ordering::Relaxed);
            }
            Decision::NoSafeAction { .. } => {
                self.no_safe_action.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            decisions: self.decisions.load(Ordering::Relaxed),
            interventions: self.interventions.load(Ordering::Relaxed),
            no_safe_action: self.no_safe_action.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.decisions.store(0, Ordering::Relaxed);
        self.interventions.store(0, Ordering::Relaxed);
        self.no_safe_action.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub decisions: u64,
    pub interventions: u64,
    pub no_safe_action: u64,
}

#[derive(Debug)]
pub struct ShieldEnforcer<'s> {
    shield: &'s CompiledShield,
    selection: SelectionPolicy,
    counters: EnforcementCounters,
}

impl<'s> ShieldEnforcer<'s> {
    pub fn new(shield: &'s CompiledShield, selection: SelectionPolicy) -> Self {
        Self {
            shield,
            selection,
            counters: EnforcementCounters::default(),
        }
    }

    pub fn shield(&self) -> &'s CompiledShield {
        self.shield
    }

    pub fn selection(&self) -> SelectionPolicy {
        self.selection
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn reset_counters(&self) {
        self.counters.reset();
    }

    /// Allowed actions for `state` after clamping it into the grid.
    pub fn allowed(&self, state: &[f64]) -> Result<ActionSet> {
        let index = self.shield.clamped_index(state)?;
        Ok(self.shield.mask_at(index))
    }

    pub fn enforce(&self, state: &[f64], proposed: usize) -> Result<Decision> {
        self.decide(state, proposed, |allowed| match self.selection {
            SelectionPolicy::FirstAllowed => allowed.first(),
            SelectionPolicy::Random => allowed.nth(proposed % allowed.len()),
        })
    }

    /// Like `enforce`, drawing random replacements from `rng`.
    pub fn enforce_with_rng<R: Rng>(
        &self,
        state: &[f64],
        proposed: usize,
        rng: &mut R,
    ) -> Result<Decision> {
        self.decide(state, proposed, |allowed| match self.selection {
            SelectionPolicy::FirstAllowed => allowed.first(),
            SelectionPolicy::Random => allowed.nth(rng.gen_range(0..allowed.len())),
        })
    }

    fn decide(
        &self,
        state: &[f64],
        proposed: usize,
        choose: impl FnOnce(ActionSet) -> Option<usize>,
    ) -> Result<Decision> {
        let num_actions = self.shield.num_actions();
        if proposed >= num_actions {
            return Err(ShieldError::InvalidAction {
                action: proposed,
                num_actions,
            });
        }
        let allowed = self.allowed(state)?;

        let decision = if allowed.is_empty() {
            Decision::NoSafeAction { proposed }
        } else if allowed.contains(proposed) {
            Decision::Unchanged { action: proposed }
        } else {
            match choose(allowed) {
                Some(applied) => Decision::Corrected { proposed, applied },
                None => Decision::NoSafeAction { proposed },
            }
        };
        self.counters.record(&decision);
        Ok(decision)
    }
}

/// An agent policy running behind a shield.
///
/// When the shield allows nothing, or the state cannot be resolved, the
/// agent's own proposal is executed.
#[derive(Debug)]
pub struct ShieldedPolicy<'s, P> {
    inner: P,
    enforcer: ShieldEnforcer<'s>,
}

impl<'s, P: Policy> ShieldedPolicy<'s, P> {
    pub fn new(inner: P, enforcer: ShieldEnforcer<'s>) -> Self {
        Self { inner, enforcer }
    }

    pub fn enforcer(&self) -> &ShieldEnforcer<'s> {
        &self.enforcer
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    /// Query the agent and shield its proposal.
    pub fn decide(&self, state: &[f64]) -> Result<Decision> {
        self.enforcer.enforce(state, self.inner.act(state))
    }
}

impl<P: Policy> Policy for ShieldedPolicy<'_, P> {
    fn act(&self, state: &[f64]) -> usize {
        let proposed = self.inner.act(state);
        match self.enforcer.enforce(state, proposed) {
            Ok(decision) => decision.applied().unwrap_or(proposed),
            Err(err) => {
                warn!(error = %err, proposed, "enforcement failed, passing proposal through");
                proposed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellId, Grid};
    use crate::model::ConstantPolicy;
    use crate::shield::{Completeness, Shield};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Cell 0 = [0, 1) allows {0, 1}; cell 1 = [1, 2) allows {1}.
    fn two_cell() -> CompiledShield {
        let mut grid = Grid::new(vec![1.0], vec![0.0], vec![2.0]).unwrap();
        grid.set_actions(CellId(0), ActionSet::all(2));
        grid.set_actions(CellId(1), ActionSet::single(1));
        let shield = Shield::new(
            grid,
            vec!["stay".into(), "go".into()],
            Completeness::Converged,
            1,
        )
        .unwrap();
        CompiledShield::from_shield(&shield)
    }

    #[test]
    fn two_cell_enforcement() {
        let compiled = two_cell();
        let enforcer = ShieldEnforcer::new(&compiled, SelectionPolicy::FirstAllowed);

        assert_eq!(
            enforcer.enforce(&[1.5], 0).unwrap(),
            Decision::Corrected {
                proposed: 0,
                applied: 1
            }
        );
        assert_eq!(
            enforcer.enforce(&[0.5], 0).unwrap(),
            Decision::Unchanged { action: 0 }
        );

        let c = enforcer.counters();
        assert_eq!(c.decisions, 2);
        assert_eq!(c.interventions, 1);
        assert_eq!(c.no_safe_action, 0);
    }

    #[test]
    fn clamps_out_of_domain_states() {
        let compiled = two_cell();
        let enforcer = ShieldEnforcer::new(&compiled, SelectionPolicy::FirstAllowed);
        assert_eq!(
            enforcer.enforce(&[-5.0], 0).unwrap(),
            Decision::Unchanged { action: 0 }
        );
        assert_eq!(enforcer.enforce(&[50.0], 0).unwrap().applied(), Some(1));
    }

    #[test]
    fn rejects_bad_inputs() {
        let compiled = two_cell();
        let enforcer = ShieldEnforcer::new(&compiled, SelectionPolicy::FirstAllowed);
        assert!(matches!(
            enforcer.enforce(&[f64::NAN], 0),
            Err(ShieldError::InvalidState(_))
        ));
        assert!(matches!(
            enforcer.enforce(&[0.5, 0.5], 0),
            Err(ShieldError::InvalidState(_))
        ));
        assert!(matches!(
            enforcer.enforce(&[0.5], 2),
            Err(ShieldError::InvalidAction {
                action: 2,
                num_actions: 2
            })
        ));
        assert_eq!(enforcer.counters().decisions, 0);
    }

    #[test]
    fn no_safe_action_is_reported() {
        let mut grid = Grid::new(vec![1.0], vec![0.0], vec![1.0]).unwrap();
        grid.set_actions(CellId(0), ActionSet::EMPTY);
        let shield = Shield::new(grid, vec!["a".into()], Completeness::Converged, 1).unwrap();
        let compiled = CompiledShield::from_shield(&shield);
        let enforcer = ShieldEnforcer::new(&compiled, SelectionPolicy::Random);

        let d = enforcer.enforce(&[0.2], 0).unwrap();
        assert_eq!(d, Decision::NoSafeAction { proposed: 0 });
        assert_eq!(d.applied(), None);
        assert_eq!(enforcer.counters().no_safe_action, 1);
    }

    #[test]
    fn random_selection_stays_within_allowed() {
        let mut grid = Grid::new(vec![1.0], vec![0.0], vec![1.0]).unwrap();
        grid.set_actions(CellId(0), ActionSet::from_bits(0b1010));
        let names = (0..4).map(|i| format!("a{i}")).collect();
        let shield = Shield::new(grid, names, Completeness::Converged, 1).unwrap();
        let compiled = CompiledShield::from_shield(&shield);
        let enforcer = ShieldEnforcer::new(&compiled, SelectionPolicy::Random);

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut seen = ActionSet::EMPTY;
        for _ in 0..64 {
            let applied = enforcer
                .enforce_with_rng(&[0.5], 0, &mut rng)
                .unwrap()
                .applied()
                .unwrap();
            seen.insert(applied);
        }
        assert_eq!(seen, ActionSet::from_bits(0b1010));

        // Without an RNG the choice is keyed on the proposal.
        assert_eq!(enforcer.enforce(&[0.5], 0).unwrap().applied(), Some(1));
        assert_eq!(enforcer.enforce(&[0.5], 2).unwrap().applied(), Some(1));
        let d = enforcer.enforce(&[0.5], 0).unwrap();
        assert_eq!(d, enforcer.enforce(&[0.5], 0).unwrap());
    }

    #[test]
    fn shielded_policy_overrides_agent() {
        let compiled = two_cell();
        let policy = ShieldedPolicy::new(
            ConstantPolicy(0),
            ShieldEnforcer::new(&compiled, SelectionPolicy::FirstAllowed),
        );
        assert_eq!(policy.act(&[0.5]), 0);
        assert_eq!(policy.act(&[1.5]), 1);
        assert_eq!(policy.enforcer().counters().interventions, 1);
    }

    #[test]
    fn enforcer_is_shareable_across_threads() {
        let compiled = two_cell();
        let enforcer = ShieldEnforcer::new(&compiled, SelectionPolicy::FirstAllowed);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        enforcer.enforce(&[1.5], 0).unwrap();
                    }
                });
            }
        });
        assert_eq!(enforcer.counters().interventions, 400);
    }
}
