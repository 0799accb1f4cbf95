// src/model.rs
//
// Collaborator interfaces supplied by the caller.
//
// - Dynamics: one-step transition (state, action, disturbance) -> next state
// - SafetyPredicate: classifies raw states as safe or unsafe
// - Policy: the agent being shielded
//
// All three are used through generics so plug-in models are statically
// dispatched. Closures can be adapted with `dynamics_fn`, `safety_fn` and
// `policy_fn`.

use crate::error::CollaboratorError;

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// One-step dynamics of the controlled system.
///
/// Implementations must be pure: the same inputs always produce the same
/// successor. `disturbance` has the dimensionality of the model's
/// disturbance box and is empty when the model has none.
pub trait Dynamics: Sync {
    fn step(
        &self,
        state: &[f64],
        action: usize,
        disturbance: &[f64],
        next: &mut [f64],
    ) -> CollaboratorResult<()>;
}

/// Safety predicate over raw states. `Ok(true)` means safe.
pub trait SafetyPredicate: Sync {
    fn is_safe(&self, state: &[f64]) -> CollaboratorResult<bool>;
}

/// An agent choosing actions from raw states.
pub trait Policy {
    fn act(&self, state: &[f64]) -> usize;
}

impl<D: Dynamics + ?Sized> Dynamics for &D {
    fn step(
        &self,
        state: &[f64],
        action: usize,
        disturbance: &[f64],
        next: &mut [f64],
    ) -> CollaboratorResult<()> {
        (**self).step(state, action, disturbance, next)
    }
}

impl<S: SafetyPredicate + ?Sized> SafetyPredicate for &S {
    fn is_safe(&self, state: &[f64]) -> CollaboratorResult<bool> {
        (**self).is_safe(state)
    }
}

/// Dynamics backed by a closure.
#[derive(Debug, Clone, Copy)]
pub struct FnDynamics<F>(F);

pub fn dynamics_fn<F>(f: F) -> FnDynamics<F>
where
    F: Fn(&[f64], usize, &[f64], &mut [f64]) -> CollaboratorResult<()> + Sync,
{
    FnDynamics(f)
}

impl<F> Dynamics for FnDynamics<F>
where
    F: Fn(&[f64], usize, &[f64], &mut [f64]) -> CollaboratorResult<()> + Sync,
{
    fn step(
        &self,
        state: &[f64],
        action: usize,
        disturbance: &[f64],
        next: &mut [f64],
    ) -> CollaboratorResult<()> {
        (self.0)(state, action, disturbance, next)
    }
}

/// Safety predicate backed by an infallible closure.
#[derive(Debug, Clone, Copy)]
pub struct FnSafety<F>(F);

pub fn safety_fn<F>(f: F) -> FnSafety<F>
where
    F: Fn(&[f64]) -> bool + Sync,
{
    FnSafety(f)
}

impl<F> SafetyPredicate for FnSafety<F>
where
    F: Fn(&[f64]) -> bool + Sync,
{
    fn is_safe(&self, state: &[f64]) -> CollaboratorResult<bool> {
        Ok((self.0)(state))
    }
}

/// Policy backed by a closure.
#[derive(Debug, Clone, Copy)]
pub struct FnPolicy<F>(F);

pub fn policy_fn<F>(f: F) -> FnPolicy<F>
where
    F: Fn(&[f64]) -> usize,
{
    FnPolicy(f)
}

impl<F> Policy for FnPolicy<F>
where
    F: Fn(&[f64]) -> usize,
{
    fn act(&self, state: &[f64]) -> usize {
        (self.0)(state)
    }
}

/// Policy that always proposes the same action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantPolicy(pub usize);

impl Policy for ConstantPolicy {
    fn act(&self, _state: &[f64]) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_adapters_forward() {
        let d = dynamics_fn(|s, a, w, out| {
            out[0] = s[0] + a as f64 + w.first().copied().unwrap_or(0.0);
            Ok(())
        });
        let mut next = [0.0];
        d.step(&[1.0], 2, &[0.5], &mut next).unwrap();
        assert_eq!(next, [3.5]);

        let s = safety_fn(|x| x[0] < 3.0);
        assert!(s.is_safe(&[1.0]).unwrap());
        assert!(!s.is_safe(&[3.5]).unwrap());

        let p = policy_fn(|x| if x[0] > 0.0 { 1 } else { 0 });
        assert_eq!(p.act(&[2.0]), 1);
        assert_eq!(ConstantPolicy(4).act(&[0.0]), 4);
    }

    #[test]
    fn failing_collaborator_reports_error() {
        let d = dynamics_fn(|_, _, _, _| Err(CollaboratorError::new("solver diverged")));
        let mut next = [0.0];
        let err = d.step(&[0.0], 0, &[], &mut next).unwrap_err();
        assert_eq!(err.to_string(), "solver diverged");
    }
}
