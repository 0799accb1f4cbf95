//! Enforcement against a synthesized shield: the enforcer never lets a
//! disallowed action through and its counters match what it returned.

use gridshield::models::random_walk::{FAST, SLOW};
use gridshield::{
    load_shield, save_shield, synthesize, CompiledShield, ConstantPolicy, Decision, Grid, Policy,
    RandomWalk, ReachabilityFunction, SelectionPolicy, Shield, ShieldEnforcer, ShieldModel,
    ShieldedPolicy, SynthesisOptions,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

fn random_walk_shield() -> Shield {
    let model = RandomWalk::default();
    let grid = Grid::new(vec![0.025, 0.025], vec![0.0, 0.0], vec![1.45, 1.2]).unwrap();
    let disturbance = model.disturbance().unwrap().unwrap();
    let reach = ReachabilityFunction::new(&model, 2).with_disturbance(&disturbance, 2);
    synthesize(
        grid,
        model.action_names(),
        &reach,
        &model,
        &SynthesisOptions::default(),
    )
    .unwrap()
    .into_converged()
    .unwrap()
}

#[test]
fn applied_actions_are_always_allowed() {
    let shield = random_walk_shield();
    let compiled = CompiledShield::from_shield(&shield);

    for selection in [SelectionPolicy::FirstAllowed, SelectionPolicy::Random] {
        let enforcer = ShieldEnforcer::new(&compiled, selection);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut corrected = 0;
        let mut blocked = 0;

        for _ in 0..2_000 {
            // Includes states beyond the grid, which are clamped.
            let state = [rng.gen_range(-0.2..1.7), rng.gen_range(-0.2..1.4)];
            let proposed = rng.gen_range(0..2);
            let allowed = enforcer.allowed(&state).unwrap();

            match enforcer.enforce_with_rng(&state, proposed, &mut rng).unwrap() {
                Decision::Unchanged { action } => {
                    assert_eq!(action, proposed);
                    assert!(allowed.contains(action));
                }
                Decision::Corrected { proposed: p, applied } => {
                    assert_eq!(p, proposed);
                    assert!(!allowed.contains(proposed));
                    assert!(allowed.contains(applied));
                    corrected += 1;
                }
                Decision::NoSafeAction { .. } => {
                    assert!(allowed.is_empty());
                    blocked += 1;
                }
            }
        }

        let counters = enforcer.counters();
        assert_eq!(counters.decisions, 2_000);
        assert_eq!(counters.interventions, corrected);
        assert_eq!(counters.no_safe_action, blocked);
        assert!(corrected > 0, "{selection:?} never intervened");
    }
}

#[test]
fn enforcer_agrees_with_the_shield_inside_the_grid() {
    let shield = random_walk_shield();
    let compiled = CompiledShield::from_shield(&shield);
    let enforcer = ShieldEnforcer::new(&compiled, SelectionPolicy::FirstAllowed);
    for cell in shield.grid().cells() {
        let centre = shield.grid().bounds_of(cell).center();
        assert_eq!(
            enforcer.allowed(&centre).unwrap(),
            shield.grid().label(cell).allowed()
        );
    }
}

#[test]
fn slow_agent_is_pushed_to_fast_near_the_deadline() {
    let shield = random_walk_shield();
    let compiled = CompiledShield::from_shield(&shield);
    let policy = ShieldedPolicy::new(
        ConstantPolicy(SLOW),
        ShieldEnforcer::new(&compiled, SelectionPolicy::FirstAllowed),
    );

    // Plenty of time left: the agent keeps its choice.
    assert_eq!(policy.act(&[0.01, 0.01]), SLOW);
    // Halfway with little time left, slow is no longer allowed.
    let late = [0.5, 0.85];
    if shield.allowed_at(&late).contains(FAST) {
        assert_eq!(policy.act(&late), FAST);
        assert_eq!(policy.enforcer().counters().interventions, 1);
    } else {
        assert_eq!(policy.act(&late), SLOW);
        assert_eq!(policy.enforcer().counters().no_safe_action, 1);
    }
}

#[test]
fn reloaded_shield_enforces_identically() {
    let shield = random_walk_shield();
    let dir = tempdir().unwrap();
    let path = dir.path().join("rw.gshd");
    save_shield(&shield, &path).unwrap();
    let reloaded = load_shield(&path).unwrap();

    let a = CompiledShield::from_shield(&shield);
    let b = CompiledShield::from_shield(&reloaded);
    assert_eq!(a.masks(), b.masks());

    let ea = ShieldEnforcer::new(&a, SelectionPolicy::Random);
    let eb = ShieldEnforcer::new(&b, SelectionPolicy::Random);
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for _ in 0..500 {
        let state = [rng.gen_range(0.0..1.45), rng.gen_range(0.0..1.2)];
        let proposed = rng.gen_range(0..2);
        assert_eq!(
            ea.enforce(&state, proposed).unwrap(),
            eb.enforce(&state, proposed).unwrap()
        );
    }
    assert_eq!(ea.counters(), eb.counters());
}
