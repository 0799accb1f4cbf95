//! Gridshield: grid-based safety shields for controllers over continuous
//! state spaces.
//!
//! A shield is computed offline and enforced at runtime:
//!
//! - **Grid** (`grid`): the bounded state space cut into axis-aligned,
//!   half-open cells, each labelled with the actions allowed there.
//!
//! - **Reachability** (`reachability`): sampled one-step successors of a
//!   (cell, action) pair under caller-supplied dynamics and a bounded
//!   disturbance, plus an in-memory transition table.
//!
//! - **Synthesis** (`synthesis`): safety-predicate initialization followed
//!   by fixed-point passes that strip actions leading outside the grid or
//!   into cells with nothing left. The result must be explicitly accepted
//!   when the pass budget runs out.
//!
//! - **Persistence and compilation** (`persist`, `compile`): a versioned,
//!   checksummed binary container and a flat lookup table that can be
//!   emitted as C source.
//!
//! - **Enforcement** (`enforce`): overrides unsafe agent actions and counts
//!   interventions.
//!
//! Plug-in models (`models`), YAML job specs (`config`), telemetry sinks
//! (`logging`) and the end-to-end job (`pipeline`) sit on top.

pub mod actions;
pub mod bounds;
pub mod compile;
pub mod config;
pub mod enforce;
pub mod error;
pub mod grid;
pub mod logging;
pub mod model;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod reachability;
pub mod sampling;
pub mod shield;
pub mod synthesis;

// --- Re-exports for ergonomic external use ---------------------------------

pub use actions::{ActionSet, MAX_ACTIONS};
pub use bounds::Bounds;
pub use compile::{emit_c_table, CompiledShield};
pub use config::{ConfigError, ShieldSpec};
pub use enforce::{
    CounterSnapshot, Decision, EnforcementCounters, SelectionPolicy, ShieldEnforcer,
    ShieldedPolicy,
};
pub use error::{CollaboratorError, Result, ShieldError};
pub use grid::{CellId, CellLabel, CellRef, Grid, LabelCounts, Partition};
pub use logging::{init_tracing, DecisionRecord, DecisionSink, JsonlSink, NoopSink};
pub use model::{
    dynamics_fn, policy_fn, safety_fn, CollaboratorResult, ConstantPolicy, Dynamics, Policy,
    SafetyPredicate,
};
pub use models::{CruiseControl, GridDomain, ModelKind, RandomWalk, ShieldModel};
pub use persist::{load_shield, read_shield, save_shield, write_shield, FORMAT_VERSION};
pub use pipeline::{run_shield_pipeline, PipelineSummary, RolloutStats};
pub use reachability::{Reachability, ReachabilityFunction, ReachableSet, TransitionTable};
pub use sampling::SupportingPoints;
pub use shield::{ActionCount, Completeness, Shield, ShieldSummary};
pub use synthesis::{
    synthesize, PassStats, SynthesisOptions, SynthesisReport, Synthesized, DEFAULT_MAX_PASSES,
};
