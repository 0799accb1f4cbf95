// src/pipeline.rs
//
// End-to-end shield job.
//
// For a `ShieldSpec` and an output directory:
// 1. synthesize the shield for the selected plug-in model
// 2. persist it (`shield.gshd`) and emit the C table (`shield_table.c`)
// 3. run seeded random-agent episodes behind the shield, counting
//    interventions and safety violations (`decisions.jsonl` on request)
// 4. write `summary.json` with artifact hashes
//
// Everything is deterministic given the spec; the summary carries no
// timestamps.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, info_span, warn};

use crate::compile::{emit_c_table, CompiledShield};
use crate::config::ShieldSpec;
use crate::enforce::{CounterSnapshot, ShieldEnforcer};
use crate::logging::{DecisionRecord, DecisionSink, JsonlSink, NoopSink};
use crate::models::{ModelKind, ShieldModel};
use crate::persist::save_shield;
use crate::reachability::ReachabilityFunction;
use crate::shield::ShieldSummary;
use crate::synthesis::{synthesize, SynthesisReport};

pub const SHIELD_FILE: &str = "shield.gshd";
pub const C_TABLE_FILE: &str = "shield_table.c";
pub const DECISIONS_FILE: &str = "decisions.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStats {
    pub episodes: u32,
    pub steps: u64,
    pub enforcement: CounterSnapshot,
    /// Steps whose successor state violated the safety predicate.
    pub safety_violations: u64,
    pub episodes_with_violation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub file: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub shield_id: String,
    pub model: String,
    pub shield: ShieldSummary,
    pub synthesis: SynthesisReport,
    pub rollouts: RolloutStats,
    pub artifacts: Vec<ArtifactRecord>,
}

/// Run the whole job, writing every artifact under `output_dir`.
pub fn run_shield_pipeline(spec: &ShieldSpec, output_dir: &Path) -> Result<PipelineSummary> {
    spec.validate().context("Invalid shield spec")?;
    fs::create_dir_all(output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_dir.display()
        )
    })?;

    let span = info_span!("pipeline", shield_id = %spec.shield_id, model = spec.model.name());
    let _guard = span.enter();

    match &spec.model {
        ModelKind::RandomWalk(model) => run_with_model(spec, model, output_dir),
        ModelKind::CruiseControl(model) => run_with_model(spec, model, output_dir),
    }
}

fn run_with_model<M: ShieldModel>(
    spec: &ShieldSpec,
    model: &M,
    output_dir: &Path,
) -> Result<PipelineSummary> {
    let grid = spec.domain().build().context("Failed to build grid")?;
    let mut reach = ReachabilityFunction::new(model, spec.reachability.samples_per_axis);
    if let Some(disturbance) = model.disturbance().context("Invalid disturbance box")? {
        reach = reach.with_disturbance(
            &disturbance,
            spec.reachability.disturbance_samples_per_axis,
        );
    }

    let synthesized = synthesize(grid, model.action_names(), &reach, model, &spec.synthesis)
        .context("Shield synthesis failed")?;
    let report = synthesized.report().clone();
    let shield = if spec.enforcement.require_converged {
        synthesized
            .into_converged()
            .context("Synthesis did not converge; raise max_passes or set require_converged: false")?
    } else {
        synthesized.acknowledge_incomplete()?
    };

    let shield_path = output_dir.join(SHIELD_FILE);
    save_shield(&shield, &shield_path)
        .with_context(|| format!("Failed to save shield: {}", shield_path.display()))?;

    let compiled = CompiledShield::from_shield(&shield);
    let mut c_source = Vec::new();
    emit_c_table(&compiled, &spec.output.c_prefix, &mut c_source)
        .context("Failed to emit C table")?;
    let c_path = output_dir.join(C_TABLE_FILE);
    atomic_write(&c_path, &c_source)?;

    let rollouts = if spec.output.write_decisions {
        let path = output_dir.join(DECISIONS_FILE);
        let mut sink = JsonlSink::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let stats = run_rollouts(spec, model, &compiled, &mut sink)?;
        sink.flush()
            .with_context(|| format!("Failed to flush {}", path.display()))?;
        stats
    } else {
        run_rollouts(spec, model, &compiled, &mut NoopSink)?
    };

    let mut artifacts = vec![
        artifact_record(&shield_path)?,
        artifact_record(&c_path)?,
    ];
    if spec.output.write_decisions {
        artifacts.push(artifact_record(&output_dir.join(DECISIONS_FILE))?);
    }

    let summary = PipelineSummary {
        shield_id: spec.shield_id.clone(),
        model: model.name().to_string(),
        shield: shield.summary(),
        synthesis: report,
        rollouts,
        artifacts,
    };
    let json =
        serde_json::to_string_pretty(&summary).context("Failed to serialize summary to JSON")?;
    atomic_write(&output_dir.join(SUMMARY_FILE), json.as_bytes())?;

    info!(
        output_dir = %output_dir.display(),
        interventions = summary.rollouts.enforcement.interventions,
        violations = summary.rollouts.safety_violations,
        "shield pipeline finished"
    );
    Ok(summary)
}

/// Uniformly random agent behind the shield, one seeded RNG per episode.
fn run_rollouts<M: ShieldModel, S: DecisionSink>(
    spec: &ShieldSpec,
    model: &M,
    compiled: &CompiledShield,
    sink: &mut S,
) -> Result<RolloutStats> {
    let enforcer = ShieldEnforcer::new(compiled, spec.enforcement.selection);
    let num_actions = compiled.num_actions();
    let mut stats = RolloutStats::default();

    for (episode, seed) in spec.expand_seeds() {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut state = model.initial_state(&mut rng);
        let mut next = vec![0.0; state.len()];
        let mut violated = false;

        for step in 0..spec.rollouts.steps {
            let proposed = rng.gen_range(0..num_actions);
            let decision = enforcer.enforce_with_rng(&state, proposed, &mut rng)?;
            let applied = decision.applied().unwrap_or(proposed);
            let disturbance = model.sample_disturbance(&mut rng)?;
            model.step(&state, applied, &disturbance, &mut next)?;
            let unsafe_after = !model.is_safe(&next)?;

            sink.record(&DecisionRecord {
                episode,
                step,
                state: state.clone(),
                decision,
                unsafe_after,
            })
            .context("Failed to record decision")?;

            stats.steps += 1;
            if unsafe_after {
                stats.safety_violations += 1;
                violated = true;
            }
            std::mem::swap(&mut state, &mut next);
        }

        stats.episodes += 1;
        if violated {
            stats.episodes_with_violation += 1;
            warn!(episode, seed, "episode reached an unsafe state under the shield");
        }
    }

    stats.enforcement = enforcer.counters();
    Ok(stats)
}

fn artifact_record(path: &Path) -> Result<ArtifactRecord> {
    let data =
        fs::read(path).with_context(|| format!("Failed to read artifact: {}", path.display()))?;
    Ok(ArtifactRecord {
        file: file_name(path),
        bytes: data.len() as u64,
        sha256: hex_encode(&Sha256::digest(&data)),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Write data to a file atomically (write to temp, then rename).
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Path has no parent: {}", path.display()))?;
    let temp_path: PathBuf = parent.join(format!(".tmp_{}_{}", std::process::id(), file_name(path)));

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
    file.write_all(data)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file: {}", temp_path.display()))?;

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}
