//! Demonstration agent: wires the action set in `actions.rs` into a single
//! runnable [`AgentSpec`] so the binary target can exercise the controller
//! end to end.
//!
//! Nothing here is core surface. A different embedder would supply its own
//! phases, procedures, and actions; this module exists only so `slater run`
//! has something to run without requiring a caller to assemble a spec by
//! hand first.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::action::{Action, ProcedureTemplate};
use crate::actions::{AnalyzeRepo, ApplyPatch, Finalize, GatherContext, ProposePlan, Validate};
use crate::config::LlmConfig;
use crate::context::LlmClient;
use crate::error::Result;
use crate::phase::{Phase, PhaseRule, PhaseSet};
use crate::policy::{ControlPolicy, TransitionPolicy};
use crate::spec::AgentSpec;

/// Canned, deterministic stand-in for a real model backend. Never makes a
/// network call; derives a short plan from whatever goal text it's handed so
/// `slater run` produces a plausible-looking artifact without any external
/// dependency.
pub struct FakeLlmClient;

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn chat(&self, _model: &str, messages: &[(String, String)]) -> anyhow::Result<String> {
        let goal = messages
            .iter()
            .rev()
            .find(|(role, _)| role == "user")
            .map(|(_, content)| content.clone())
            .unwrap_or_else(|| "the stated goal".to_string());

        Ok(format!(
            "Survey the code paths touched by: {goal}\n\
             Draft the smallest change that satisfies the goal\n\
             Add or update tests covering the change\n\
             Review the diff for scope creep before shipping"
        ))
    }
}

/// Decide whether to attach the demonstration LLM client. An explicit
/// `fake`/`test`/`mock` provider means the caller wants to exercise the
/// no-client path, so no client is attached. In every other case —
/// including an unconfigured agent, or a config naming a real provider this
/// crate has no client for — the demonstration client is attached so
/// `propose_plan` has something to call. A real embedder would instead
/// construct its own provider-specific client here.
#[must_use]
pub fn llm_client_for(llm: &Option<LlmConfig>) -> Option<Arc<dyn LlmClient>> {
    match llm {
        Some(cfg) if !cfg.needs_client() => None,
        _ => Some(Arc::new(FakeLlmClient)),
    }
}

fn phase(set: &PhaseSet, name: &str) -> Phase {
    set.iter()
        .find(|p| p.as_str() == name)
        .unwrap_or_else(|| panic!("demo phase set is missing '{name}'"))
        .clone()
}

fn procedure(name: &str, actions: Vec<Arc<dyn Action>>) -> ProcedureTemplate {
    ProcedureTemplate::new(name, actions)
}

/// Build the demonstration agent: gather repo context, analyze it, ask the
/// LLM for a plan, apply it, validate the result, then finalize. Linear
/// phase chain, one action per phase, matching the reference agent's
/// `GatherContext → AnalyzeRepo → ProposePlan → ApplyPatch → Validate →
/// Finalize` sequence one phase at a time rather than as a single procedure,
/// so each step's completion is independently observable in the phase
/// history and audit log.
pub fn build_demo_spec(validate_emissions: bool) -> Result<AgentSpec> {
    let phases = PhaseSet::create(&["GATHER", "ANALYZE", "PLAN", "APPLY", "VALIDATE", "DONE"])
        .expect("demo phase names are valid by construction");

    let gather = phase(&phases, "GATHER");
    let analyze = phase(&phases, "ANALYZE");
    let plan = phase(&phases, "PLAN");
    let apply = phase(&phases, "APPLY");
    let validate = phase(&phases, "VALIDATE");
    let done = phase(&phases, "DONE");

    let mut procedures = BTreeMap::new();
    procedures.insert(gather.clone(), procedure("gather", vec![Arc::new(GatherContext::default())]));
    procedures.insert(analyze.clone(), procedure("analyze", vec![Arc::new(AnalyzeRepo::default())]));
    procedures.insert(plan.clone(), procedure("plan", vec![Arc::new(ProposePlan::default())]));
    procedures.insert(apply.clone(), procedure("apply", vec![Arc::new(ApplyPatch::default())]));
    procedures.insert(validate.clone(), procedure("validate", vec![Arc::new(Validate::default())]));
    procedures.insert(done.clone(), procedure("finalize", vec![Arc::new(Finalize::default())]));

    let transition_policy = TransitionPolicy::new(
        vec![
            PhaseRule::new(analyze).when_all(["context_ready"]),
            PhaseRule::new(plan).when_all(["analysis_ready"]),
            PhaseRule::new(apply).when_all(["plan_ready"]),
            PhaseRule::new(validate).when_all(["patch_applied"]),
            PhaseRule::new(done).when_all(["validation_passed"]),
        ],
        gather,
    );

    let control_policy = ControlPolicy::new()
        .completion_keys(["task_complete"])
        .user_required_keys(["goal"]);

    AgentSpec::new(
        "slater-demo",
        env!("CARGO_PKG_VERSION"),
        phases,
        control_policy,
        transition_policy,
        procedures,
        validate_emissions,
    )
}
