//! `AgentController`: executes agent iterations.
//!
//! # Execution model
//!
//! Facts are applied eagerly within an iteration: as each action in a
//! procedure completes, its emitted facts are immediately applied to the
//! iteration state, so later actions in the same procedure observe earlier
//! actions' output. At iteration end, only durable (`session`/`persistent`
//! scope) facts are persisted to the store. Phase transitions are derived
//! only from durable facts, never from iteration-scoped ones, which is what
//! keeps the FSM deterministic across restarts.
//!
//! An action failure short-circuits the remaining actions in that
//! procedure but does not block persistence: facts already applied from
//! actions that ran before the failure are still saved.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::BootstrapConfig;
use crate::context::{IterationContext, LlmClient};
use crate::error::{Result, SlaterError};
use crate::phase::Phase;
use crate::spec::AgentSpec;
use crate::state::{IterationFacts, IterationState};
use crate::store::StateStore;

/// Why a call to [`AgentController::run`] returned without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A completion key appeared in durable state.
    Completed,
    /// A failure key appeared in durable state.
    Failed,
    /// A required user-input key is still missing; call `run` again once
    /// the caller has supplied it.
    PausedForUserInput,
    /// A required state key is still missing.
    PausedForState,
    /// No transition rule matched the current durable fact keys, and the
    /// agent hasn't exited through completion/failure/pause.
    NoTransition,
}

/// Executes iterations of an [`AgentSpec`] against a [`StateStore`].
pub struct AgentController<S: StateStore> {
    spec: AgentSpec,
    agent_id: String,
    bootstrap_config: BootstrapConfig,
    state_store: S,
    llm: Option<Arc<dyn LlmClient>>,
    iteration: u64,
    last_phase: Phase,
}

impl<S: StateStore> AgentController<S> {
    /// Construct a controller and bootstrap initial state. Bootstrap is
    /// idempotent, so constructing a controller against an agent id that
    /// already has state never clobbers prior progress. `llm` is the
    /// injected capability threaded into every iteration's context view;
    /// pass `None` for agents whose procedures never call
    /// [`IterationContextView::llm`](crate::context::IterationContextView::llm).
    pub fn new(
        spec: AgentSpec,
        agent_id: impl Into<String>,
        bootstrap_config: BootstrapConfig,
        state_store: S,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        state_store.bootstrap(&agent_id, &bootstrap_config)?;
        let last_phase = spec.transition_policy.default.clone();
        Ok(Self {
            spec,
            agent_id,
            bootstrap_config,
            state_store,
            llm,
            iteration: 0,
            last_phase,
        })
    }

    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    #[must_use]
    pub fn last_phase(&self) -> &Phase {
        &self.last_phase
    }

    /// Execute iterations until completion, failure, a pause condition, or
    /// a guard limit. Returns the [`StopReason`] on a clean stop; guard
    /// violations (cycle detection, max iterations) are returned as errors.
    pub async fn run(&mut self, max_iterations: u64, max_same_phase: usize) -> Result<StopReason> {
        let mut phase_history: Vec<Phase> = Vec::new();

        loop {
            if self.iteration >= max_iterations {
                return Err(SlaterError::MaxIterationsExceeded {
                    max_iterations: max_iterations as u32,
                });
            }
            self.iteration += 1;

            tracing::info!(iteration = self.iteration, phase = %self.last_phase, "starting iteration");

            phase_history.push(self.last_phase.clone());
            if detect_cycle(&phase_history, max_same_phase) {
                return Err(SlaterError::CycleDetected {
                    phase: self.last_phase.to_string(),
                    count: max_same_phase as u32,
                });
            }

            let ctx = self.build_iteration_context();
            let view = ctx.as_view();

            let persistent = self.state_store.load(&self.agent_id)?;
            let mut iteration_state = IterationState::from_facts(&persistent);
            iteration_state.begin_iteration();

            let template = self
                .spec
                .procedures
                .get(&self.last_phase)
                .ok_or_else(|| SlaterError::MissingProcedure {
                    phase: self.last_phase.to_string(),
                })?
                .clone();

            let actions = template.materialize();
            let mut record = IterationFacts::new(self.iteration, Some(&self.last_phase));

            for action in &actions {
                match action.instruction(&iteration_state, &view).await {
                    Ok(facts) => {
                        iteration_state.apply_facts(&facts);
                        record.record(action.name(), facts);
                    }
                    Err(err) => {
                        tracing::error!(action = action.name(), error = %err, "action failed; remaining actions in this procedure are skipped");
                        break;
                    }
                }
            }

            self.finalize_iteration(&record, &iteration_state)?;

            let durable_facts = iteration_state.persistent_facts();
            let durable_keys = durable_facts.keys();

            if !self.spec.control_policy.completion_keys.is_disjoint(&durable_keys) {
                return Ok(StopReason::Completed);
            }
            if !self.spec.control_policy.failure_keys.is_disjoint(&durable_keys) {
                return Ok(StopReason::Failed);
            }
            if !self
                .spec
                .control_policy
                .user_required_keys
                .is_subset(&durable_keys)
            {
                return Ok(StopReason::PausedForUserInput);
            }
            if !self
                .spec
                .control_policy
                .required_state_keys
                .is_subset(&durable_keys)
            {
                return Ok(StopReason::PausedForState);
            }

            match self.spec.transition_policy.derive_phase(&durable_keys)? {
                Some(next_phase) => self.last_phase = next_phase,
                None => return Ok(StopReason::NoTransition),
            }
        }
    }

    fn build_iteration_context(&self) -> IterationContext {
        let mut meta = BTreeMap::new();
        meta.insert("agent_id".to_string(), Value::from(self.agent_id.clone()));
        meta.insert("iteration".to_string(), Value::from(self.iteration));

        IterationContext {
            config: self.bootstrap_config_as_map(),
            inputs: BTreeMap::new(),
            meta,
            llm: self.llm.clone(),
        }
    }

    fn bootstrap_config_as_map(&self) -> BTreeMap<String, Value> {
        let mut map = self.bootstrap_config.extra.clone();
        if let Some(goal) = &self.bootstrap_config.goal {
            map.insert("goal".to_string(), Value::from(goal.as_str()));
        }
        map
    }

    fn finalize_iteration(&self, record: &IterationFacts, iteration_state: &IterationState) -> Result<()> {
        if record.by_action.is_empty() {
            return Ok(());
        }
        self.state_store
            .save(&self.agent_id, record, &iteration_state.persistent_facts())
    }
}

/// True if the last `max_same_phase` entries of `phase_history` are all the
/// same phase.
fn detect_cycle(phase_history: &[Phase], max_same_phase: usize) -> bool {
    if phase_history.len() < max_same_phase {
        return false;
    }
    let recent = &phase_history[phase_history.len() - max_same_phase..];
    recent.windows(2).all(|w| w[0] == w[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ProcedureTemplate};
    use crate::context::IterationContextView;
    use crate::emission::{Emission, EmissionSpec, EmissionValue};
    use crate::fact::{Fact, FactKind, Facts, Scope};
    use crate::phase::{PhaseRule, PhaseSet};
    use crate::policy::{ControlPolicy, TransitionPolicy};
    use crate::store::InMemoryStateStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct EmitOnce {
        name: String,
        key: String,
        value: Value,
        emits: EmissionSpec,
    }

    impl EmitOnce {
        fn new(name: &str, key: &str, value: Value, scope: Scope) -> Self {
            let emits = EmissionSpec::new().with_leaf(key, Emission::new(scope, FactKind::Progress));
            Self {
                name: name.to_string(),
                key: key.to_string(),
                value,
                emits,
            }
        }
    }

    #[async_trait]
    impl Action for EmitOnce {
        fn name(&self) -> &str {
            &self.name
        }

        fn emits(&self) -> &EmissionSpec {
            &self.emits
        }

        async fn instruction(&self, _state: &IterationState, _ctx: &IterationContextView) -> Result<Facts> {
            let mut values = BTreeMap::new();
            values.insert(self.key.clone(), EmissionValue::Value(self.value.clone()));
            self.emits.build(values)
        }
    }

    struct AlwaysFails {
        emits: EmissionSpec,
    }

    #[async_trait]
    impl Action for AlwaysFails {
        fn name(&self) -> &str {
            "AlwaysFails"
        }

        fn emits(&self) -> &EmissionSpec {
            &self.emits
        }

        async fn instruction(&self, _state: &IterationState, _ctx: &IterationContextView) -> Result<Facts> {
            Err(SlaterError::ActionFailure {
                action: "AlwaysFails".to_string(),
                reason: "simulated failure".to_string(),
            })
        }
    }

    fn phase(set: &PhaseSet, name: &str) -> Phase {
        set.iter().find(|p| p.as_str() == name).expect("phase exists").clone()
    }

    #[tokio::test]
    async fn happy_path_two_phases() {
        let phase_set = PhaseSet::create(&["GATHER", "PROCESS"]).expect("valid");
        let gather = phase(&phase_set, "GATHER");
        let process = phase(&phase_set, "PROCESS");

        let gather_action = Arc::new(EmitOnce::new("gather", "data_ready", json!(true), Scope::Session));
        let process_action = Arc::new(EmitOnce::new("process", "task_complete", json!(true), Scope::Session));

        let mut procedures = BTreeMap::new();
        procedures.insert(gather.clone(), ProcedureTemplate::new("gather", vec![gather_action]));
        procedures.insert(process.clone(), ProcedureTemplate::new("process", vec![process_action]));

        let transition = TransitionPolicy::new(
            vec![PhaseRule::new(process).when_all(["data_ready"])],
            gather,
        );
        let control = ControlPolicy::new().completion_keys(["task_complete"]);

        let spec = AgentSpec::new("demo", "1.0.0", phase_set, control, transition, procedures, false)
            .expect("valid spec");

        let store = InMemoryStateStore::new();
        let mut controller =
            AgentController::new(spec, "agent-1", BootstrapConfig::default(), store, None).expect("controller");

        let outcome = controller.run(10, 3).await.expect("run succeeds");
        assert_eq!(outcome, StopReason::Completed);
        assert_eq!(controller.iteration(), 2);
    }

    #[tokio::test]
    async fn iteration_scoped_fact_does_not_survive_save() {
        let phase_set = PhaseSet::create(&["START"]).expect("valid");
        let start = phase(&phase_set, "START");

        let temp_action = Arc::new(EmitOnce::new("emit_temp", "temp", json!("x"), Scope::Iteration));
        let done_action = Arc::new(EmitOnce::new("emit_done", "task_complete", json!(true), Scope::Session));

        let mut procedures = BTreeMap::new();
        procedures.insert(
            start.clone(),
            ProcedureTemplate::new("start", vec![temp_action, done_action]),
        );

        let control = ControlPolicy::new().completion_keys(["task_complete"]);
        let transition = TransitionPolicy::new(vec![], start);

        let spec = AgentSpec::new("demo", "1.0.0", phase_set, control, transition, procedures, false)
            .expect("valid spec");

        let store = InMemoryStateStore::new();
        let mut controller =
            AgentController::new(spec, "agent-1", BootstrapConfig::default(), store, None).expect("controller");

        controller.run(10, 3).await.expect("run succeeds");
        let loaded = controller.state_store.load("agent-1").expect("load");
        let flat = loaded.flatten();
        assert!(flat.contains_key("task_complete"));
        assert!(!flat.contains_key("temp"));
    }

    #[tokio::test]
    async fn cycle_detection_raises_after_max_same_phase() {
        let phase_set = PhaseSet::create(&["STUCK"]).expect("valid");
        let stuck = phase(&phase_set, "STUCK");

        let action = Arc::new(EmitOnce::new("still_going", "still_going", json!(true), Scope::Session));

        let mut procedures = BTreeMap::new();
        procedures.insert(stuck.clone(), ProcedureTemplate::new("stuck", vec![action]));

        let transition = TransitionPolicy::new(
            vec![PhaseRule::new(stuck.clone()).when_all(["still_going"])],
            stuck,
        );
        let spec = AgentSpec::new(
            "demo",
            "1.0.0",
            phase_set,
            ControlPolicy::new(),
            transition,
            procedures,
            false,
        )
        .expect("valid spec");

        let store = InMemoryStateStore::new();
        let mut controller =
            AgentController::new(spec, "agent-1", BootstrapConfig::default(), store, None).expect("controller");

        let err = controller.run(10, 3).await.unwrap_err();
        assert!(matches!(err, SlaterError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn action_failure_does_not_block_persistence_of_earlier_facts() {
        let phase_set = PhaseSet::create(&["START"]).expect("valid");
        let start = phase(&phase_set, "START");

        let ok_action = Arc::new(EmitOnce::new("ok", "progress", json!(true), Scope::Session));
        let failing_action: Arc<dyn Action> = Arc::new(AlwaysFails {
            emits: EmissionSpec::new(),
        });

        let mut procedures = BTreeMap::new();
        procedures.insert(
            start.clone(),
            ProcedureTemplate::new("start", vec![ok_action, failing_action]),
        );

        let transition = TransitionPolicy::new(vec![], start);
        let spec = AgentSpec::new(
            "demo",
            "1.0.0",
            phase_set,
            ControlPolicy::new(),
            transition,
            procedures,
            false,
        )
        .expect("valid spec");

        let store = InMemoryStateStore::new();
        let mut controller =
            AgentController::new(spec, "agent-1", BootstrapConfig::default(), store, None).expect("controller");

        let outcome = controller.run(1, 3).await.expect("first iteration doesn't error");
        assert_eq!(outcome, StopReason::NoTransition);

        let loaded = controller.state_store.load("agent-1").expect("load");
        assert!(loaded.flatten().contains_key("progress"));
    }
}
