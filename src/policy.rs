//! Control and transition policies: the controller's decision tables.
//!
//! `ControlPolicy` names the fact keys that gate autonomous continuation,
//! user pause, completion, and failure. `TransitionPolicy` derives the next
//! phase from the durable fact keys present at the end of an iteration.
//! Neither policy inspects values — only key presence — which is what keeps
//! phase derivation and control-flow gating decidable from the fact-key set
//! alone.

use std::collections::BTreeSet;

use crate::error::{Result, SlaterError};
use crate::phase::{Phase, PhaseRule};

/// Fact-key sets that gate the controller's per-iteration decisions.
///
/// The four sets are evaluated in a fixed precedence order by the
/// controller: completion, then failure, then user-pause, then state-pause.
/// `ControlPolicy` itself only models the declarations; it validates nothing
/// beyond what a caller supplies here (cross-set disjointness is enforced by
/// `AgentSpec` construction, not by this type).
#[derive(Debug, Clone, Default)]
pub struct ControlPolicy {
    /// Keys that must exist in state to proceed autonomously.
    pub required_state_keys: BTreeSet<String>,
    /// Keys that, if missing, require user input.
    pub user_required_keys: BTreeSet<String>,
    /// Keys that, if present, signal task completion.
    pub completion_keys: BTreeSet<String>,
    /// Keys that, if present, signal irrecoverable task failure.
    pub failure_keys: BTreeSet<String>,
}

impl ControlPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required_state_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_state_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn user_required_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.user_required_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn completion_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.completion_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn failure_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.failure_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Completion and failure must never be signaled by the same key set —
    /// an iteration can't be both terminally successful and terminally
    /// failed. Checked here for unit reuse; `AgentSpec` re-runs this during
    /// construction validation and surfaces a `SpecValidation` error.
    #[must_use]
    pub fn completion_failure_disjoint(&self) -> bool {
        self.completion_keys.is_disjoint(&self.failure_keys)
    }
}

/// Deterministic phase derivation from a set of declarative [`PhaseRule`]s.
#[derive(Debug, Clone)]
pub struct TransitionPolicy {
    pub rules: Vec<PhaseRule>,
    pub default: Phase,
}

impl TransitionPolicy {
    #[must_use]
    pub fn new(rules: Vec<PhaseRule>, default: Phase) -> Self {
        Self { rules, default }
    }

    /// Find the phase whose rule matches `fact_keys`. Returns `Ok(None)`
    /// when no rule matches (caller falls back to `default`). Returns
    /// `NonDeterministicTransition` when more than one rule matches —
    /// ambiguous phase derivation is always an error, never resolved by
    /// rule order.
    pub fn derive_phase(&self, fact_keys: &BTreeSet<String>) -> Result<Option<Phase>> {
        let matches: Vec<&PhaseRule> = self.rules.iter().filter(|r| r.matches(fact_keys)).collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0].enter.clone())),
            _ => Err(SlaterError::NonDeterministicTransition {
                candidates: matches.iter().map(|r| r.enter.to_string()).collect(),
                fact_keys: fact_keys.iter().cloned().collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn phase(name: &str) -> Phase {
        crate::phase::PhaseSet::create(&[name])
            .expect("valid")
            .iter()
            .next()
            .cloned()
            .expect("one phase")
    }

    #[test]
    fn derive_phase_returns_none_when_nothing_matches() {
        let policy = TransitionPolicy::new(
            vec![PhaseRule::new(phase("DONE")).when_all(["task_complete"])],
            phase("START"),
        );
        assert_eq!(policy.derive_phase(&keys(&["other"])).unwrap(), None);
    }

    #[test]
    fn derive_phase_returns_unique_match() {
        let policy = TransitionPolicy::new(
            vec![PhaseRule::new(phase("DONE")).when_all(["task_complete"])],
            phase("START"),
        );
        let result = policy.derive_phase(&keys(&["task_complete"])).unwrap();
        assert_eq!(result, Some(phase("DONE")));
    }

    #[test]
    fn derive_phase_errors_on_ambiguous_match() {
        let policy = TransitionPolicy::new(
            vec![
                PhaseRule::new(phase("DONE")).when_all(["task_complete"]),
                PhaseRule::new(phase("REVIEW")).when_all(["task_complete"]),
            ],
            phase("START"),
        );
        let err = policy.derive_phase(&keys(&["task_complete"])).unwrap_err();
        assert!(matches!(err, SlaterError::NonDeterministicTransition { .. }));
    }

    #[test]
    fn completion_and_failure_must_be_disjoint() {
        let policy = ControlPolicy::new()
            .completion_keys(["task_complete"])
            .failure_keys(["task_complete"]);
        assert!(!policy.completion_failure_disjoint());

        let ok_policy = ControlPolicy::new()
            .completion_keys(["task_complete"])
            .failure_keys(["task_failed"]);
        assert!(ok_policy.completion_failure_disjoint());
    }
}
