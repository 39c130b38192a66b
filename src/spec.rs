//! `AgentSpec`: a versioned, immutable description of an agent's behavior,
//! fully validated at construction time.
//!
//! Every invariant the controller depends on — every phase has a
//! procedure, the transition policy only references declared phases and is
//! internally deterministic, control-policy key sets don't contradict each
//! other, and (optionally) every policy-referenced fact key is emitted with
//! durable scope — is checked once, here, rather than discovered as a
//! runtime failure partway through a run.

use std::collections::{BTreeMap, BTreeSet};

use crate::action::ProcedureTemplate;
use crate::error::{Result, SlaterError};
use crate::phase::{Phase, PhaseSet};
use crate::policy::{ControlPolicy, TransitionPolicy};
use crate::validation::{self, EmissionMap, Severity};

/// Declarative specification of an agent.
pub struct AgentSpec {
    pub name: String,
    pub version: String,
    pub phases: PhaseSet,
    pub control_policy: ControlPolicy,
    pub transition_policy: TransitionPolicy,
    pub procedures: BTreeMap<Phase, ProcedureTemplate>,
    /// Whether to run fact-scope coherence validation at construction.
    pub validate_emissions: bool,
}

impl AgentSpec {
    /// Construct and validate an agent spec. Returns `SpecValidation` for
    /// structural issues (missing procedures, bad transition references,
    /// non-deterministic rules, overlapping control keys) and `FactScope`
    /// for scope-coherence errors, distinguishing the two because callers
    /// typically want to treat fact-scope warnings differently from hard
    /// structural mistakes.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        phases: PhaseSet,
        control_policy: ControlPolicy,
        transition_policy: TransitionPolicy,
        procedures: BTreeMap<Phase, ProcedureTemplate>,
        validate_emissions: bool,
    ) -> Result<Self> {
        let spec = Self {
            name: name.into(),
            version: version.into(),
            phases,
            control_policy,
            transition_policy,
            procedures,
            validate_emissions,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();

        if self.name.trim().is_empty() {
            issues.push("AgentSpec.name cannot be empty".to_string());
        }
        if self.version.trim().is_empty() {
            issues.push("AgentSpec.version cannot be empty".to_string());
        }
        if self.phases.is_empty() {
            issues.push(format!("AgentSpec '{}' must define at least one phase", self.name));
        }

        issues.extend(self.validate_procedures());
        issues.extend(self.validate_transition_policy());
        issues.extend(self.validate_control_policy());

        if !issues.is_empty() {
            return Err(SlaterError::SpecValidation {
                name: self.name.clone(),
                issues,
            });
        }

        if self.validate_emissions {
            self.validate_fact_scopes()?;
        }

        Ok(())
    }

    fn validate_procedures(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let declared_phases: BTreeSet<&Phase> = self.phases.iter().collect();
        let has_procedure: BTreeSet<&Phase> = self.procedures.keys().collect();

        let missing: Vec<&&Phase> = declared_phases.difference(&has_procedure).collect();
        if !missing.is_empty() {
            issues.push(format!(
                "AgentSpec '{}' missing procedures for phases: {:?}",
                self.name,
                missing.iter().map(|p| p.to_string()).collect::<Vec<_>>()
            ));
        }

        // Extra procedures for undeclared phases are a warning in the
        // reference design; this crate logs them instead of failing the
        // build, since an unreferenced procedure is harmless dead config.
        let extra: Vec<&&Phase> = has_procedure.difference(&declared_phases).collect();
        for phase in extra {
            tracing::warn!(phase = %phase, spec = %self.name, "procedure defined for undeclared phase");
        }

        issues
    }

    fn validate_transition_policy(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if !self.phases.contains(&self.transition_policy.default) {
            issues.push(format!(
                "TransitionPolicy.default references unknown phase: {}",
                self.transition_policy.default
            ));
        }

        for (i, rule) in self.transition_policy.rules.iter().enumerate() {
            if !self.phases.contains(&rule.enter) {
                issues.push(format!("PhaseRule[{i}] references unknown phase: {}", rule.enter));
            }
        }

        issues.extend(self.check_rule_determinism());
        issues
    }

    /// Simplified overlap check: two rules with identical `when_all` and no
    /// `when_any`/`when_none` on either side always match the same fact
    /// sets, so exactly one of them can ever be correct — reject the spec
    /// rather than let `derive_phase` pick silently at runtime.
    fn check_rule_determinism(&self) -> Vec<String> {
        let rules = &self.transition_policy.rules;
        let mut issues = Vec::new();

        for i in 0..rules.len() {
            for j in (i + 1)..rules.len() {
                let (a, b) = (&rules[i], &rules[j]);
                if a.when_all == b.when_all
                    && a.when_any.is_empty()
                    && a.when_none.is_empty()
                    && b.when_any.is_empty()
                    && b.when_none.is_empty()
                {
                    issues.push(format!(
                        "phase rules overlap (non-deterministic): rule {i} enter={} when_all={:?}; \
                         rule {j} enter={} when_all={:?}",
                        a.enter, a.when_all, b.enter, b.when_all
                    ));
                }
            }
        }

        issues
    }

    fn validate_control_policy(&self) -> Vec<String> {
        if self.control_policy.completion_failure_disjoint() {
            Vec::new()
        } else {
            let overlap: BTreeSet<&String> = self
                .control_policy
                .completion_keys
                .intersection(&self.control_policy.failure_keys)
                .collect();
            vec![format!(
                "ControlPolicy has keys in both completion_keys and failure_keys: {overlap:?}"
            )]
        }
    }

    /// Collect `(action name, scope)` per fully-qualified emitted key across
    /// every procedure, then check every transition/control-policy
    /// reference against it.
    fn validate_fact_scopes(&self) -> Result<()> {
        let mut emissions: EmissionMap = BTreeMap::new();
        for template in self.procedures.values() {
            for action in template.materialize() {
                for (key, scope) in action.emits().to_dict("") {
                    emissions.insert(key, (action.name().to_string(), scope));
                }
            }
        }

        let issues = validation::validate_fact_scopes(&emissions, &self.transition_policy, &self.control_policy);

        let errors: Vec<String> = issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .map(ToString::to_string)
            .collect();

        for warning in issues.iter().filter(|i| i.severity == Severity::Warning) {
            tracing::warn!(spec = %self.name, "{warning}");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SlaterError::FactScope { issues: errors })
        }
    }

    /// Human-readable summary, useful for `agent info` style CLI output.
    #[must_use]
    pub fn describe(&self) -> String {
        let phase_names: Vec<&str> = self.phases.iter().map(Phase::as_str).collect();
        format!(
            "AgentSpec: {} (v{})\nPhases: {}\n  {}\nTransitionPolicy: {} rules\n  Default: {}\n\
             ControlPolicy:\n  Required: {:?}\n  User-required: {:?}\n  Completion: {:?}\n  Failure: {:?}",
            self.name,
            self.version,
            self.phases.len(),
            phase_names.join(", "),
            self.transition_policy.rules.len(),
            self.transition_policy.default,
            self.control_policy.required_state_keys,
            self.control_policy.user_required_keys,
            self.control_policy.completion_keys,
            self.control_policy.failure_keys,
        )
    }
}
