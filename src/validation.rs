//! Fact scope coherence validation.
//!
//! Catches a whole class of scope bugs before an agent ever runs: a
//! transition rule or control-policy key that refers to a fact emitted with
//! `iteration` scope can never be satisfied at a phase boundary, because
//! iteration-scoped facts are evicted before the next iteration starts.
//! This module cross-references declared emissions against every key a
//! policy reads and reports the mismatch statically.

use std::collections::BTreeMap;

use crate::fact::Scope;
use crate::phase::Phase;
use crate::policy::{ControlPolicy, TransitionPolicy};

/// Severity of a single fact-scope issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single fact-scope validation finding.
#[derive(Debug, Clone)]
pub struct FactScopeIssue {
    pub fact_key: String,
    pub actual_scope: Option<Scope>,
    pub emitting_action: Option<String>,
    pub referenced_by: String,
    pub severity: Severity,
    pub message: String,
}

impl std::fmt::Display for FactScopeIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        write!(f, "{prefix}: {}", self.message)
    }
}

/// `(emitting action name, declared scope)` per fully-qualified emitted key.
pub type EmissionMap = BTreeMap<String, (String, Scope)>;

/// Cross-reference transition and control policy key references against a
/// map of all facts any action in the agent declares it emits.
///
/// Returns an empty vec if every referenced key is declared with durable
/// scope; a referenced key with no declaring action is a warning (it may be
/// supplied externally), a referenced key declared with `iteration` scope
/// is an error (it can never be visible at a phase boundary).
#[must_use]
pub fn validate_fact_scopes(
    emissions: &EmissionMap,
    transition_policy: &TransitionPolicy,
    control_policy: &ControlPolicy,
) -> Vec<FactScopeIssue> {
    let mut issues = Vec::new();

    for rule in &transition_policy.rules {
        for key in &rule.when_all {
            issues.extend(check_fact_scope(
                key,
                emissions,
                &format!("PhaseRule(enter={}).when_all", rule.enter),
            ));
        }
        for key in &rule.when_none {
            issues.extend(check_fact_scope(
                key,
                emissions,
                &format!("PhaseRule(enter={}).when_none", rule.enter),
            ));
        }
    }

    for key in &control_policy.completion_keys {
        issues.extend(check_fact_scope(key, emissions, "ControlPolicy.completion_keys"));
    }
    for key in &control_policy.failure_keys {
        issues.extend(check_fact_scope(key, emissions, "ControlPolicy.failure_keys"));
    }
    for key in &control_policy.required_state_keys {
        issues.extend(check_fact_scope(
            key,
            emissions,
            "ControlPolicy.required_state_keys",
        ));
    }
    for key in &control_policy.user_required_keys {
        issues.extend(check_fact_scope(key, emissions, "ControlPolicy.user_required_keys"));
    }

    issues
}

fn check_fact_scope(key: &str, emissions: &EmissionMap, referenced_by: &str) -> Vec<FactScopeIssue> {
    match emissions.get(key) {
        None => vec![FactScopeIssue {
            fact_key: key.to_string(),
            actual_scope: None,
            emitting_action: None,
            referenced_by: referenced_by.to_string(),
            severity: Severity::Warning,
            message: format!(
                "fact '{key}' referenced by {referenced_by} is not declared in any action's emissions"
            ),
        }],
        Some((action_name, scope)) if *scope == Scope::Iteration => vec![FactScopeIssue {
            fact_key: key.to_string(),
            actual_scope: Some(*scope),
            emitting_action: Some(action_name.clone()),
            referenced_by: referenced_by.to_string(),
            severity: Severity::Error,
            message: format!(
                "fact '{key}' emitted by {action_name} has scope=iteration but is referenced by \
                 {referenced_by} (requires durable scope)"
            ),
        }],
        Some(_) => Vec::new(),
    }
}

/// Phase-name helper used only by tests below, to avoid constructing a
/// `PhaseSet` just to get one validated `Phase`.
#[cfg(test)]
fn phase(name: &str) -> Phase {
    crate::phase::PhaseSet::create(&[name])
        .expect("valid")
        .iter()
        .next()
        .cloned()
        .expect("one phase")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseRule;

    fn emissions() -> EmissionMap {
        let mut map = BTreeMap::new();
        map.insert(
            "task_complete".to_string(),
            ("Finalize".to_string(), Scope::Session),
        );
        map.insert(
            "scratch".to_string(),
            ("Gather".to_string(), Scope::Iteration),
        );
        map
    }

    #[test]
    fn durable_emission_produces_no_issue() {
        let control = ControlPolicy::new().completion_keys(["task_complete"]);
        let transition = TransitionPolicy::new(vec![], phase("START"));
        let issues = validate_fact_scopes(&emissions(), &transition, &control);
        assert!(issues.is_empty());
    }

    #[test]
    fn iteration_scoped_emission_in_control_policy_is_error() {
        let control = ControlPolicy::new().completion_keys(["scratch"]);
        let transition = TransitionPolicy::new(vec![], phase("START"));
        let issues = validate_fact_scopes(&emissions(), &transition, &control);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn undeclared_key_in_transition_rule_is_warning() {
        let rule = PhaseRule::new(phase("DONE")).when_all(["never_declared"]);
        let transition = TransitionPolicy::new(vec![rule], phase("START"));
        let control = ControlPolicy::new();
        let issues = validate_fact_scopes(&emissions(), &transition, &control);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
    }
}
