//! Validated phase identifiers and the rules that derive them from facts.
//!
//! A `Phase` is an UPPER_SNAKE_CASE identifier naming a discrete state in an
//! agent's FSM. `PhaseSet` is the factory that validates a batch of phase
//! names together (format, reserved words, uniqueness) the way a Python enum
//! class would be built from a name list, but without requiring a build-time
//! closed enum — agent specs mint their own phase vocabularies at runtime.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("valid regex"));

const RESERVED: &[&str] = &[
    "NONE", "ANY", "ALL", "DEFAULT", "UNKNOWN", "TRUE", "FALSE", "NULL",
];

/// A single validated phase identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Phase(String);

impl Phase {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Phase {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated, ordered collection of phases minted together.
///
/// Construction enforces the same invariants a generated enum class would:
/// every name matches `^[A-Z][A-Z0-9_]*$`, none is reserved, none repeats,
/// and insertion order is preserved (so alphabetically-sorted input via
/// [`PhaseSet::from_set`] yields alphabetical iteration order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSet {
    phases: Vec<Phase>,
}

impl PhaseSet {
    /// Create a phase set from an ordered list of names, in that order.
    pub fn create(names: &[&str]) -> Result<Self, String> {
        Self::validate_names(names)?;
        Ok(Self {
            phases: names.iter().map(|n| Phase((*n).to_string())).collect(),
        })
    }

    /// Alias for `create`, for call sites reading a list from a config file.
    pub fn from_list(names: &[String]) -> Result<Self, String> {
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        Self::create(&refs)
    }

    /// Create a phase set from an unordered collection, sorted alphabetically
    /// for deterministic iteration order.
    pub fn from_set(names: &BTreeSet<String>) -> Result<Self, String> {
        let sorted: Vec<&str> = names.iter().map(String::as_str).collect();
        Self::create(&sorted)
    }

    /// Check validity without constructing a set.
    #[must_use]
    pub fn is_valid(names: &[&str]) -> bool {
        Self::validate_names(names).is_ok()
    }

    fn validate_names(names: &[&str]) -> Result<(), String> {
        if names.is_empty() {
            return Err("at least one phase name is required".to_string());
        }

        let mut seen = BTreeSet::new();
        let mut errors = Vec::new();

        for name in names {
            if !NAME_PATTERN.is_match(name) {
                errors.push(format!(
                    "invalid phase name: '{name}' (must be UPPER_SNAKE_CASE, e.g. 'READY_TO_CONTINUE')"
                ));
                continue;
            }
            if RESERVED.contains(name) {
                errors.push(format!(
                    "reserved phase name: '{name}' (cannot use: {})",
                    RESERVED.join(", ")
                ));
                continue;
            }
            if !seen.insert(*name) {
                errors.push(format!("duplicate phase name: '{name}'"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(format!("invalid phase names:\n  - {}", errors.join("\n  - ")))
        }
    }

    #[must_use]
    pub fn contains(&self, phase: &Phase) -> bool {
        self.phases.contains(phase)
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

/// Declarative rule for entering a phase based on durable fact keys present
/// at the end of an iteration.
#[derive(Debug, Clone)]
pub struct PhaseRule {
    pub enter: Phase,
    pub when_all: BTreeSet<String>,
    pub when_any: BTreeSet<String>,
    pub when_none: BTreeSet<String>,
}

impl PhaseRule {
    #[must_use]
    pub fn new(enter: Phase) -> Self {
        Self {
            enter,
            when_all: BTreeSet::new(),
            when_any: BTreeSet::new(),
            when_none: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn when_all(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.when_all = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn when_any(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.when_any = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn when_none(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.when_none = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this rule's conditions hold against the given set of durable
    /// fact keys.
    #[must_use]
    pub fn matches(&self, fact_keys: &BTreeSet<String>) -> bool {
        if !self.when_all.is_subset(fact_keys) {
            return false;
        }
        if !self.when_any.is_empty() && self.when_any.is_disjoint(fact_keys) {
            return false;
        }
        if !self.when_none.is_disjoint(fact_keys) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_preserves_order() {
        let set = PhaseSet::create(&["START", "PROCESSING", "DONE"]).expect("valid");
        let names: Vec<&str> = set.iter().map(Phase::as_str).collect();
        assert_eq!(names, vec!["START", "PROCESSING", "DONE"]);
    }

    #[test]
    fn from_set_sorts_alphabetically() {
        let names: BTreeSet<String> = ["DONE", "START", "PROCESSING"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let set = PhaseSet::from_set(&names).expect("valid");
        let ordered: Vec<&str> = set.iter().map(Phase::as_str).collect();
        assert_eq!(ordered, vec!["DONE", "PROCESSING", "START"]);
    }

    #[test]
    fn rejects_lowercase_and_malformed_names() {
        assert!(PhaseSet::create(&["start"]).is_err());
        assert!(PhaseSet::create(&["1START"]).is_err());
        assert!(PhaseSet::create(&["START-HERE"]).is_err());
    }

    #[test]
    fn rejects_reserved_names() {
        assert!(PhaseSet::create(&["DEFAULT"]).is_err());
        assert!(PhaseSet::create(&["ANY"]).is_err());
    }

    #[test]
    fn rejects_duplicates() {
        assert!(PhaseSet::create(&["START", "START"]).is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(PhaseSet::create(&[]).is_err());
    }

    #[test]
    fn phase_rule_matches_all_any_none() {
        let rule = PhaseRule::new(Phase("READY".to_string()))
            .when_all(["plan_ready"])
            .when_any(["analysis_ready", "context_ready"])
            .when_none(["task_complete"]);

        let mut keys: BTreeSet<String> = ["plan_ready", "analysis_ready"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(rule.matches(&keys));

        keys.insert("task_complete".to_string());
        assert!(!rule.matches(&keys));
    }

    #[test]
    fn phase_rule_requires_all_when_all_keys() {
        let rule = PhaseRule::new(Phase("READY".to_string())).when_all(["a", "b"]);
        let only_a: BTreeSet<String> = ["a"].iter().map(|s| s.to_string()).collect();
        assert!(!rule.matches(&only_a));
    }
}
