//! The fact model: scoped, serializable, nested keyed assertions.
//!
//! `Fact` is a single `(key, value, scope)` assertion. `Facts` is a keyed
//! container whose values are either nested `Facts` groups or leaf `Fact`s.
//! The whole module exists to make one law hold: a fact tree has exactly one
//! canonical flat form and one JSON form, and both round-trip.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SlaterError};

/// Lifetime of a fact. `Iteration` is ephemeral; `Session` and `Persistent`
/// are collectively "durable" (see [`Scope::is_durable`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Iteration,
    Session,
    Persistent,
}

impl Scope {
    /// Durable facts survive iteration boundaries (and, for `Persistent`,
    /// process restarts when backed by a persistent store). The core treats
    /// `Session` and `Persistent` identically for phase derivation.
    #[must_use]
    pub fn is_durable(self) -> bool {
        !matches!(self, Scope::Iteration)
    }
}

/// Classificatory tag on a [`Fact`]. Carries no behavior of its own; it
/// exists so callers can express intent (a patch artifact vs. a progress
/// marker) without inventing distinct fact types per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
    Progress,
    Authorization,
    Knowledge,
    Artifact,
    Diagnostic,
}

/// A single named assertion. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub key: String,
    pub value: Value,
    pub scope: Scope,
    #[serde(default = "default_kind")]
    pub kind: FactKind,
}

fn default_kind() -> FactKind {
    FactKind::Knowledge
}

impl Fact {
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value, scope: Scope) -> Self {
        Self::with_kind(key, value, scope, FactKind::Knowledge)
    }

    #[must_use]
    pub fn with_kind(key: impl Into<String>, value: Value, scope: Scope, kind: FactKind) -> Self {
        Self {
            key: key.into(),
            value,
            scope,
            kind,
        }
    }

    /// Serialize to the JSON-safe `{key, value, scope}` wire form.
    ///
    /// The only defined failure mode: the value's own `Serialize`
    /// implementation refuses to produce JSON (e.g. a non-finite float
    /// smuggled in through a custom `Value` construction). The error names
    /// the offending key.
    pub fn serialize(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| SlaterError::Serialization {
            key: self.key.clone(),
            reason: e.to_string(),
        })
    }

    pub fn deserialize(data: &Value) -> Result<Self> {
        serde_json::from_value(data.clone()).map_err(|e| SlaterError::Serialization {
            key: "<unknown>".to_string(),
            reason: e.to_string(),
        })
    }
}

/// A node in a fact tree: either a leaf [`Fact`] or a nested [`Facts`] group.
#[derive(Debug, Clone, PartialEq)]
pub enum FactsValue {
    Leaf(Fact),
    Group(Facts),
}

/// A keyed collection of facts, supporting nesting.
///
/// Invariants: a leaf fact's `key` equals its containing mapping key; a
/// single fact tree has exactly one canonical flat form (`flatten`) and one
/// JSON form (`serialize`), and `unflatten`/`deserialize` are their exact
/// inverses over legal inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Facts {
    entries: BTreeMap<String, FactsValue>,
}

impl Facts {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a leaf fact. `fact.key` must equal `key`; mismatches indicate
    /// a construction bug in the caller (typically a hand-built `EmissionSpec`
    /// that forgot to propagate its own declared key).
    pub fn insert_leaf(&mut self, key: impl Into<String>, fact: Fact) {
        let key = key.into();
        debug_assert_eq!(fact.key, key, "fact key must match mapping key");
        self.entries.insert(key, FactsValue::Leaf(fact));
    }

    pub fn insert_group(&mut self, key: impl Into<String>, group: Facts) {
        self.entries.insert(key.into(), FactsValue::Group(group));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FactsValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FactsValue)> {
        self.entries.iter()
    }

    /// Yield all leaf facts as `(fully_qualified_key, &Fact)`, with nested
    /// groups contributing dot-joined prefixes.
    pub fn iter_facts(&self) -> impl Iterator<Item = (String, &Fact)> {
        let mut out = Vec::new();
        Self::walk_facts(&self.entries, String::new(), &mut out);
        out.into_iter()
    }

    fn walk_facts<'a>(
        entries: &'a BTreeMap<String, FactsValue>,
        prefix: String,
        out: &mut Vec<(String, &'a Fact)>,
    ) {
        for (key, value) in entries {
            let fq = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match value {
                FactsValue::Leaf(fact) => out.push((fq, fact)),
                FactsValue::Group(group) => Self::walk_facts(&group.entries, fq, out),
            }
        }
    }

    /// Structural transform: nested tree -> flat map of fully-qualified key
    /// to owned `Fact`. Pure structure, not serialization.
    #[must_use]
    pub fn flatten(&self) -> BTreeMap<String, Fact> {
        self.iter_facts()
            .map(|(fq, fact)| (fq, fact.clone()))
            .collect()
    }

    /// Structural transform: flat map with dot-notation keys -> nested tree.
    /// A dot in a key introduces one nesting level. Inverse of `flatten`.
    #[must_use]
    pub fn unflatten(flat: &BTreeMap<String, Fact>) -> Self {
        let mut root = Facts::empty();

        for (fq_key, fact) in flat {
            let parts: Vec<&str> = fq_key.split('.').collect();
            let mut current = &mut root;

            for part in &parts[..parts.len() - 1] {
                let entry = current
                    .entries
                    .entry((*part).to_string())
                    .or_insert_with(|| FactsValue::Group(Facts::empty()));
                current = match entry {
                    FactsValue::Group(g) => g,
                    FactsValue::Leaf(_) => {
                        // A leaf occupies a path that a later key wants as a group;
                        // the group wins and the leaf collision is discarded, matching
                        // the structural (not validating) contract of unflatten.
                        *entry = FactsValue::Group(Facts::empty());
                        match entry {
                            FactsValue::Group(g) => g,
                            FactsValue::Leaf(_) => unreachable!(),
                        }
                    }
                };
            }

            if let Some(last) = parts.last() {
                current
                    .entries
                    .insert((*last).to_string(), FactsValue::Leaf(fact.clone()));
            }
        }

        root
    }

    /// Flatten into the JSON-safe wire form: fully-qualified key -> serialized
    /// fact dict. This is `flatten` composed with `Fact::serialize`.
    pub fn serialize(&self) -> Result<BTreeMap<String, Value>> {
        self.iter_facts()
            .map(|(fq, fact)| fact.serialize().map(|v| (fq, v)))
            .collect()
    }

    /// Reconstitute from the wire form. Composes `Fact::deserialize` (type
    /// transform) with `unflatten` (structure transform) — the exact inverse
    /// of `serialize`.
    pub fn deserialize(flat: &BTreeMap<String, Value>) -> Result<Self> {
        let facts: Result<BTreeMap<String, Fact>> = flat
            .iter()
            .map(|(k, v)| Fact::deserialize(v).map(|f| (k.clone(), f)))
            .collect();
        Ok(Self::unflatten(&facts?))
    }

    /// Fully-qualified keys present in this tree.
    #[must_use]
    pub fn keys(&self) -> std::collections::BTreeSet<String> {
        self.iter_facts().map(|(fq, _)| fq).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fact(key: &str, value: Value, scope: Scope) -> Fact {
        Fact::new(key, value, scope)
    }

    #[test]
    fn flatten_unflatten_roundtrip() {
        let mut inner = Facts::empty();
        inner.insert_leaf("file_count", fact("file_count", json!(42), Scope::Session));
        inner.insert_leaf(
            "languages",
            fact("languages", json!(["python"]), Scope::Session),
        );

        let mut root = Facts::empty();
        root.insert_group("repo", inner);
        root.insert_leaf(
            "analysis_ready",
            fact("analysis_ready", json!(true), Scope::Session),
        );

        let flat = root.flatten();
        assert_eq!(flat.len(), 3);
        assert!(flat.contains_key("repo.file_count"));
        assert!(flat.contains_key("repo.languages"));
        assert!(flat.contains_key("analysis_ready"));

        let rebuilt = Facts::unflatten(&flat);
        assert_eq!(rebuilt, root);

        // flatten(unflatten(F)) == F over a flat map with disjoint dotted keys.
        let reflattened = rebuilt.flatten();
        assert_eq!(reflattened, flat);
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let mut root = Facts::empty();
        root.insert_leaf(
            "goal",
            fact("goal", json!("refactor the parser"), Scope::Session),
        );
        root.insert_leaf(
            "repo_ignore",
            fact("repo_ignore", json!(["target", ".git"]), Scope::Session),
        );

        let wire = root.serialize().expect("serializable");
        let back = Facts::deserialize(&wire).expect("deserializable");
        assert_eq!(back, root);
    }

    #[test]
    fn leaf_key_matches_mapping_key() {
        let mut facts = Facts::empty();
        facts.insert_leaf("ready", fact("ready", json!(true), Scope::Iteration));
        let (_, f) = facts.iter_facts().next().expect("one fact");
        assert_eq!(f.key, "ready");
    }

    #[test]
    fn scope_durability() {
        assert!(!Scope::Iteration.is_durable());
        assert!(Scope::Session.is_durable());
        assert!(Scope::Persistent.is_durable());
    }

    #[test]
    fn empty_facts_roundtrip() {
        let empty = Facts::empty();
        assert!(empty.flatten().is_empty());
        let wire = empty.serialize().expect("serializable");
        assert!(Facts::deserialize(&wire).expect("deserializable").is_empty());
    }
}
