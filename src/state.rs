//! Iteration-local working state: the dual-map view actions read and write.
//!
//! `IterationState` holds durable facts (carried across iterations) and
//! ephemeral iteration-scoped facts (evicted at the start of each iteration)
//! in separate maps, with iteration facts shadowing durable ones on read.
//! Applying facts is eager: an action's output is visible to the next
//! action in the same iteration immediately, establishing sequential
//! happens-before visibility within a single iteration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fact::{Fact, Facts, Scope};
use crate::phase::Phase;

/// Phase name recorded for the bootstrap pseudo-iteration, matching the
/// sentinel the original controller recorded before any real iteration ran.
pub const BOOTSTRAP_PHASE: &str = "__bootstrap__";

/// Mutable, iteration-local working state.
///
/// Durable facts (`session`/`persistent` scope) are carried forward across
/// iterations. Iteration-scoped facts are cleared at the start of every
/// iteration via [`IterationState::begin_iteration`], which must be called
/// exactly once per iteration by the controller.
#[derive(Debug, Clone, Default)]
pub struct IterationState {
    durable: BTreeMap<String, Fact>,
    ephemeral: BTreeMap<String, Fact>,
}

impl IterationState {
    /// Build state from a base fact tree. Only durable facts are retained;
    /// any iteration-scoped facts in `base_facts` are discarded, since a
    /// base snapshot loaded from a store represents state *between*
    /// iterations, where no ephemeral facts can exist.
    #[must_use]
    pub fn from_facts(base_facts: &Facts) -> Self {
        let durable = base_facts
            .iter_facts()
            .filter(|(_, fact)| fact.scope.is_durable())
            .map(|(fq, fact)| (fq, fact.clone()))
            .collect();
        Self {
            durable,
            ephemeral: BTreeMap::new(),
        }
    }

    /// Evict all iteration-scoped facts. Must be called exactly once per
    /// iteration, before any action runs.
    pub fn begin_iteration(&mut self) {
        self.ephemeral.clear();
    }

    /// Apply facts eagerly: iteration-scoped facts replace prior ephemeral
    /// values, durable facts replace prior durable values. Called after
    /// every successful action within an iteration so later actions observe
    /// earlier ones' output.
    pub fn apply_facts(&mut self, facts: &Facts) {
        for (fq_key, fact) in facts.iter_facts() {
            if fact.scope == Scope::Iteration {
                self.ephemeral.insert(fq_key, fact.clone());
            } else {
                self.durable.insert(fq_key, fact.clone());
            }
        }
    }

    /// Read a fact's value, preferring the ephemeral map. Returns `None` if
    /// the key is absent from both maps.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.ephemeral
            .get(key)
            .or_else(|| self.durable.get(key))
            .map(|f| &f.value)
    }

    /// Read a fact's value, falling back to `default` if absent.
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.get(key).unwrap_or(default)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.ephemeral.contains_key(key) || self.durable.contains_key(key)
    }

    /// Value-only projection of the full current view, ephemeral facts
    /// shadowing durable ones. Used for debugging and policy-gate checks.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut data: BTreeMap<String, Value> = self
            .durable
            .iter()
            .map(|(k, f)| (k.clone(), f.value.clone()))
            .collect();
        data.extend(self.ephemeral.iter().map(|(k, f)| (k.clone(), f.value.clone())));
        data
    }

    /// All fact keys currently visible (durable ∪ ephemeral), the input to
    /// transition and control-policy evaluation.
    #[must_use]
    pub fn fact_keys(&self) -> std::collections::BTreeSet<String> {
        self.durable.keys().chain(self.ephemeral.keys()).cloned().collect()
    }

    /// Durable facts eligible for persistence at the iteration boundary.
    #[must_use]
    pub fn persistent_facts(&self) -> Facts {
        Facts::unflatten(&self.durable)
    }
}

/// Provenance-preserving record of facts asserted during a single
/// iteration, keyed by the action that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationFacts {
    pub iteration: u64,
    pub phase: Option<String>,
    #[serde(rename = "facts_by_action")]
    pub by_action: BTreeMap<String, Facts>,
    pub timestamp: Option<f64>,
}

impl IterationFacts {
    #[must_use]
    pub fn new(iteration: u64, phase: Option<&Phase>) -> Self {
        Self {
            iteration,
            phase: phase.map(ToString::to_string),
            by_action: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn record(&mut self, action: impl Into<String>, facts: Facts) {
        self.by_action.insert(action.into(), facts);
    }
}

// `Facts` has no derived Serialize/Deserialize (it's a hand-rolled tree), so
// `IterationFacts` provides its own wire form via the fact module's
// serialize/deserialize helpers rather than leaning on derive.
impl Serialize for Facts {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = self.serialize().map_err(serde::ser::Error::custom)?;
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Facts {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let flat: BTreeMap<String, Value> = BTreeMap::deserialize(deserializer)?;
        Facts::deserialize(&flat).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn durable_fact(key: &str, value: Value) -> Fact {
        Fact::new(key, value, Scope::Session)
    }

    fn iteration_fact(key: &str, value: Value) -> Fact {
        Fact::new(key, value, Scope::Iteration)
    }

    #[test]
    fn ephemeral_shadows_durable_on_read() {
        let mut state = IterationState::default();
        let mut facts = Facts::empty();
        facts.insert_leaf("goal", durable_fact("goal", json!("ship it")));
        state.apply_facts(&facts);

        let mut ephemeral = Facts::empty();
        ephemeral.insert_leaf("goal", iteration_fact("goal", json!("shadowed")));
        state.apply_facts(&ephemeral);

        assert_eq!(state.get("goal"), Some(&json!("shadowed")));
    }

    #[test]
    fn begin_iteration_evicts_only_ephemeral() {
        let mut state = IterationState::default();
        let mut durable = Facts::empty();
        durable.insert_leaf("goal", durable_fact("goal", json!("ship it")));
        state.apply_facts(&durable);

        let mut ephemeral = Facts::empty();
        ephemeral.insert_leaf("scratch", iteration_fact("scratch", json!(1)));
        state.apply_facts(&ephemeral);

        state.begin_iteration();

        assert!(state.contains("goal"));
        assert!(!state.contains("scratch"));
    }

    #[test]
    fn persistent_facts_excludes_ephemeral() {
        let mut state = IterationState::default();
        let mut facts = Facts::empty();
        facts.insert_leaf("goal", durable_fact("goal", json!("ship it")));
        facts.insert_leaf("scratch", iteration_fact("scratch", json!(1)));
        state.apply_facts(&facts);

        let persisted = state.persistent_facts();
        let keys = persisted.keys();
        assert!(keys.contains("goal"));
        assert!(!keys.contains("scratch"));
    }

    #[test]
    fn from_facts_drops_iteration_scope() {
        let mut facts = Facts::empty();
        facts.insert_leaf("goal", durable_fact("goal", json!("ship it")));
        facts.insert_leaf("scratch", iteration_fact("scratch", json!(1)));

        let state = IterationState::from_facts(&facts);
        assert!(state.contains("goal"));
        assert!(!state.contains("scratch"));
    }

    #[test]
    fn iteration_facts_wire_roundtrip() {
        let mut record = IterationFacts::new(3, None);
        let mut facts = Facts::empty();
        facts.insert_leaf("goal", durable_fact("goal", json!("ship it")));
        record.record("gather_context", facts);

        let json_value = serde_json::to_value(&record).expect("serializable");
        let back: IterationFacts = serde_json::from_value(json_value).expect("deserializable");
        assert_eq!(back.iteration, 3);
        assert!(back.by_action.contains_key("gather_context"));
    }
}
