//! Declarative emission contracts: what an action is allowed to produce.
//!
//! An `EmissionSpec` is the single source of truth for an action's output
//! shape. `build()` validates actual values against the declaration before
//! any `Fact` is constructed, so a drift between what an action claims to
//! emit and what it actually returns is a build-time error, not a silent
//! schema mismatch discovered downstream.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{Result, SlaterError};
use crate::fact::{Fact, FactKind, Facts, Scope};

/// Declaration of a single leaf emission: its scope, semantic kind, and
/// whether an action may omit it (conditional emissions, e.g. an error
/// fact only produced on failure).
#[derive(Debug, Clone)]
pub struct Emission {
    pub scope: Scope,
    pub kind: FactKind,
    pub required: bool,
}

impl Emission {
    #[must_use]
    pub fn new(scope: Scope, kind: FactKind) -> Self {
        Self {
            scope,
            kind,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(scope: Scope, kind: FactKind) -> Self {
        Self {
            scope,
            kind,
            required: false,
        }
    }
}

/// Either a leaf emission declaration or a nested spec (for grouped facts
/// like `repo.file_count`, `repo.languages`).
#[derive(Debug, Clone)]
pub enum EmissionEntry {
    Leaf(Emission),
    Nested(EmissionSpec),
}

impl EmissionEntry {
    fn required(&self) -> bool {
        match self {
            EmissionEntry::Leaf(e) => e.required,
            EmissionEntry::Nested(s) => s.required,
        }
    }
}

/// Declarative specification of the facts an action emits.
#[derive(Debug, Clone, Default)]
pub struct EmissionSpec {
    entries: BTreeMap<String, EmissionEntry>,
    pub required: bool,
}

/// Leaf value supplied to `EmissionSpec::build` for a single key.
#[derive(Debug, Clone)]
pub enum EmissionValue {
    Value(Value),
    Nested(BTreeMap<String, EmissionValue>),
}

impl From<Value> for EmissionValue {
    fn from(v: Value) -> Self {
        EmissionValue::Value(v)
    }
}

impl EmissionSpec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            required: true,
        }
    }

    /// Mark this entire spec group optional when nested under another spec.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    #[must_use]
    pub fn with_leaf(mut self, key: impl Into<String>, emission: Emission) -> Self {
        self.entries
            .insert(key.into(), EmissionEntry::Leaf(emission));
        self
    }

    #[must_use]
    pub fn with_nested(mut self, key: impl Into<String>, spec: EmissionSpec) -> Self {
        self.entries.insert(key.into(), EmissionEntry::Nested(spec));
        self
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        match key.split_once('.') {
            Some((head, rest)) => match self.entries.get(head) {
                Some(EmissionEntry::Nested(nested)) => nested.contains(rest),
                _ => false,
            },
            None => self.entries.contains_key(key),
        }
    }

    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// All declared keys, flattened with dot-notation for nested specs.
    #[must_use]
    pub fn flat_keys(&self, prefix: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for (key, entry) in &self.entries {
            let fq = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match entry {
                EmissionEntry::Nested(nested) => out.extend(nested.flat_keys(&fq)),
                EmissionEntry::Leaf(_) => {
                    out.insert(fq);
                }
            }
        }
        out
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&EmissionEntry> {
        match key.split_once('.') {
            Some((head, rest)) => match self.entries.get(head) {
                Some(EmissionEntry::Nested(nested)) => nested.get(rest),
                _ => None,
            },
            None => self.entries.get(key),
        }
    }

    /// Export as a flattened `key -> scope` map for static validation
    /// (used by fact-scope coherence checking against transition/control
    /// policies).
    #[must_use]
    pub fn to_dict(&self, prefix: &str) -> BTreeMap<String, Scope> {
        let mut out = BTreeMap::new();
        for (key, entry) in &self.entries {
            let fq = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match entry {
                EmissionEntry::Nested(nested) => out.extend(nested.to_dict(&fq)),
                EmissionEntry::Leaf(emission) => {
                    out.insert(fq, emission.scope);
                }
            }
        }
        out
    }

    /// Build a `Facts` tree from supplied values, validated against this
    /// spec. Rejects undeclared keys and missing required keys before
    /// constructing a single `Fact`, so the emission contract and the
    /// action's actual output can never silently diverge.
    pub fn build(&self, values: BTreeMap<String, EmissionValue>) -> Result<Facts> {
        let declared = self.keys();
        let supplied: BTreeSet<String> = values.keys().cloned().collect();

        let undeclared: Vec<&String> = supplied.difference(&declared).collect();
        if !undeclared.is_empty() {
            return Err(SlaterError::EmissionContract {
                action: String::new(),
                reason: format!(
                    "undeclared emission keys: {undeclared:?}; declared keys are: {declared:?}"
                ),
            });
        }

        let missing: Vec<&String> = self
            .entries
            .iter()
            .filter(|(key, entry)| entry.required() && !supplied.contains(*key))
            .map(|(key, _)| key)
            .collect();
        if !missing.is_empty() {
            return Err(SlaterError::EmissionContract {
                action: String::new(),
                reason: format!("missing required emission keys: {missing:?}"),
            });
        }

        let mut facts = Facts::empty();
        for (key, value) in values {
            let entry = self.entries.get(&key).expect("checked above");
            match (entry, value) {
                (EmissionEntry::Nested(spec), EmissionValue::Nested(nested_values)) => {
                    let nested = spec.build(nested_values)?;
                    facts.insert_group(&key, nested);
                }
                (EmissionEntry::Nested(_), EmissionValue::Value(_)) => {
                    return Err(SlaterError::EmissionContract {
                        action: String::new(),
                        reason: format!("expected nested values for '{key}', got a scalar"),
                    });
                }
                (EmissionEntry::Leaf(emission), EmissionValue::Value(v)) => {
                    let fact = Fact::with_kind(&key, v, emission.scope, emission.kind);
                    facts.insert_leaf(&key, fact);
                }
                (EmissionEntry::Leaf(_), EmissionValue::Nested(_)) => {
                    return Err(SlaterError::EmissionContract {
                        action: String::new(),
                        reason: format!("expected a scalar value for '{key}', got a nested group"),
                    });
                }
            }
        }

        Ok(facts)
    }
}

/// Convenience builder: `btreemap!{"a" => json!(1).into(), ...}` equivalent.
#[macro_export]
macro_rules! emission_values {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = std::collections::BTreeMap::new();
        $(map.insert($key.to_string(), $value);)*
        map
    }};
}
