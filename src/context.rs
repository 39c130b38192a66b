//! Per-iteration context: the read-only view actions see of the world
//! outside state facts.
//!
//! `IterationContext` is controller-owned and mutable only by the
//! controller; actions only ever see the read-only [`IterationContextView`]
//! produced by [`IterationContext::as_view`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Minimal LLM client contract: take messages, return model text.
///
/// Implementations are injected by whatever assembles the iteration
/// context; the core never constructs one directly except to omit it for
/// fake/test/mock providers (see [`crate::config::LlmConfig::needs_client`]).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, model: &str, messages: &[(String, String)]) -> anyhow::Result<String>;
}

/// Controller-owned context assembled at the start of an agent iteration.
#[derive(Clone, Default)]
pub struct IterationContext {
    /// Static configuration fixed at agent startup.
    pub config: BTreeMap<String, Value>,
    /// External/ephemeral inputs supplied for this iteration.
    pub inputs: BTreeMap<String, Value>,
    /// Iteration metadata (iteration number, phase, timestamps).
    pub meta: BTreeMap<String, Value>,
    /// Injected LLM client dependency, absent for fake/test/mock providers.
    pub llm: Option<Arc<dyn LlmClient>>,
}

impl IterationContext {
    /// Produce a read-only view for actions.
    #[must_use]
    pub fn as_view(&self) -> IterationContextView {
        IterationContextView {
            config: self.config.clone(),
            inputs: self.inputs.clone(),
            meta: self.meta.clone(),
            llm: self.llm.clone(),
        }
    }
}

/// Read-only view over iteration context, handed to actions.
#[derive(Clone, Default)]
pub struct IterationContextView {
    config: BTreeMap<String, Value>,
    inputs: BTreeMap<String, Value>,
    meta: BTreeMap<String, Value>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl IterationContextView {
    #[must_use]
    pub fn config(&self) -> &BTreeMap<String, Value> {
        &self.config
    }

    #[must_use]
    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    #[must_use]
    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    #[must_use]
    pub fn llm(&self) -> Option<&Arc<dyn LlmClient>> {
        self.llm.as_ref()
    }

    /// Look up `key` in inputs first, falling back to config, then `None`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key).or_else(|| self.config.get(key))
    }
}
