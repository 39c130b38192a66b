//! Core error taxonomy.
//!
//! One variant per error kind named in the controller's error-handling
//! design: each is either fatal to the whole run (spec validation, cycle
//! detection, non-deterministic transitions) or scoped to a single action
//! (emission contract violations, action failures) per the kind's documented
//! propagation policy.

use thiserror::Error;

/// Top-level error type for the agent core.
#[derive(Debug, Error)]
pub enum SlaterError {
    #[error("fact '{key}' has non-JSON-serializable value: {reason}")]
    Serialization { key: String, reason: String },

    #[error("emission contract violation in {action}: {reason}")]
    EmissionContract { action: String, reason: String },

    #[error("agent spec '{name}' failed validation:\n{}", .issues.join("\n"))]
    SpecValidation { name: String, issues: Vec<String> },

    /// Pre-rendered fact-scope issue lines (see `validation::FactScopeIssue::to_string`).
    #[error("fact scope validation failed:\n{}", .issues.join("\n"))]
    FactScope { issues: Vec<String> },

    #[error("non-deterministic phase derivation: {candidates:?} all match {fact_keys:?}")]
    NonDeterministicTransition {
        candidates: Vec<String>,
        fact_keys: Vec<String>,
    },

    #[error("no procedure registered for phase '{phase}'")]
    MissingProcedure { phase: String },

    #[error("phase cycle detected: stuck in '{phase}' for {count}+ consecutive iterations")]
    CycleDetected { phase: String, count: u32 },

    #[error("agent exceeded max iterations ({max_iterations})")]
    MaxIterationsExceeded { max_iterations: u32 },

    #[error("action '{action}' failed: {reason}")]
    ActionFailure { action: String, reason: String },

    #[error("state store I/O error for agent '{agent_id}': {reason}")]
    StoreIo { agent_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SlaterError>;
