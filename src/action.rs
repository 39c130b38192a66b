//! Actions: the unit of work a procedure executes, and the templates that
//! assemble them into a runnable sequence.
//!
//! Where the reference implementation binds mutable `state`/`ctx` fields
//! onto a cloned action instance before running it, this crate instead
//! passes `&IterationState` and `&IterationContextView` as parameters to
//! `instruction` on each call. Actions stay immutable template values for
//! their whole life; a `ProcedureTemplate` needs no per-iteration cloning
//! step beyond incrementing its cursor.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::IterationContextView;
use crate::emission::EmissionSpec;
use crate::error::Result;
use crate::fact::Facts;
use crate::state::IterationState;

/// A single unit of work within a procedure.
///
/// Implementors declare their emission contract via [`Action::emits`] and
/// produce output through [`Action::instruction`]. `requires_state`/
/// `requires_context` let the controller fail fast with a clear message
/// when an action is materialized without what it needs, rather than
/// panicking on a `None` deref deep inside `instruction`.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn requires_state(&self) -> bool {
        false
    }

    fn requires_context(&self) -> bool {
        false
    }

    /// The declared emission contract. Actions that emit nothing (rare)
    /// may return an empty spec.
    fn emits(&self) -> &EmissionSpec;

    /// Produce this iteration's facts. Implementations build their return
    /// value through `self.emits().build(...)` so the emission contract is
    /// enforced at the point of construction, not by a separate check.
    async fn instruction(&self, state: &IterationState, ctx: &IterationContextView) -> Result<Facts>;
}

/// A reusable, context-agnostic template for building a sequence of
/// actions.
///
/// Immutable after construction; owns template actions that are never
/// executed directly. `materialize` produces the concrete, ordered action
/// list for a single iteration.
#[derive(Clone)]
pub struct ProcedureTemplate {
    pub name: String,
    actions: Vec<Arc<dyn Action>>,
}

impl ProcedureTemplate {
    #[must_use]
    pub fn new(name: impl Into<String>, actions: Vec<Arc<dyn Action>>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    /// Produce the concrete, ordered action list for this iteration.
    /// `state` and `ctx` are not bound here — they're threaded through at
    /// execution time by the controller — so materialization here is just
    /// an identity projection, kept as its own step for parity with the
    /// reference design and as the natural seam for future per-iteration
    /// action selection.
    #[must_use]
    pub fn materialize(&self) -> Vec<Arc<dyn Action>> {
        self.actions.clone()
    }
}

impl std::fmt::Debug for ProcedureTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureTemplate")
            .field("name", &self.name)
            .field("actions", &self.actions.iter().map(|a| a.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emission::{Emission, EmissionValue};
    use crate::fact::{FactKind, Scope};
    use serde_json::json;

    struct Noop {
        emits: EmissionSpec,
    }

    #[async_trait]
    impl Action for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn emits(&self) -> &EmissionSpec {
            &self.emits
        }

        async fn instruction(&self, _state: &IterationState, _ctx: &IterationContextView) -> Result<Facts> {
            let mut values = std::collections::BTreeMap::new();
            values.insert("ready".to_string(), EmissionValue::Value(json!(true)));
            self.emits.build(values)
        }
    }

    #[tokio::test]
    async fn materialize_preserves_order_and_instruction_runs() {
        let emits = EmissionSpec::new().with_leaf(
            "ready",
            Emission::new(Scope::Iteration, FactKind::Progress),
        );
        let action: Arc<dyn Action> = Arc::new(Noop { emits });
        let template = ProcedureTemplate::new("noop-procedure", vec![action]);

        let materialized = template.materialize();
        assert_eq!(materialized.len(), 1);
        assert_eq!(materialized[0].name(), "noop");

        let state = IterationState::default();
        let ctx = IterationContextView::default();
        let facts = materialized[0].instruction(&state, &ctx).await.unwrap();
        assert_eq!(facts.flatten()["ready"].value, json!(true));
    }
}
