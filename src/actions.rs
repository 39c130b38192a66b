//! Demonstration actions: a small set of [`Action`] implementations that
//! exercise the controller end to end.
//!
//! These are deliberately simple — discover repo facts, ask an LLM for a
//! plan, write it to disk, check it landed, say so — and carry no
//! privileged status. Any other implementation of the action contract
//! would slot into the same procedures. Grounded in the reference agent's
//! `GatherContext` / `AnalyzeRepo` / `ProposePlan` / `ApplyPatch` /
//! `Validate` / `Finalize` action set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::IterationContextView;
use crate::emission::{Emission, EmissionSpec, EmissionValue};
use crate::error::{Result, SlaterError};
use crate::fact::{FactKind, Facts, Scope};
use crate::state::IterationState;

use crate::action::Action;

fn leaf(key: &str, value: Value) -> (String, EmissionValue) {
    (key.to_string(), EmissionValue::Value(value))
}

fn nested(key: &str, values: BTreeMap<String, EmissionValue>) -> (String, EmissionValue) {
    (key.to_string(), EmissionValue::Nested(values))
}

/// Discovers baseline repository context. Fact gathering only — no
/// analysis or planning happens here.
pub struct GatherContext {
    emits: EmissionSpec,
}

impl Default for GatherContext {
    fn default() -> Self {
        Self {
            emits: EmissionSpec::new()
                .with_leaf("repo_root", Emission::new(Scope::Session, FactKind::Knowledge))
                .with_leaf("repo_tree", Emission::new(Scope::Session, FactKind::Knowledge))
                .with_leaf(
                    "language",
                    Emission::optional(Scope::Session, FactKind::Knowledge),
                )
                .with_leaf(
                    "build_system",
                    Emission::optional(Scope::Session, FactKind::Knowledge),
                )
                .with_leaf("context_ready", Emission::new(Scope::Session, FactKind::Progress)),
        }
    }
}

/// Files and directories skipped while walking the repository tree.
const IGNORED_ENTRIES: &[&str] = &[".git", "__pycache__", ".venv", "target", "node_modules"];

fn walk_repo_tree(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if IGNORED_ENTRIES.contains(&name.as_str()) {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    out.sort();
    out
}

fn infer_language(repo_tree: &[String]) -> Option<&'static str> {
    if repo_tree.iter().any(|p| p.ends_with(".rs")) {
        Some("rust")
    } else if repo_tree.iter().any(|p| p.ends_with(".py")) {
        Some("python")
    } else if repo_tree.iter().any(|p| p.ends_with(".ts") || p.ends_with(".js")) {
        Some("javascript")
    } else if repo_tree.iter().any(|p| p.ends_with(".go")) {
        Some("go")
    } else {
        None
    }
}

fn infer_build_system(repo_tree: &[String]) -> Option<&'static str> {
    if repo_tree.iter().any(|p| p == "Cargo.toml") {
        Some("cargo")
    } else if repo_tree.iter().any(|p| p == "pyproject.toml" || p == "setup.py") {
        Some("python")
    } else if repo_tree.iter().any(|p| p == "package.json") {
        Some("node")
    } else if repo_tree.iter().any(|p| p == "go.mod") {
        Some("go")
    } else {
        None
    }
}

#[async_trait]
impl Action for GatherContext {
    fn name(&self) -> &str {
        "gather_context"
    }

    fn requires_state(&self) -> bool {
        true
    }

    fn emits(&self) -> &EmissionSpec {
        &self.emits
    }

    async fn instruction(&self, state: &IterationState, _ctx: &IterationContextView) -> Result<Facts> {
        let repo_root: PathBuf = match state.get("repo_root") {
            Some(Value::String(s)) => PathBuf::from(s),
            _ => std::env::current_dir().map_err(|e| SlaterError::ActionFailure {
                action: self.name().to_string(),
                reason: format!("determining cwd: {e}"),
            })?,
        };

        if !repo_root.exists() {
            return Err(SlaterError::ActionFailure {
                action: self.name().to_string(),
                reason: format!("repo root does not exist: {}", repo_root.display()),
            });
        }

        let repo_tree = walk_repo_tree(&repo_root);
        let language = infer_language(&repo_tree);
        let build_system = infer_build_system(&repo_tree);

        let mut values = BTreeMap::new();
        values.extend([
            leaf("repo_root", json!(repo_root.to_string_lossy())),
            leaf("repo_tree", json!(repo_tree)),
            leaf("context_ready", json!(true)),
        ]);
        if let Some(language) = language {
            values.insert("language".to_string(), EmissionValue::Value(json!(language)));
        }
        if let Some(build_system) = build_system {
            values.insert(
                "build_system".to_string(),
                EmissionValue::Value(json!(build_system)),
            );
        }

        self.emits.build(values)
    }
}

/// Interprets the repository tree discovered by [`GatherContext`]. Performs
/// no filesystem access of its own; it derives structural signals purely
/// from facts already present in state.
pub struct AnalyzeRepo {
    emits: EmissionSpec,
}

impl Default for AnalyzeRepo {
    fn default() -> Self {
        Self {
            emits: EmissionSpec::new()
                .with_nested(
                    "repo",
                    EmissionSpec::new()
                        .with_leaf("file_count", Emission::new(Scope::Session, FactKind::Knowledge))
                        .with_leaf("languages", Emission::new(Scope::Session, FactKind::Knowledge))
                        .with_leaf("has_tests", Emission::new(Scope::Session, FactKind::Knowledge))
                        .with_leaf("notes", Emission::new(Scope::Session, FactKind::Knowledge)),
                )
                .with_leaf(
                    "analysis_ready",
                    Emission::new(Scope::Session, FactKind::Progress),
                ),
        }
    }
}

#[async_trait]
impl Action for AnalyzeRepo {
    fn name(&self) -> &str {
        "analyze_repo"
    }

    fn requires_state(&self) -> bool {
        true
    }

    fn emits(&self) -> &EmissionSpec {
        &self.emits
    }

    async fn instruction(&self, state: &IterationState, _ctx: &IterationContextView) -> Result<Facts> {
        let repo_tree: Vec<String> = match state.get("repo_tree") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect(),
            _ => {
                return Err(SlaterError::ActionFailure {
                    action: self.name().to_string(),
                    reason: "repo_tree not found in state; run gather_context first".to_string(),
                })
            }
        };

        let file_count = repo_tree.len();
        let languages = infer_language(&repo_tree).into_iter().collect::<Vec<_>>();
        let has_tests = repo_tree
            .iter()
            .any(|p| p.starts_with("tests/") || p.ends_with("_test.rs") || p.ends_with(".spec.ts"));

        let mut notes = Vec::new();
        if file_count > 500 {
            notes.push("Large repository; refactors should be incremental.".to_string());
        }
        if !has_tests {
            notes.push("No obvious test suite detected.".to_string());
        }

        let values = BTreeMap::from([
            nested(
                "repo",
                BTreeMap::from([
                    leaf("file_count", json!(file_count)),
                    leaf("languages", json!(languages)),
                    leaf("has_tests", json!(has_tests)),
                    leaf("notes", json!(notes)),
                ]),
            ),
            leaf("analysis_ready", json!(true)),
        ]);

        self.emits.build(values)
    }
}

/// Produces a refactoring plan from the current goal and any available
/// repository analysis, by asking the configured LLM for a numbered list
/// of steps.
pub struct ProposePlan {
    emits: EmissionSpec,
}

impl Default for ProposePlan {
    fn default() -> Self {
        Self {
            emits: EmissionSpec::new()
                .with_leaf("plan", Emission::new(Scope::Session, FactKind::Knowledge))
                .with_leaf("plan_ready", Emission::new(Scope::Session, FactKind::Progress)),
        }
    }
}

#[async_trait]
impl Action for ProposePlan {
    fn name(&self) -> &str {
        "propose_plan"
    }

    fn requires_state(&self) -> bool {
        true
    }

    fn requires_context(&self) -> bool {
        true
    }

    fn emits(&self) -> &EmissionSpec {
        &self.emits
    }

    async fn instruction(&self, state: &IterationState, ctx: &IterationContextView) -> Result<Facts> {
        let goal = match state.get("goal") {
            Some(Value::String(s)) => s.clone(),
            _ => {
                return Err(SlaterError::ActionFailure {
                    action: self.name().to_string(),
                    reason: "'goal' is required in state".to_string(),
                })
            }
        };

        let llm = ctx.llm().ok_or_else(|| SlaterError::ActionFailure {
            action: self.name().to_string(),
            reason: "an LLM client must be available in context".to_string(),
        })?;

        let mut messages = vec![
            (
                "system".to_string(),
                "You are a software refactoring assistant. Propose a clear, step-by-step \
                 refactoring plan. Do not write code. Do not speculate beyond the repository \
                 context."
                    .to_string(),
            ),
            ("user".to_string(), format!("Refactoring goal:\n{goal}")),
        ];

        if let Some(Value::Object(repo)) = state.get("repo") {
            let analysis = serde_json::to_string_pretty(repo).unwrap_or_default();
            messages.push(("user".to_string(), format!("Repository analysis:\n{analysis}")));
        }

        messages.push((
            "user".to_string(),
            "Produce a concise refactoring plan as a numbered list of steps. Each step should \
             describe *what* to change, not *how to code it*."
                .to_string(),
        ));

        let model = ctx
            .config()
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("gpt-4.1-mini");

        let plan_text = llm
            .chat(model, &messages)
            .await
            .map_err(|e| SlaterError::ActionFailure {
                action: self.name().to_string(),
                reason: format!("LLM request failed: {e}"),
            })?;

        let steps: Vec<&str> = plan_text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let plan = json!({ "summary": goal, "steps": steps });

        let values = BTreeMap::from([leaf("plan", plan), leaf("plan_ready", json!(true))]);
        self.emits.build(values)
    }
}

/// Applies the current plan to the repository.
///
/// Demonstration behavior: materializes the plan as a markdown file in the
/// repo root, the same prototype artifact the reference implementation
/// writes.
pub struct ApplyPatch {
    emits: EmissionSpec,
}

impl Default for ApplyPatch {
    fn default() -> Self {
        Self {
            emits: EmissionSpec::new()
                .with_leaf("patch_applied", Emission::new(Scope::Session, FactKind::Progress))
                .with_leaf(
                    "patch_summary",
                    Emission::optional(Scope::Session, FactKind::Knowledge),
                )
                .with_leaf(
                    "patch_errors",
                    Emission::optional(Scope::Session, FactKind::Diagnostic),
                ),
        }
    }
}

const PATCH_FILE_NAME: &str = ".slater_plan.md";

#[async_trait]
impl Action for ApplyPatch {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn requires_state(&self) -> bool {
        true
    }

    fn emits(&self) -> &EmissionSpec {
        &self.emits
    }

    async fn instruction(&self, state: &IterationState, _ctx: &IterationContextView) -> Result<Facts> {
        let repo_root = match state.get("repo_root") {
            Some(Value::String(s)) => PathBuf::from(s),
            _ => {
                return Err(SlaterError::ActionFailure {
                    action: self.name().to_string(),
                    reason: "'repo_root' is required in state".to_string(),
                })
            }
        };
        let plan = state.get("plan").cloned().unwrap_or(Value::Null);

        let mut lines = vec!["# Refactoring Plan".to_string(), String::new()];
        if let Some(summary) = plan.get("summary").and_then(Value::as_str) {
            lines.push(format!("## Goal\n{summary}\n"));
        }
        if let Some(steps) = plan.get("steps").and_then(Value::as_array) {
            if !steps.is_empty() {
                lines.push("## Proposed Steps".to_string());
                for (i, step) in steps.iter().enumerate() {
                    if let Some(step) = step.as_str() {
                        lines.push(format!("{}. {step}", i + 1));
                    }
                }
            }
        }

        let patch_file = repo_root.join(PATCH_FILE_NAME);
        let values = match std::fs::write(&patch_file, lines.join("\n")) {
            Ok(()) => BTreeMap::from([
                leaf("patch_applied", json!(true)),
                leaf(
                    "patch_summary",
                    json!(format!("Wrote refactoring plan to {PATCH_FILE_NAME}")),
                ),
            ]),
            Err(e) => BTreeMap::from([
                leaf("patch_applied", json!(false)),
                leaf("patch_errors", json!([e.to_string()])),
            ]),
        };

        self.emits.build(values)
    }
}

/// Validates the outcome of the most recent patch application.
///
/// Demonstration behavior: confirms the patch artifact exists and is
/// readable. A production action set would run tests or static analysis
/// here instead.
pub struct Validate {
    emits: EmissionSpec,
}

impl Default for Validate {
    fn default() -> Self {
        Self {
            emits: EmissionSpec::new()
                .with_leaf(
                    "validation_passed",
                    Emission::new(Scope::Session, FactKind::Progress),
                )
                .with_leaf(
                    "validation_errors",
                    Emission::optional(Scope::Session, FactKind::Diagnostic),
                ),
        }
    }
}

#[async_trait]
impl Action for Validate {
    fn name(&self) -> &str {
        "validate"
    }

    fn requires_state(&self) -> bool {
        true
    }

    fn emits(&self) -> &EmissionSpec {
        &self.emits
    }

    async fn instruction(&self, state: &IterationState, _ctx: &IterationContextView) -> Result<Facts> {
        let repo_root = match state.get("repo_root") {
            Some(Value::String(s)) => PathBuf::from(s),
            _ => {
                return Err(SlaterError::ActionFailure {
                    action: self.name().to_string(),
                    reason: "'repo_root' is required in state".to_string(),
                })
            }
        };
        let patch_applied = matches!(state.get("patch_applied"), Some(Value::Bool(true)));

        let mut errors = Vec::new();
        if !patch_applied {
            errors.push("Patch was not applied.".to_string());
        } else {
            let patch_file = repo_root.join(PATCH_FILE_NAME);
            match std::fs::read_to_string(&patch_file) {
                Ok(_) => {}
                Err(_) if !patch_file.exists() => {
                    errors.push(format!("Expected patch artifact '{PATCH_FILE_NAME}' does not exist."))
                }
                Err(e) => errors.push(format!("Patch artifact is unreadable: {e}")),
            }
        }

        if let Some(Value::Array(prior)) = state.get("patch_errors") {
            errors.extend(prior.iter().filter_map(|v| v.as_str().map(ToString::to_string)));
        }

        let values = if errors.is_empty() {
            BTreeMap::from([leaf("validation_passed", json!(true))])
        } else {
            BTreeMap::from([
                leaf("validation_passed", json!(false)),
                leaf("validation_errors", json!(errors)),
            ])
        };

        self.emits.build(values)
    }
}

/// Finalizes the agent run: marks the task complete and emits a
/// human-readable summary of the outcome.
pub struct Finalize {
    emits: EmissionSpec,
}

impl Default for Finalize {
    fn default() -> Self {
        Self {
            emits: EmissionSpec::new()
                .with_leaf("task_complete", Emission::new(Scope::Session, FactKind::Progress))
                .with_leaf("final_summary", Emission::new(Scope::Session, FactKind::Knowledge)),
        }
    }
}

#[async_trait]
impl Action for Finalize {
    fn name(&self) -> &str {
        "finalize"
    }

    fn requires_state(&self) -> bool {
        true
    }

    fn emits(&self) -> &EmissionSpec {
        &self.emits
    }

    async fn instruction(&self, state: &IterationState, _ctx: &IterationContextView) -> Result<Facts> {
        let mut lines = Vec::new();

        if let Some(goal) = state.get("plan").and_then(|p| p.get("summary")).and_then(Value::as_str) {
            lines.push(format!("Goal: {goal}"));
        }

        if matches!(state.get("validation_passed"), Some(Value::Bool(true))) {
            lines.push("Status: Refactoring step completed successfully.".to_string());
        } else {
            lines.push("Status: Task completed with unresolved issues.".to_string());
        }

        if let Some(Value::Array(errors)) = state.get("validation_errors") {
            lines.push("Validation errors:".to_string());
            for err in errors {
                if let Some(err) = err.as_str() {
                    lines.push(format!("- {err}"));
                }
            }
        }

        if let Some(Value::String(summary)) = state.get("patch_summary") {
            lines.push(format!("Patch: {summary}"));
        }

        let final_summary = if lines.is_empty() {
            "Task completed.".to_string()
        } else {
            lines.join("\n")
        };

        let values = BTreeMap::from([
            leaf("task_complete", json!(true)),
            leaf("final_summary", json!(final_summary)),
        ]);
        self.emits.build(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Scope as FactScope;

    fn view() -> IterationContextView {
        IterationContextView::default()
    }

    #[tokio::test]
    async fn gather_context_discovers_repo_tree() {
        let dir = std::env::temp_dir().join(format!("slater-actions-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        std::fs::write(dir.join("main.rs"), "fn main() {}").unwrap();

        let mut state = IterationState::default();
        let mut seed = Facts::empty();
        seed.insert_leaf(
            "repo_root",
            crate::fact::Fact::new("repo_root", json!(dir.to_string_lossy()), FactScope::Session),
        );
        state.apply_facts(&seed);

        let action = GatherContext::default();
        let facts = action.instruction(&state, &view()).await.unwrap();
        let flat = facts.flatten();
        assert_eq!(flat["context_ready"].value, json!(true));
        let repo_tree = flat["repo_tree"].value.as_array().unwrap();
        assert!(repo_tree.iter().any(|v| v == "Cargo.toml"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn analyze_repo_requires_repo_tree() {
        let state = IterationState::default();
        let action = AnalyzeRepo::default();
        let err = action.instruction(&state, &view()).await.unwrap_err();
        assert!(matches!(err, SlaterError::ActionFailure { .. }));
    }

    #[tokio::test]
    async fn analyze_repo_flags_missing_tests() {
        let mut state = IterationState::default();
        let mut seed = Facts::empty();
        seed.insert_leaf(
            "repo_tree",
            crate::fact::Fact::new("repo_tree", json!(["Cargo.toml", "src/main.rs"]), FactScope::Session),
        );
        state.apply_facts(&seed);

        let action = AnalyzeRepo::default();
        let facts = action.instruction(&state, &view()).await.unwrap();
        let flat = facts.flatten();
        assert_eq!(flat["analysis_ready"].value, json!(true));
        let notes = flat["repo.notes"].value.as_array().unwrap();
        assert!(notes.iter().any(|n| n.as_str().unwrap().contains("test")));
    }

    #[tokio::test]
    async fn apply_patch_writes_plan_file() {
        let dir = std::env::temp_dir().join(format!("slater-actions-patch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut state = IterationState::default();
        let mut seed = Facts::empty();
        seed.insert_leaf(
            "repo_root",
            crate::fact::Fact::new("repo_root", json!(dir.to_string_lossy()), FactScope::Session),
        );
        seed.insert_leaf(
            "plan",
            crate::fact::Fact::new(
                "plan",
                json!({"summary": "refactor parser", "steps": ["split module"]}),
                FactScope::Session,
            ),
        );
        state.apply_facts(&seed);

        let action = ApplyPatch::default();
        let facts = action.instruction(&state, &view()).await.unwrap();
        assert_eq!(facts.flatten()["patch_applied"].value, json!(true));
        assert!(dir.join(PATCH_FILE_NAME).exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn validate_fails_when_patch_not_applied() {
        let mut state = IterationState::default();
        let mut seed = Facts::empty();
        seed.insert_leaf(
            "repo_root",
            crate::fact::Fact::new("repo_root", json!("/nonexistent"), FactScope::Session),
        );
        state.apply_facts(&seed);

        let action = Validate::default();
        let facts = action.instruction(&state, &view()).await.unwrap();
        let flat = facts.flatten();
        assert_eq!(flat["validation_passed"].value, json!(false));
    }

    #[tokio::test]
    async fn finalize_summarizes_success() {
        let mut state = IterationState::default();
        let mut seed = Facts::empty();
        seed.insert_leaf(
            "validation_passed",
            crate::fact::Fact::new("validation_passed", json!(true), FactScope::Session),
        );
        state.apply_facts(&seed);

        let action = Finalize::default();
        let facts = action.instruction(&state, &view()).await.unwrap();
        let flat = facts.flatten();
        assert_eq!(flat["task_complete"].value, json!(true));
        assert!(flat["final_summary"]
            .value
            .as_str()
            .unwrap()
            .contains("successfully"));
    }
}
