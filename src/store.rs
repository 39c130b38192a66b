//! Durable state storage: bootstrap, save, load, and audit history.
//!
//! `StateStore` is implemented synchronously even though the controller's
//! loop is async — blocking filesystem operations are called directly from
//! async bodies without `spawn_blocking`, since a single-agent,
//! strictly-sequential controller has no concurrent callers to block.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;

use crate::config::BootstrapConfig;
use crate::error::{Result, SlaterError};
use crate::fact::{Fact, Facts, Scope};
use crate::state::IterationFacts;

/// Storage abstraction for durable agent state.
///
/// `bootstrap` seeds initial durable facts and must be idempotent: calling
/// it against an agent that already has state is a no-op, so restarting a
/// long-running agent never clobbers progress already made.
pub trait StateStore {
    fn bootstrap(&self, agent_id: &str, config: &BootstrapConfig) -> Result<()>;
    fn load(&self, agent_id: &str) -> Result<Facts>;
    fn save(&self, agent_id: &str, iteration_facts: &IterationFacts, persistent_facts: &Facts) -> Result<()>;
    fn history(&self, agent_id: &str) -> Result<Vec<IterationFacts>>;
}

fn seed_facts_from_config(config: &BootstrapConfig) -> Facts {
    let mut facts = Facts::empty();

    if let Some(goal) = &config.goal {
        facts.insert_leaf("goal", Fact::new("goal", Value::from(goal.as_str()), Scope::Session));
    }

    if let Some(repo) = &config.repo {
        facts.insert_leaf(
            "repo_root",
            Fact::new(
                "repo_root",
                Value::from(repo.root.to_string_lossy().to_string()),
                Scope::Session,
            ),
        );
        if !repo.ignore.is_empty() {
            facts.insert_leaf(
                "repo_ignore",
                Fact::new("repo_ignore", Value::from(repo.ignore.clone()), Scope::Session),
            );
        }
    }

    facts
}

/// In-memory store for tests and short-lived runs. State does not survive
/// process restarts.
#[derive(Default)]
pub struct InMemoryStateStore {
    persistent: Mutex<BTreeMap<String, Facts>>,
    history: Mutex<BTreeMap<String, Vec<IterationFacts>>>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn bootstrap(&self, agent_id: &str, config: &BootstrapConfig) -> Result<()> {
        let mut persistent = self.persistent.lock().expect("lock poisoned");
        persistent
            .entry(agent_id.to_string())
            .or_insert_with(|| seed_facts_from_config(config));
        self.history
            .lock()
            .expect("lock poisoned")
            .entry(agent_id.to_string())
            .or_default();
        Ok(())
    }

    fn load(&self, agent_id: &str) -> Result<Facts> {
        Ok(self
            .persistent
            .lock()
            .expect("lock poisoned")
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, agent_id: &str, iteration_facts: &IterationFacts, persistent_facts: &Facts) -> Result<()> {
        self.history
            .lock()
            .expect("lock poisoned")
            .entry(agent_id.to_string())
            .or_default()
            .push(iteration_facts.clone());
        self.persistent
            .lock()
            .expect("lock poisoned")
            .insert(agent_id.to_string(), persistent_facts.clone());
        Ok(())
    }

    fn history(&self, agent_id: &str) -> Result<Vec<IterationFacts>> {
        Ok(self
            .history
            .lock()
            .expect("lock poisoned")
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Filesystem-backed store: one JSON snapshot per agent plus an append-only
/// JSONL audit log of every iteration.
///
/// Snapshot writes are atomic (write to a `.tmp` file, then rename over the
/// final path) so a crash mid-write never leaves a half-written snapshot
/// behind.
pub struct FileSystemStateStore {
    root: PathBuf,
}

impl FileSystemStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| SlaterError::StoreIo {
            agent_id: String::new(),
            reason: format!("creating state directory {}: {e}", root.display()),
        })?;
        Ok(Self { root })
    }

    fn snapshot_path(&self, agent_id: &str) -> PathBuf {
        self.root.join(format!("{agent_id}.json"))
    }

    fn history_path(&self, agent_id: &str) -> PathBuf {
        self.root.join(format!("{agent_id}_history.jsonl"))
    }

    fn io_err(agent_id: &str, reason: impl std::fmt::Display) -> SlaterError {
        SlaterError::StoreIo {
            agent_id: agent_id.to_string(),
            reason: reason.to_string(),
        }
    }

    fn write_snapshot(&self, agent_id: &str, facts: &Facts) -> Result<()> {
        let path = self.snapshot_path(agent_id);
        let tmp = path.with_extension("tmp");

        let wire = facts.serialize()?;
        let json = serde_json::to_string_pretty(&wire)
            .map_err(|e| Self::io_err(agent_id, format!("serializing snapshot: {e}")))?;

        fs::write(&tmp, json).map_err(|e| Self::io_err(agent_id, format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Self::io_err(agent_id, format!("renaming {} -> {}: {e}", tmp.display(), path.display())))?;
        Ok(())
    }
}

impl StateStore for FileSystemStateStore {
    fn bootstrap(&self, agent_id: &str, config: &BootstrapConfig) -> Result<()> {
        let path = self.snapshot_path(agent_id);
        if path.exists() {
            tracing::info!(%agent_id, "bootstrap skipped, state already present");
            return Ok(());
        }
        let seed = seed_facts_from_config(config);
        self.write_snapshot(agent_id, &seed)?;
        tracing::info!(%agent_id, "bootstrapped initial state");
        Ok(())
    }

    fn load(&self, agent_id: &str) -> Result<Facts> {
        let path = self.snapshot_path(agent_id);
        if !path.exists() {
            return Ok(Facts::empty());
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| Self::io_err(agent_id, format!("reading {}: {e}", path.display())))?;
        let flat: BTreeMap<String, Value> = serde_json::from_str(&raw)
            .map_err(|e| Self::io_err(agent_id, format!("parsing snapshot: {e}")))?;
        Facts::deserialize(&flat)
    }

    fn save(&self, agent_id: &str, iteration_facts: &IterationFacts, persistent_facts: &Facts) -> Result<()> {
        self.write_snapshot(agent_id, persistent_facts)?;

        let history_path = self.history_path(agent_id);
        let mut by_action = BTreeMap::new();
        for (action, facts) in &iteration_facts.by_action {
            by_action.insert(action.clone(), facts.serialize()?);
        }
        let line = serde_json::json!({
            "iteration": iteration_facts.iteration,
            "phase": iteration_facts.phase,
            "timestamp": iteration_facts.timestamp,
            "facts_by_action": by_action,
        });
        let mut text = serde_json::to_string(&line)
            .map_err(|e| Self::io_err(agent_id, format!("serializing history line: {e}")))?;
        text.push('\n');

        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&history_path)
            .map_err(|e| Self::io_err(agent_id, format!("opening {}: {e}", history_path.display())))?;
        file.write_all(text.as_bytes())
            .map_err(|e| Self::io_err(agent_id, format!("appending history: {e}")))?;
        Ok(())
    }

    fn history(&self, agent_id: &str) -> Result<Vec<IterationFacts>> {
        let path = self.history_path(agent_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| Self::io_err(agent_id, format!("reading {}: {e}", path.display())))?;

        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| Self::io_err(agent_id, format!("parsing history line: {e}")))
            })
            .collect()
    }
}
