//! Bootstrap configuration: the seed state loaded before an agent's first
//! iteration.
//!
//! Configuration is YAML, loaded once at startup and merged with CLI
//! overrides. Unknown top-level keys are preserved (not rejected) so a
//! bootstrap file can carry agent-specific seed data beyond the fields this
//! crate knows about; they surface as iteration-context inputs rather than
//! `Facts`, the same passthrough behavior the reference config layer
//! provided.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Repository context to seed as durable facts at bootstrap.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RepoConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// LLM provider selection. A provider of `"fake"`, `"test"`, or `"mock"`
/// tells the controller to omit an LLM client from the iteration context
/// entirely, rather than constructing one against a nonexistent backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    0.2
}

impl LlmConfig {
    /// Providers for which the controller skips constructing an LLM client.
    const NO_CLIENT_PROVIDERS: &'static [&'static str] = &["fake", "test", "mock"];

    #[must_use]
    pub fn needs_client(&self) -> bool {
        !Self::NO_CLIENT_PROVIDERS.contains(&self.provider.as_str())
    }
}

/// Top-level bootstrap configuration. `extra` preserves any YAML keys this
/// struct doesn't model by name, mirroring the reference config layer's
/// permissive top-level passthrough.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BootstrapConfig {
    pub goal: Option<String>,
    pub repo: Option<RepoConfig>,
    pub llm: Option<LlmConfig>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl BootstrapConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading bootstrap config at {}", path.display()))?;
        let parsed: BootstrapConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing bootstrap config at {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded bootstrap config");
        Ok(parsed)
    }

    /// Load from a YAML file if it exists, falling back to an empty config.
    /// Mirrors the reference CLI's tolerance of a missing bootstrap file —
    /// an agent may start from pure defaults.
    pub fn from_yaml_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_yaml(path)
        } else {
            tracing::info!(path = %path.display(), "no bootstrap config found, using defaults");
            Ok(Self::default())
        }
    }

    /// Apply CLI overrides. CLI flags take precedence over file config,
    /// matching the file → env → CLI precedence used throughout this crate.
    pub fn apply_cli_overrides(&mut self, goal: Option<String>, repo_root: Option<PathBuf>) {
        if let Some(goal) = goal {
            self.goal = Some(goal);
        }
        if let Some(root) = repo_root {
            match self.repo.as_mut() {
                Some(repo) => repo.root = root,
                None => {
                    self.repo = Some(RepoConfig {
                        root,
                        ignore: Vec::new(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_yaml() {
        let yaml = "goal: refactor the parser\n";
        let cfg: BootstrapConfig = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(cfg.goal.as_deref(), Some("refactor the parser"));
        assert!(cfg.repo.is_none());
    }

    #[test]
    fn preserves_unknown_top_level_keys() {
        let yaml = "goal: ship it\ncustom_field: 42\n";
        let cfg: BootstrapConfig = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(cfg.extra.get("custom_field"), Some(&Value::from(42)));
    }

    #[test]
    fn llm_config_skips_client_for_fake_providers() {
        let fake = LlmConfig {
            provider: "fake".to_string(),
            model: "none".to_string(),
            temperature: 0.0,
        };
        assert!(!fake.needs_client());

        let real = LlmConfig {
            provider: "openai".to_string(),
            model: "gpt-4.1-mini".to_string(),
            temperature: 0.2,
        };
        assert!(real.needs_client());
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let mut cfg = BootstrapConfig {
            goal: Some("old goal".to_string()),
            ..Default::default()
        };
        cfg.apply_cli_overrides(Some("new goal".to_string()), None);
        assert_eq!(cfg.goal.as_deref(), Some("new goal"));
    }
}
