//! Capability registry: the static catalogue of skills and agents.
//!
//! Loaded once per run from `.warden/capabilities.yaml` when present,
//! otherwise from the built-in catalogue. Read-only during a run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// Passive guidance surfaced alongside the task.
    Skill,
    /// An autonomous delegate, gated by complexity.
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub name: String,
    pub kind: CapabilityKind,
    pub domain: String,
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Minimum task complexity before an agent is proposed. Ignored for skills.
    #[serde(default)]
    pub complexity_threshold: u32,
    /// A coordinator is proposed ahead of specialists on multi-domain tasks.
    #[serde(default)]
    pub coordinator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRegistry {
    capabilities: Vec<CapabilityEntry>,
}

impl CapabilityRegistry {
    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.capabilities
    }

    pub fn coordinator(&self) -> Option<&CapabilityEntry> {
        self.capabilities.iter().find(|e| e.coordinator)
    }

    /// Load a registry from a YAML file.
    ///
    /// # Returns
    /// * `Ok(Some(registry))` - File read and parsed
    /// * `Ok(None)` - File doesn't exist
    /// * `Err(_)` - Read or parse failure
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry: {}", path.display()))?;
        let registry =
            serde_yaml::from_str(&content).context("Failed to parse capabilities.yaml")?;
        Ok(Some(registry))
    }

    /// Load from file, falling back to the built-in catalogue.
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        Ok(Self::load(path)?.unwrap_or_else(Self::builtin))
    }

    /// The built-in catalogue used when no registry file is installed.
    pub fn builtin() -> Self {
        fn skill(name: &str, domain: &str, triggers: &[&str]) -> CapabilityEntry {
            CapabilityEntry {
                name: name.to_string(),
                kind: CapabilityKind::Skill,
                domain: domain.to_string(),
                triggers: triggers.iter().map(|t| t.to_string()).collect(),
                complexity_threshold: 0,
                coordinator: false,
            }
        }
        fn agent(name: &str, domain: &str, threshold: u32, triggers: &[&str]) -> CapabilityEntry {
            CapabilityEntry {
                name: name.to_string(),
                kind: CapabilityKind::Agent,
                domain: domain.to_string(),
                triggers: triggers.iter().map(|t| t.to_string()).collect(),
                complexity_threshold: threshold,
                coordinator: false,
            }
        }

        let mut capabilities = vec![
            skill(
                "css-styling",
                "frontend",
                &["css", "layout", "styling", "responsive"],
            ),
            skill("debugging", "quality", &["bug", "debugging", "error"]),
            skill("testing", "quality", &["test", "coverage"]),
            skill("rust-idioms", "backend", &["rust", "cargo"]),
            skill(
                "sql-migrations",
                "data",
                &["sql", "database", "migration"],
            ),
            agent(
                "ui-specialist",
                "frontend",
                5,
                &["ui", "layout", "render", "react", "frontend"],
            ),
            agent(
                "security-auditor",
                "security",
                8,
                &["security", "auth", "password", "token", "oauth"],
            ),
            agent(
                "deploy-engineer",
                "infra",
                5,
                &["docker", "deploy", "container", "kubernetes", "ci"],
            ),
        ];

        capabilities.push(CapabilityEntry {
            name: "tech-lead".to_string(),
            kind: CapabilityKind::Agent,
            domain: "coordination".to_string(),
            triggers: Vec::new(),
            complexity_threshold: 0,
            coordinator: true,
        });

        Self { capabilities }
    }
}
