//! Task decision engine.
//!
//! Scores a prompt by summing independently detected risk factors, then maps
//! the total onto an execution mode and a model tier through fixed bands.
//! Factors only ever add weight. Two floors sit outside the bands entirely:
//! security-sensitive work never drops below the standard tier, and
//! architecture-level work always gets the premium tier. A detected
//! repeat-failure loop forces mandatory planning regardless of score.

mod vocabulary;

use crate::config::DecisionConfig;
use serde::{Deserialize, Serialize};
use vocabulary::{
    AMBIGUOUS_TERMS, ARCHITECTURE_TERMS, MULTI_FILE_TERMS, SECURITY_TERMS, UI_TERMS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Direct,
    AskUser,
    PlanRecommended,
    PlanMandatory,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Direct => write!(f, "direct"),
            ExecutionMode::AskUser => write!(f, "ask_user"),
            ExecutionMode::PlanRecommended => write!(f, "plan_recommended"),
            ExecutionMode::PlanMandatory => write!(f, "plan_mandatory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Economy,
    Standard,
    Premium,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Economy => write!(f, "economy"),
            ModelTier::Standard => write!(f, "standard"),
            ModelTier::Premium => write!(f, "premium"),
        }
    }
}

/// Coarse task classification, used for session auto-tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Bugfix,
    Feature,
    Refactor,
    Deployment,
    Testing,
    Docs,
    General,
}

impl TaskType {
    pub fn tag(&self) -> &'static str {
        match self {
            TaskType::Bugfix => "bugfix",
            TaskType::Feature => "feature",
            TaskType::Refactor => "refactor",
            TaskType::Deployment => "deployment",
            TaskType::Testing => "testing",
            TaskType::Docs => "docs",
            TaskType::General => "general",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub complexity: u32,
    pub mode: ExecutionMode,
    pub tier: ModelTier,
    pub task_type: TaskType,
    /// Names of the risk factors that contributed.
    pub factors: Vec<String>,
}

impl Decision {
    /// Neutral default for internal errors: asking the user is always safe,
    /// a low-complexity fast path is not.
    pub fn fallback(config: &DecisionConfig) -> Self {
        Self {
            complexity: config.ask_at,
            mode: ExecutionMode::AskUser,
            tier: ModelTier::Standard,
            task_type: TaskType::General,
            factors: vec!["internal_error_fallback".to_string()],
        }
    }
}

/// Per-prompt inputs beyond the prompt text itself.
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    /// Recent attempt error signatures, oldest first.
    pub recent_error_signatures: Vec<String>,
    /// File count hint from the host tool, when it knows.
    pub file_count_hint: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, prompt: &str, ctx: &DecisionContext) -> Decision {
        let lowered = prompt.to_lowercase();
        let weights = &self.config.weights;
        let mut complexity = 0u32;
        let mut factors = Vec::new();

        let multi_file =
            contains_any(&lowered, MULTI_FILE_TERMS) || ctx.file_count_hint.is_some_and(|n| n > 1);
        if multi_file {
            complexity += weights.multi_file;
            factors.push("multi_file_scope".to_string());
        }

        let security = contains_any(&lowered, SECURITY_TERMS);
        if security {
            complexity += weights.security;
            factors.push("security_sensitive".to_string());
        }

        if contains_any(&lowered, UI_TERMS) {
            complexity += weights.ui_layout;
            factors.push("ui_layout".to_string());
        }

        if contains_any(&lowered, AMBIGUOUS_TERMS) || lowered.split_whitespace().count() < 3 {
            complexity += weights.ambiguous;
            factors.push("ambiguous_scope".to_string());
        }

        let architecture = contains_any(&lowered, ARCHITECTURE_TERMS);
        if architecture {
            complexity += weights.architecture;
            factors.push("architecture_level".to_string());
        }

        let looping = detect_failure_loop(&ctx.recent_error_signatures, self.config.loop_window);
        if looping {
            complexity += weights.failure_loop;
            factors.push("repeat_failure_loop".to_string());
        }

        let mut mode = self.mode_for(complexity);
        if looping {
            // Alternating failures mean the direct approach is not working
            mode = ExecutionMode::PlanMandatory;
        }

        let mut tier = self.tier_for(complexity);
        if security && tier < ModelTier::Standard {
            tier = ModelTier::Standard;
        }
        if architecture {
            tier = ModelTier::Premium;
        }

        Decision {
            complexity,
            mode,
            tier,
            task_type: classify_task(&lowered),
            factors,
        }
    }

    fn mode_for(&self, score: u32) -> ExecutionMode {
        let c = &self.config;
        if score >= c.plan_mandatory_at {
            ExecutionMode::PlanMandatory
        } else if score >= c.plan_recommended_at {
            ExecutionMode::PlanRecommended
        } else if score >= c.ask_at {
            ExecutionMode::AskUser
        } else {
            ExecutionMode::Direct
        }
    }

    fn tier_for(&self, score: u32) -> ModelTier {
        let c = &self.config;
        if score >= c.plan_mandatory_at {
            ModelTier::Premium
        } else if score >= c.ask_at {
            ModelTier::Standard
        } else {
            ModelTier::Economy
        }
    }
}

/// Detect a two-signature ping-pong in the most recent attempts: the last
/// three entries of the window alternating X, Y, X with X != Y.
pub fn detect_failure_loop(signatures: &[String], window: usize) -> bool {
    let recent: Vec<&String> = signatures.iter().rev().take(window).collect();
    if recent.len() < 3 {
        return false;
    }
    // recent[0] is the newest attempt
    let (a, b, c) = (recent[0], recent[1], recent[2]);
    a == c && a != b
}

/// Derive a coarse task type from the prompt. Expects lowercased input.
pub fn classify_task(lowered: &str) -> TaskType {
    let table: [(&[&str], TaskType); 6] = [
        (
            &["fix", "bug", "broken", "error", "crash", "not working"],
            TaskType::Bugfix,
        ),
        (
            &["deploy", "release", "docker", "ci", "pipeline", "kubernetes"],
            TaskType::Deployment,
        ),
        (&["refactor", "clean up", "restructure"], TaskType::Refactor),
        (&["test", "coverage", "assert"], TaskType::Testing),
        (&["document", "readme", "docs", "comment"], TaskType::Docs),
        (
            &["add", "implement", "create", "build", "feature"],
            TaskType::Feature,
        ),
    ];

    for (terms, task_type) in table {
        if contains_any(lowered, terms) {
            return task_type;
        }
    }
    TaskType::General
}

/// Multi-word terms match as phrases; single words match on word prefix,
/// so "auth" covers "authentication" without "ui" matching inside "build".
fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| {
        if needle.contains(' ') {
            haystack.contains(needle)
        } else {
            haystack
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| !w.is_empty() && w.starts_with(needle))
        }
    })
}
