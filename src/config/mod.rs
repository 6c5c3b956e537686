//! Pipeline configuration.
//!
//! Every tunable the pipeline consults - context tier thresholds, complexity
//! weights and band edges, lock timings, failure-confidence steps - lives here
//! rather than as constants scattered across stages. Values load from
//! `.warden/config.toml` and fall back to the documented defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub context: ContextConfig,
    pub decision: DecisionConfig,
    pub lock: LockConfig,
    pub failures: FailureConfig,
    pub chain: ChainConfig,
    pub pipeline: PipelineConfig,
}

/// Context budget tier thresholds, as fractions of the budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub caution_at: f64,
    pub compact_at: f64,
    pub critical_at: f64,
    /// Serialized session size treated as 100% of the budget.
    pub byte_budget: u64,
    /// Request count treated as 100% of the budget.
    pub request_budget: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            caution_at: 0.70,
            compact_at: 0.85,
            critical_at: 0.90,
            byte_budget: 256 * 1024,
            request_budget: 200,
        }
    }
}

/// Additive risk weights for the task decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub multi_file: u32,
    pub security: u32,
    pub ui_layout: u32,
    pub ambiguous: u32,
    pub failure_loop: u32,
    pub architecture: u32,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            multi_file: 4,
            security: 6,
            ui_layout: 3,
            ambiguous: 3,
            failure_loop: 8,
            architecture: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub weights: RiskWeights,
    /// Score at which `Direct` ends and `AskUser` begins.
    pub ask_at: u32,
    pub plan_recommended_at: u32,
    pub plan_mandatory_at: u32,
    /// How many recent attempt signatures the loop detector keeps.
    pub loop_window: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            ask_at: 5,
            plan_recommended_at: 10,
            plan_mandatory_at: 20,
            loop_window: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// A live holder whose heartbeat is older than this is expired.
    pub heartbeat_timeout_secs: u64,
    pub retry_attempts: u32,
    /// First backoff delay; doubles per attempt.
    pub retry_initial_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 30,
            retry_attempts: 5,
            retry_initial_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    /// Confidence at or above which a stored correction is applied silently.
    pub auto_correct_threshold: f64,
    /// Confidence assigned to a pattern on first sighting.
    pub initial_confidence: f64,
    /// Additive gain on a confirmed repeat, capped at 1.0.
    pub confirm_gain: f64,
    /// Multiplier applied when a correction fails or a pattern goes stale.
    pub decay_factor: f64,
    /// Patterns unseen for this long decay during the stop-hook sweep.
    pub stale_after_days: i64,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            auto_correct_threshold: 0.75,
            initial_confidence: 0.3,
            confirm_gain: 0.15,
            decay_factor: 0.6,
            stale_after_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Sessions sharing at least this many tags become related.
    pub relate_min_shared_tags: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            relate_min_shared_tags: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Budget for any single non-gate stage before it degrades to skip.
    pub stage_timeout_secs: u64,
    /// The health gate's time budget.
    pub health_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 10,
            health_timeout_secs: 30,
        }
    }
}

impl WardenConfig {
    /// Load config from a TOML file.
    ///
    /// # Returns
    /// * `Ok(Some(config))` - File read and parsed
    /// * `Ok(None)` - File doesn't exist
    /// * `Err(_)` - Read or parse failure
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config =
            toml::from_str(&content).context("Failed to parse config.toml")?;

        Ok(Some(config))
    }

    /// Load config, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        Ok(Self::load(path)?.unwrap_or_default())
    }
}
