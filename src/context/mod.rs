//! Context budget tracker.
//!
//! Classifies the current session's footprint into a coarse tier so later
//! stages can request reduced detail or trigger a save-and-compact. Pure
//! function of known state size; thresholds come from configuration.

use crate::config::ContextConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetTier {
    Normal,
    Caution,
    Compact,
    Critical,
}

impl std::fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetTier::Normal => write!(f, "normal"),
            BudgetTier::Caution => write!(f, "caution"),
            BudgetTier::Compact => write!(f, "compact"),
            BudgetTier::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetReport {
    pub usage_fraction: f64,
    pub tier: BudgetTier,
}

impl BudgetReport {
    /// Whether later stages should prefer reduced-detail operations.
    pub fn wants_reduced_detail(&self) -> bool {
        matches!(self.tier, BudgetTier::Compact | BudgetTier::Critical)
    }
}

/// Map a usage fraction onto a tier using configured thresholds.
pub fn tier_for(usage_fraction: f64, config: &ContextConfig) -> BudgetTier {
    if usage_fraction >= config.critical_at {
        BudgetTier::Critical
    } else if usage_fraction >= config.compact_at {
        BudgetTier::Compact
    } else if usage_fraction >= config.caution_at {
        BudgetTier::Caution
    } else {
        BudgetTier::Normal
    }
}

/// Estimate current usage from the active session's request count and its
/// serialized byte size. Whichever budget is closer to exhaustion wins.
pub fn estimate(request_count: u32, state_bytes: u64, config: &ContextConfig) -> BudgetReport {
    let by_requests = if config.request_budget == 0 {
        0.0
    } else {
        request_count as f64 / config.request_budget as f64
    };
    let by_bytes = if config.byte_budget == 0 {
        0.0
    } else {
        state_bytes as f64 / config.byte_budget as f64
    };

    let usage_fraction = by_requests.max(by_bytes);
    BudgetReport {
        usage_fraction,
        tier: tier_for(usage_fraction, config),
    }
}
