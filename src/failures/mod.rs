//! Failure knowledge base.
//!
//! A confidence-weighted store of failure patterns keyed by stable operation
//! signatures. Before a risky operation the pipeline consults the store: a
//! high-confidence match applies its correction transparently, a
//! low-confidence match only warns - the KB never blocks on a guess. After
//! execution the store learns: new failures create low-confidence patterns,
//! confirmed repeats raise confidence monotonically toward 1.0, failed
//! corrections and staleness decay it. Patterns are never deleted.
//!
//! Confidence updates are pure `(old, outcome) -> new` transforms so they can
//! be tested without any storage.

use crate::config::FailureConfig;
use crate::lock::{LockCoordinator, LockError, FAILURES_RESOURCE};
use crate::state::StateDir;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::warn;

/// An attempted operation, as seen by the hook boundary.
#[derive(Debug, Clone, Copy)]
pub struct Operation<'a> {
    /// Tool or stage name ("Bash", "Edit", "prompt").
    pub kind: &'a str,
    /// The operation payload: command line, file path, prompt text.
    pub detail: &'a str,
}

/// A string rewrite applied to an operation's detail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrectionRule {
    pub find: String,
    pub replace_with: String,
}

impl CorrectionRule {
    pub fn apply(&self, detail: &str) -> String {
        detail.replace(&self.find, &self.replace_with)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub signature: String,
    /// Normalized operation text the signature was derived from.
    pub matcher: String,
    pub correction: Option<CorrectionRule>,
    pub confidence: f64,
    pub occurrences: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Result of consulting the store before an operation.
#[derive(Debug, Clone, Default)]
pub struct Precheck {
    pub pattern: Option<FailurePattern>,
    /// Detail with the correction applied, when confidence clears the bar.
    pub corrected_detail: Option<String>,
    pub auto_applied: bool,
    pub warning: Option<String>,
}

/// What actually happened when the operation ran.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub success: bool,
    pub error: Option<String>,
    /// Whether a KB correction had been applied before execution.
    pub correction_was_applied: bool,
}

/// Monotonic rise toward 1.0 on a confirmed repeat.
pub fn raise_confidence(old: f64, gain: f64) -> f64 {
    (old + gain).min(1.0)
}

/// Multiplicative decay, floored at zero.
pub fn decay_confidence(old: f64, factor: f64) -> f64 {
    (old * factor).clamp(0.0, 1.0)
}

/// Stable signature for an operation: normalize away volatile fragments
/// (numbers, paths, whitespace runs), then hash.
pub fn signature(op: &Operation) -> String {
    let normalized = normalize(op);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

fn normalize(op: &Operation) -> String {
    static NUMBERS: OnceLock<Regex> = OnceLock::new();
    static PATHS: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();

    let numbers = NUMBERS.get_or_init(|| Regex::new(r"\d+").expect("static regex"));
    let paths = PATHS.get_or_init(|| Regex::new(r"/[\w./-]+").expect("static regex"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    let lowered = format!("{} {}", op.kind, op.detail).to_lowercase();
    let without_paths = paths.replace_all(&lowered, "<path>");
    let without_numbers = numbers.replace_all(&without_paths, "<n>");
    spaces.replace_all(&without_numbers, " ").trim().to_string()
}

pub struct FailureKb<'a> {
    state: &'a StateDir,
    locks: &'a LockCoordinator,
    config: FailureConfig,
}

impl<'a> FailureKb<'a> {
    pub fn new(state: &'a StateDir, locks: &'a LockCoordinator, config: FailureConfig) -> Self {
        Self {
            state,
            locks,
            config,
        }
    }

    fn store_path(&self) -> PathBuf {
        self.state.failures_dir().join("patterns.json")
    }

    pub fn load_patterns(&self) -> Result<BTreeMap<String, FailurePattern>> {
        Ok(self.state.read_json(&self.store_path())?.unwrap_or_default())
    }

    fn save_patterns(&self, patterns: &BTreeMap<String, FailurePattern>) -> Result<()> {
        self.state.write_json(&self.store_path(), patterns)
    }

    /// Read-only consultation before a risky operation.
    pub fn check_before(&self, op: &Operation) -> Result<Precheck> {
        let patterns = self.load_patterns()?;
        let key = signature(op);

        let Some(pattern) = patterns.get(&key).cloned() else {
            return Ok(Precheck::default());
        };

        let mut precheck = Precheck {
            pattern: Some(pattern.clone()),
            ..Precheck::default()
        };

        match &pattern.correction {
            Some(rule) if pattern.confidence >= self.config.auto_correct_threshold => {
                precheck.corrected_detail = Some(rule.apply(op.detail));
                precheck.auto_applied = true;
            }
            _ => {
                precheck.warning = Some(format!(
                    "this operation failed {} time(s) before (confidence {:.2})",
                    pattern.occurrences, pattern.confidence
                ));
            }
        }

        Ok(precheck)
    }

    /// Fold an execution outcome back into the store.
    ///
    /// - failure, no pattern: create one at the initial confidence
    /// - failure, pattern matched, correction had been applied: the
    ///   correction did not work, decay
    /// - failure, pattern matched otherwise: confirmed repeat, raise
    /// - success after an applied correction: the correction works, raise
    /// - plain success: nothing to learn
    pub fn learn(&self, op: &Operation, outcome: &Outcome) -> Result<()> {
        if outcome.success && !outcome.correction_was_applied {
            return Ok(());
        }

        let _guard = self.lock_best_effort();
        let mut patterns = self.load_patterns()?;
        let key = signature(op);
        let now = Utc::now();

        match patterns.get_mut(&key) {
            Some(pattern) => {
                pattern.last_seen = now;
                if outcome.success {
                    pattern.confidence =
                        raise_confidence(pattern.confidence, self.config.confirm_gain);
                } else if outcome.correction_was_applied {
                    pattern.confidence =
                        decay_confidence(pattern.confidence, self.config.decay_factor);
                    pattern.occurrences += 1;
                } else {
                    pattern.confidence =
                        raise_confidence(pattern.confidence, self.config.confirm_gain);
                    pattern.occurrences += 1;
                }
            }
            None if !outcome.success => {
                patterns.insert(
                    key.clone(),
                    FailurePattern {
                        signature: key,
                        matcher: normalize(op),
                        correction: None,
                        confidence: self.config.initial_confidence,
                        occurrences: 1,
                        first_seen: now,
                        last_seen: now,
                    },
                );
            }
            None => {}
        }

        self.save_patterns(&patterns)
    }

    /// Attach or replace the correction transform on an existing pattern.
    pub fn attach_correction(&self, sig: &str, rule: CorrectionRule) -> Result<bool> {
        let _guard = self.lock_best_effort();
        let mut patterns = self.load_patterns()?;
        let Some(pattern) = patterns.get_mut(sig) else {
            return Ok(false);
        };
        pattern.correction = Some(rule);
        self.save_patterns(&patterns)?;
        Ok(true)
    }

    /// Decay patterns unseen for the configured staleness window. Run from
    /// the session-stop learning pass. Returns how many decayed.
    pub fn decay_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.lock_best_effort();
        let mut patterns = self.load_patterns()?;
        let cutoff = now - Duration::days(self.config.stale_after_days);

        let mut decayed = 0;
        for pattern in patterns.values_mut() {
            if pattern.last_seen < cutoff {
                pattern.confidence = decay_confidence(pattern.confidence, self.config.decay_factor);
                decayed += 1;
            }
        }

        if decayed > 0 {
            self.save_patterns(&patterns)?;
        }
        Ok(decayed)
    }

    fn lock_best_effort(&self) -> Option<crate::lock::LockHandle> {
        match self.locks.acquire(FAILURES_RESOURCE) {
            Ok(handle) => Some(handle),
            Err(LockError::Exhausted { holder, .. }) => {
                warn!(holder, "failures lock exhausted, writing unsynchronized");
                None
            }
            Err(e) => {
                warn!(error = %e, "failures lock unavailable, writing unsynchronized");
                None
            }
        }
    }
}
