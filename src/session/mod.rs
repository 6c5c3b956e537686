//! Session records and the identity state machine.
//!
//! A session is one continuous interaction span, bounded by explicit reset
//! events. Records are JSON files under `sessions/`, one per session, plus a
//! `current` pointer file naming the active one. Closed sessions are frozen
//! except for relation and tag updates made by newer sessions referencing
//! them.

pub mod identity;

use crate::decision::{ModelTier, TaskType};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "Active"),
            SessionStatus::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionStatus {
    /// Active may close; Closed is terminal. Same-state transitions are
    /// no-ops.
    pub fn can_transition_to(&self, new_status: &SessionStatus) -> bool {
        if self == new_status {
            return true;
        }
        matches!(
            (self, new_status),
            (SessionStatus::Active, SessionStatus::Closed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Closed)
    }
}

/// One prompt's worth of derived bookkeeping. Append-only: never mutated
/// after `Session::accumulate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    pub task_type: TaskType,
    pub tags: BTreeSet<String>,
    pub complexity: u32,
    pub tier: ModelTier,
    pub capability: Option<String>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub child_ids: BTreeSet<String>,
    #[serde(default)]
    pub related_ids: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub requests: Vec<RequestRecord>,
    /// Incrementally maintained aggregates; never recomputed from history.
    #[serde(default)]
    pub max_complexity: u32,
    #[serde(default)]
    pub capability_counts: BTreeMap<String, u32>,
    /// Recent attempt error signatures for loop detection, oldest first.
    #[serde(default)]
    pub recent_errors: Vec<String>,
    pub summary: Option<String>,
    /// Set when a write had to proceed without its lock.
    #[serde(default)]
    pub reconcile: bool,
}

impl Session {
    pub fn new(parent_id: Option<String>) -> Self {
        Self {
            id: generate_id(),
            status: SessionStatus::Active,
            started_at: Utc::now(),
            closed_at: None,
            parent_id,
            child_ids: BTreeSet::new(),
            related_ids: BTreeSet::new(),
            tags: BTreeSet::new(),
            requests: Vec::new(),
            max_complexity: 0,
            capability_counts: BTreeMap::new(),
            recent_errors: Vec::new(),
            summary: None,
            reconcile: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Append a request and fold it into the session aggregates.
    pub fn accumulate(&mut self, record: RequestRecord) {
        self.max_complexity = self.max_complexity.max(record.complexity);
        if let Some(capability) = &record.capability {
            *self.capability_counts.entry(capability.clone()).or_insert(0) += 1;
        }
        self.requests.push(record);
    }

    /// Record an attempt error signature, keeping the window bounded.
    pub fn push_error_signature(&mut self, signature: String, window: usize) {
        self.recent_errors.push(signature);
        let overflow = self.recent_errors.len().saturating_sub(window.max(1));
        if overflow > 0 {
            self.recent_errors.drain(0..overflow);
        }
    }

    /// Close the session. Idempotent: closing an already-closed session
    /// keeps its original `closed_at`.
    pub fn close(&mut self) -> Result<()> {
        if !self.status.can_transition_to(&SessionStatus::Closed) {
            bail!("Invalid session status transition: {} -> Closed", self.status);
        }
        if self.status == SessionStatus::Closed {
            return Ok(());
        }
        self.status = SessionStatus::Closed;
        self.closed_at = Some(Utc::now());
        Ok(())
    }

    /// The capability used most often this session.
    pub fn top_capability(&self) -> Option<&str> {
        self.capability_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(name, _)| name.as_str())
    }
}

/// Time-encoded id with a random suffix: sortable by start time, collision
/// safe across windows starting in the same second.
pub fn generate_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = uuid::Uuid::new_v4()
        .to_string()
        .split('-')
        .next()
        .unwrap_or("")
        .to_string();
    format!("s{timestamp}-{suffix}")
}
