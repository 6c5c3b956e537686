//! Session chain store: incremental accumulation, auto-tagging, relation
//! discovery and terminal summarization.
//!
//! All writes go through the chain lock. Chain bookkeeping is best-effort
//! relative to the user's actual task: callers log failures here and carry
//! on, they never abort the pipeline over them.

mod index;

pub use index::ChainIndex;

use crate::config::ChainConfig;
use crate::lock::{LockCoordinator, LockError, LockHandle, CHAIN_RESOURCE};
use crate::session::identity::{load_session, save_session};
use crate::session::{RequestRecord, Session};
use crate::state::StateDir;
use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct ChainStore<'a> {
    state: &'a StateDir,
    locks: &'a LockCoordinator,
    config: ChainConfig,
}

impl<'a> ChainStore<'a> {
    pub fn new(state: &'a StateDir, locks: &'a LockCoordinator, config: ChainConfig) -> Self {
        Self {
            state,
            locks,
            config,
        }
    }

    fn index_path(&self) -> PathBuf {
        self.state.chain_dir().join("index.json")
    }

    pub fn load_index(&self) -> Result<ChainIndex> {
        Ok(self.state.read_json(&self.index_path())?.unwrap_or_default())
    }

    fn save_index(&self, index: &ChainIndex) -> Result<()> {
        self.state.write_json(&self.index_path(), index)
    }

    /// Take the chain lock, degrading to an unsynchronized write when
    /// retries are exhausted. The boolean is true when unsynchronized.
    fn lock_or_flag(&self) -> Result<(Option<LockHandle>, bool)> {
        match self.locks.acquire(CHAIN_RESOURCE) {
            Ok(handle) => Ok((Some(handle), false)),
            Err(LockError::Exhausted { holder, .. }) => {
                warn!(holder, "chain lock exhausted, proceeding unsynchronized");
                Ok((None, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn load_required(&self, session_id: &str) -> Result<Session> {
        match load_session(self.state, session_id)? {
            Some(session) => Ok(session),
            None => bail!("Session not found: {session_id}"),
        }
    }

    /// Append a request record and fold it into the session aggregates.
    pub fn accumulate(&self, session_id: &str, record: RequestRecord) -> Result<()> {
        let (_handle, unsynchronized) = self.lock_or_flag()?;
        let mut session = self.load_required(session_id)?;
        session.accumulate(record);
        session.reconcile |= unsynchronized;
        save_session(self.state, &session)
    }

    /// Derive tags from the latest request and merge them into the session
    /// and the inverted index. Idempotent.
    pub fn auto_tag(&self, session_id: &str) -> Result<BTreeSet<String>> {
        let (_handle, unsynchronized) = self.lock_or_flag()?;
        let mut session = self.load_required(session_id)?;

        let Some(latest) = session.requests.last() else {
            return Ok(BTreeSet::new());
        };

        let mut derived: BTreeSet<String> = BTreeSet::new();
        derived.insert(latest.task_type.tag().to_string());
        if let Some(capability) = &latest.capability {
            derived.insert(capability.clone());
        }
        derived.extend(latest.tags.iter().cloned());
        if let Some(dir) = &latest.working_dir {
            if let Some(name) = dir.file_name() {
                derived.insert(name.to_string_lossy().to_lowercase());
            }
        }

        session.tags.extend(derived.iter().cloned());
        session.reconcile |= unsynchronized;
        save_session(self.state, &session)?;

        let mut index = self.load_index()?;
        for tag in &session.tags {
            index.insert(tag, session_id);
        }
        self.save_index(&index)?;

        debug!(session_id, tags = ?derived, "auto-tagged session");
        Ok(derived)
    }

    /// Insert symmetric related-edges to every other session sharing at
    /// least the configured number of tags. Uses the inverted index only.
    ///
    /// This is the longest-held use of the chain lock (one write per
    /// candidate), so the heartbeat is refreshed as the walk progresses.
    pub fn auto_relate(&self, session_id: &str) -> Result<Vec<String>> {
        let (handle, unsynchronized) = self.lock_or_flag()?;
        let mut session = self.load_required(session_id)?;
        let index = self.load_index()?;

        let counts = index.shared_tag_counts(&session.tags, session_id);
        let mut added = Vec::new();

        for (other_id, shared) in counts {
            if shared < self.config.relate_min_shared_tags {
                continue;
            }
            if let Some(handle) = &handle {
                if let Err(e) = self.locks.heartbeat(handle) {
                    warn!(error = %e, "failed to refresh chain lock heartbeat");
                }
            }
            if session.related_ids.contains(&other_id) {
                continue;
            }
            // Both directions, or neither
            let Some(mut other) = load_session(self.state, &other_id)? else {
                continue;
            };
            other.related_ids.insert(session_id.to_string());
            save_session(self.state, &other)?;

            session.related_ids.insert(other_id.clone());
            added.push(other_id);
        }

        if !added.is_empty() || unsynchronized {
            session.reconcile |= unsynchronized;
            save_session(self.state, &session)?;
        }

        Ok(added)
    }

    /// Close the session with a terminal digest. Idempotent: a second call
    /// returns the digest produced by the first.
    pub fn finalize(&self, session_id: &str) -> Result<String> {
        let (_handle, unsynchronized) = self.lock_or_flag()?;
        let mut session = self.load_required(session_id)?;

        if let (false, Some(summary)) = (session.is_active(), session.summary.clone()) {
            return Ok(summary);
        }

        let summary = digest(&session);
        session.summary = Some(summary.clone());
        session.close()?;
        session.reconcile |= unsynchronized;
        save_session(self.state, &session)?;

        Ok(summary)
    }
}

/// One-line terminal digest. Deterministic for a frozen session.
fn digest(session: &Session) -> String {
    let tags: Vec<&str> = session.tags.iter().map(String::as_str).collect();
    let capability = session.top_capability().unwrap_or("none");
    format!(
        "{} requests, {} tags [{}], peak complexity {}, top capability {}",
        session.requests.len(),
        tags.len(),
        tags.join(", "),
        session.max_complexity,
        capability
    )
}

/// Walk parent links to decide whether `ancestor` is an ancestor of `id`.
/// Bounded by a visited set, so a corrupt cyclic chain terminates.
pub fn is_ancestor(state: &StateDir, ancestor: &str, id: &str) -> Result<bool> {
    let mut visited = BTreeSet::new();
    let mut cursor = id.to_string();

    while visited.insert(cursor.clone()) {
        let Some(session) = load_session(state, &cursor)? else {
            return Ok(false);
        };
        match session.parent_id {
            Some(parent) if parent == ancestor => return Ok(true),
            Some(parent) => cursor = parent,
            None => return Ok(false),
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::decision::{ModelTier, TaskType};
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup(temp: &TempDir) -> (StateDir, LockCoordinator) {
        let state = StateDir::new(temp.path());
        state.initialize().unwrap();
        let locks = LockCoordinator::new(state.locks_dir(), LockConfig::default());
        (state, locks)
    }

    fn record(task_type: TaskType, capability: Option<&str>, complexity: u32) -> RequestRecord {
        RequestRecord {
            timestamp: Utc::now(),
            prompt: "p".to_string(),
            task_type,
            tags: BTreeSet::new(),
            complexity,
            tier: ModelTier::Economy,
            capability: capability.map(String::from),
            working_dir: None,
        }
    }

    fn new_session(state: &StateDir) -> Session {
        let session = Session::new(None);
        save_session(state, &session).unwrap();
        session
    }

    #[test]
    fn test_accumulate_appends_and_aggregates() {
        let temp = TempDir::new().unwrap();
        let (state, locks) = setup(&temp);
        let chain = ChainStore::new(&state, &locks, ChainConfig::default());
        let session = new_session(&state);

        chain
            .accumulate(&session.id, record(TaskType::Bugfix, Some("debugging"), 7))
            .unwrap();
        chain
            .accumulate(&session.id, record(TaskType::Bugfix, Some("debugging"), 3))
            .unwrap();

        let reloaded = load_session(&state, &session.id).unwrap().unwrap();
        assert_eq!(reloaded.requests.len(), 2);
        assert_eq!(reloaded.max_complexity, 7);
        assert_eq!(reloaded.capability_counts["debugging"], 2);
    }

    #[test]
    fn test_auto_tag_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let (state, locks) = setup(&temp);
        let chain = ChainStore::new(&state, &locks, ChainConfig::default());
        let session = new_session(&state);

        chain
            .accumulate(
                &session.id,
                record(TaskType::Deployment, Some("deploy-engineer"), 5),
            )
            .unwrap();
        chain.auto_tag(&session.id).unwrap();
        chain.auto_tag(&session.id).unwrap();

        let reloaded = load_session(&state, &session.id).unwrap().unwrap();
        assert!(reloaded.tags.contains("deployment"));
        assert!(reloaded.tags.contains("deploy-engineer"));

        let index = chain.load_index().unwrap();
        assert_eq!(index.sessions_with_tag("deployment").unwrap().len(), 1);
    }

    #[test]
    fn test_auto_relate_is_symmetric() {
        let temp = TempDir::new().unwrap();
        let (state, locks) = setup(&temp);
        let chain = ChainStore::new(&state, &locks, ChainConfig::default());

        let a = new_session(&state);
        let b = new_session(&state);
        for id in [&a.id, &b.id] {
            chain
                .accumulate(id, record(TaskType::Deployment, Some("deploy-engineer"), 5))
                .unwrap();
            chain.auto_tag(id).unwrap();
        }

        let added = chain.auto_relate(&b.id).unwrap();
        assert_eq!(added, vec![a.id.clone()]);

        let a_reloaded = load_session(&state, &a.id).unwrap().unwrap();
        let b_reloaded = load_session(&state, &b.id).unwrap().unwrap();
        assert!(a_reloaded.related_ids.contains(&b.id));
        assert!(b_reloaded.related_ids.contains(&a.id));
    }

    #[test]
    fn test_auto_relate_requires_min_shared_tags() {
        let temp = TempDir::new().unwrap();
        let (state, locks) = setup(&temp);
        let chain = ChainStore::new(&state, &locks, ChainConfig::default());

        let a = new_session(&state);
        let b = new_session(&state);
        // a: deployment tags; b: only shares the task-type tag
        chain
            .accumulate(&a.id, record(TaskType::Deployment, Some("deploy-engineer"), 5))
            .unwrap();
        chain.auto_tag(&a.id).unwrap();
        chain
            .accumulate(&b.id, record(TaskType::Deployment, None, 2))
            .unwrap();
        chain.auto_tag(&b.id).unwrap();

        let added = chain.auto_relate(&b.id).unwrap();
        assert!(added.is_empty());
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let (state, locks) = setup(&temp);
        let chain = ChainStore::new(&state, &locks, ChainConfig::default());
        let session = new_session(&state);

        chain
            .accumulate(&session.id, record(TaskType::Bugfix, Some("debugging"), 9))
            .unwrap();

        let first = chain.finalize(&session.id).unwrap();
        let second = chain.finalize(&session.id).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("1 requests"));
        assert!(first.contains("peak complexity 9"));

        let reloaded = load_session(&state, &session.id).unwrap().unwrap();
        assert!(!reloaded.is_active());
    }

    #[test]
    fn test_no_session_is_its_own_ancestor() {
        let temp = TempDir::new().unwrap();
        let (state, locks) = setup(&temp);
        let _ = locks;

        let a = new_session(&state);
        let mut b = Session::new(Some(a.id.clone()));
        save_session(&state, &b).unwrap();
        let c = Session::new(Some(b.id.clone()));
        save_session(&state, &c).unwrap();
        b.child_ids.insert(c.id.clone());
        save_session(&state, &b).unwrap();

        assert!(is_ancestor(&state, &a.id, &c.id).unwrap());
        assert!(is_ancestor(&state, &b.id, &c.id).unwrap());
        assert!(!is_ancestor(&state, &c.id, &a.id).unwrap());
        assert!(!is_ancestor(&state, &a.id, &a.id).unwrap());
    }
}
