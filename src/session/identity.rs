//! Session identity: the `current` pointer and ACTIVE/CLOSED transitions.
//!
//! Every run resolves the active session: no pointer, a dangling pointer, or
//! a pointer at a closed session all mean a new session starts, recording the
//! prior one as parent. Creation runs under the chain lock so two windows
//! starting at once cannot mint duplicate sessions for the same logical
//! start; if the lock cannot be had, creation proceeds unsynchronized with
//! the record flagged for reconciliation.

use super::Session;
use crate::lock::{LockCoordinator, LockError, CHAIN_RESOURCE};
use crate::state::StateDir;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub fn session_path(state: &StateDir, id: &str) -> PathBuf {
    state.sessions_dir().join(format!("{id}.json"))
}

fn pointer_path(state: &StateDir) -> PathBuf {
    state.sessions_dir().join("current")
}

/// Read the current-session pointer.
pub fn current_session_id(state: &StateDir) -> Result<Option<String>> {
    let path = pointer_path(state);
    match fs::read_to_string(&path) {
        Ok(content) => {
            let id = content.trim().to_string();
            Ok(if id.is_empty() { None } else { Some(id) })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

pub fn load_session(state: &StateDir, id: &str) -> Result<Option<Session>> {
    state.read_json(&session_path(state, id))
}

pub fn save_session(state: &StateDir, session: &Session) -> Result<()> {
    state.write_json(&session_path(state, &session.id), session)
}

fn write_pointer(state: &StateDir, id: &str) -> Result<()> {
    fs::write(pointer_path(state), id).context("Failed to write current-session pointer")
}

/// Resolve the active session, creating one when none exists.
///
/// Lock exhaustion degrades to unsynchronized creation with
/// `session.reconcile = true` rather than failing the pipeline.
pub fn ensure_active(state: &StateDir, locks: &LockCoordinator) -> Result<Session> {
    match locks.acquire(CHAIN_RESOURCE) {
        Ok(handle) => {
            let session = ensure_active_inner(state, false);
            if let Err(e) = handle.release() {
                warn!(error = %e, "failed to release chain lock");
            }
            session
        }
        Err(LockError::Exhausted { holder, .. }) => {
            warn!(holder, "chain lock exhausted, creating session unsynchronized");
            ensure_active_inner(state, true)
        }
        Err(e) => Err(e.into()),
    }
}

fn ensure_active_inner(state: &StateDir, reconcile: bool) -> Result<Session> {
    let prior_id = current_session_id(state)?;
    let prior = match &prior_id {
        Some(id) => load_session(state, id)?,
        None => None,
    };

    if let Some(session) = &prior {
        if session.is_active() {
            return Ok(session.clone());
        }
    }

    // Parent only when the prior record actually exists; a quarantined
    // pointer target leaves the new session parentless.
    let parent_id = prior.as_ref().map(|p| p.id.clone());
    let mut session = Session::new(parent_id.clone());
    session.reconcile = reconcile;

    if let Some(mut parent) = prior {
        parent.child_ids.insert(session.id.clone());
        save_session(state, &parent)?;
    }

    save_session(state, &session)?;
    write_pointer(state, &session.id)?;

    Ok(session)
}
