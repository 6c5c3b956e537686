//! Window lock coordinator.
//!
//! Several assistant windows may run the pipeline at once against the same
//! `.warden/` store, so every read-modify-write of shared state takes a
//! per-resource advisory lock first. A lock is a JSON record (holder pid,
//! acquisition time, heartbeat) under `locks/`; a sibling guard file carries
//! an `fs2` exclusive flock that serializes record updates within a host.
//!
//! Reclaim rules:
//! - holder pid no longer alive: reclaimable immediately
//! - holder alive but heartbeat older than the configured timeout: reclaimable
//! - holder alive and fresh: retry with doubling backoff, then
//!   [`LockError::Exhausted`]
//!
//! This is best-effort mutual exclusion, not a linearizable lock service: the
//! gap between observing a stale record and rewriting it is bounded by the
//! guard flock on one host but remains a race across hosts. Callers that see
//! `Exhausted` proceed unsynchronized and flag the write for reconciliation.

use crate::config::LockConfig;
use crate::process::is_process_alive;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::thread;
use tracing::{debug, warn};

/// Shared resources the pipeline locks. Session records and the chain index
/// move together, so they share one resource.
pub const CHAIN_RESOURCE: &str = "chain";
pub const FAILURES_RESOURCE: &str = "failures";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock '{resource}' still held by pid {holder} after {attempts} attempts")]
    Exhausted {
        resource: String,
        holder: u32,
        attempts: u32,
    },
    #[error("lock io failure for '{resource}': {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

impl LockRecord {
    fn new(pid: u32) -> Self {
        let now = Utc::now();
        Self {
            pid,
            acquired_at: now,
            heartbeat_at: now,
        }
    }

    /// A record is stale when its holder is dead or its heartbeat has
    /// outlived the timeout.
    pub fn is_stale(&self, now: DateTime<Utc>, heartbeat_timeout: Duration) -> bool {
        if !is_process_alive(self.pid) {
            return true;
        }
        now - self.heartbeat_at > heartbeat_timeout
    }
}

#[derive(Debug, Clone)]
pub struct LockCoordinator {
    locks_dir: PathBuf,
    config: LockConfig,
}

impl LockCoordinator {
    pub fn new(locks_dir: PathBuf, config: LockConfig) -> Self {
        Self { locks_dir, config }
    }

    fn record_path(&self, resource: &str) -> PathBuf {
        self.locks_dir.join(format!("{resource}.json"))
    }

    fn guard_path(&self, resource: &str) -> PathBuf {
        self.locks_dir.join(format!("{resource}.guard"))
    }

    fn io_err(&self, resource: &str, source: std::io::Error) -> LockError {
        LockError::Io {
            resource: resource.to_string(),
            source,
        }
    }

    /// Acquire the lock for a resource, retrying with doubling backoff while
    /// a live holder keeps it.
    pub fn acquire(&self, resource: &str) -> Result<LockHandle, LockError> {
        fs::create_dir_all(&self.locks_dir).map_err(|e| self.io_err(resource, e))?;

        let pid = std::process::id();
        let heartbeat_timeout = Duration::seconds(self.config.heartbeat_timeout_secs as i64);
        let mut delay_ms = self.config.retry_initial_ms;
        let attempts = self.config.retry_attempts.max(1);
        let mut last_holder = 0;

        for attempt in 0..attempts {
            let guard = self.open_guard(resource)?;

            match self.read_record(resource) {
                Some(record) if !record.is_stale(Utc::now(), heartbeat_timeout) => {
                    last_holder = record.pid;
                    guard.unlock().map_err(|e| self.io_err(resource, e))?;
                    debug!(
                        resource,
                        holder = record.pid,
                        attempt,
                        "lock contended, backing off"
                    );
                    thread::sleep(std::time::Duration::from_millis(delay_ms));
                    delay_ms = delay_ms.saturating_mul(2);
                    continue;
                }
                Some(stale) => {
                    debug!(resource, holder = stale.pid, "reclaiming stale lock");
                }
                None => {}
            }

            self.write_record(resource, &LockRecord::new(pid))?;
            guard.unlock().map_err(|e| self.io_err(resource, e))?;

            return Ok(LockHandle {
                coordinator: self.clone(),
                resource: resource.to_string(),
                pid,
                released: false,
            });
        }

        Err(LockError::Exhausted {
            resource: resource.to_string(),
            holder: last_holder,
            attempts,
        })
    }

    /// Refresh the heartbeat on a held lock.
    pub fn heartbeat(&self, handle: &LockHandle) -> Result<(), LockError> {
        let resource = handle.resource.as_str();
        let guard = self.open_guard(resource)?;

        if let Some(mut record) = self.read_record(resource) {
            if record.pid == handle.pid {
                record.heartbeat_at = Utc::now();
                self.write_record(resource, &record)?;
            }
        }

        guard.unlock().map_err(|e| self.io_err(resource, e))
    }

    /// Remove dead-holder records. Returns the resources reclaimed.
    pub fn sweep_dead(&self) -> anyhow::Result<Vec<String>> {
        let mut reclaimed = Vec::new();
        if !self.locks_dir.exists() {
            return Ok(reclaimed);
        }

        for entry in fs::read_dir(&self.locks_dir).context("Failed to read locks directory")? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<LockRecord>(&content) else {
                // Unreadable lock records are disposable, unlike data records
                let _ = fs::remove_file(&path);
                continue;
            };
            if !is_process_alive(record.pid) {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                if let Some(stem) = path.file_stem() {
                    reclaimed.push(stem.to_string_lossy().to_string());
                }
            }
        }

        Ok(reclaimed)
    }

    fn open_guard(&self, resource: &str) -> Result<File, LockError> {
        let guard = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.guard_path(resource))
            .map_err(|e| self.io_err(resource, e))?;
        guard.lock_exclusive().map_err(|e| self.io_err(resource, e))?;
        Ok(guard)
    }

    fn read_record(&self, resource: &str) -> Option<LockRecord> {
        let content = fs::read_to_string(self.record_path(resource)).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                // A garbled lock record is treated as stale, not quarantined
                warn!(resource, error = %e, "discarding unparsable lock record");
                None
            }
        }
    }

    fn write_record(&self, resource: &str, record: &LockRecord) -> Result<(), LockError> {
        let content = serde_json::to_string_pretty(record)
            .expect("lock record serialization cannot fail");
        fs::write(self.record_path(resource), content).map_err(|e| self.io_err(resource, e))
    }

    fn release(&self, resource: &str, pid: u32) -> Result<(), LockError> {
        let guard = self.open_guard(resource)?;

        if let Some(record) = self.read_record(resource) {
            if record.pid == pid {
                fs::remove_file(self.record_path(resource))
                    .map_err(|e| self.io_err(resource, e))?;
            }
        }

        guard.unlock().map_err(|e| self.io_err(resource, e))
    }
}

/// A held lock. Released on drop; errors during drop are logged, not raised.
#[derive(Debug)]
pub struct LockHandle {
    coordinator: LockCoordinator,
    resource: String,
    pid: u32,
    released: bool,
}

impl LockHandle {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.coordinator.release(&self.resource, self.pid)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.coordinator.release(&self.resource, self.pid) {
                warn!(resource = %self.resource, error = %e, "failed to release lock on drop");
            }
        }
    }
}
