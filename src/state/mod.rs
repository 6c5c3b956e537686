//! State directory layout and persistence primitives.
//!
//! All durable pipeline state lives under `.warden/` in the project root:
//!
//! - `sessions/` - one JSON record per session, plus the `current` pointer
//! - `chain/` - the tag inverted index
//! - `failures/` - the failure pattern store
//! - `locks/` - per-resource lock records and guard files
//! - `quarantine/` - unparsable records, moved aside rather than deleted
//! - `logs/` - diagnostic output from degraded stages
//!
//! Records that fail to parse are quarantined and treated as absent; later
//! events rebuild whatever is needed.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const SUBDIRS: [&str; 6] = [
    "sessions",
    "chain",
    "failures",
    "locks",
    "quarantine",
    "logs",
];

#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new<P: AsRef<Path>>(project_root: P) -> Self {
        Self {
            root: project_root.as_ref().join(".warden"),
        }
    }

    /// Create the state root and all required subdirectories.
    ///
    /// Idempotent: existing directories are left alone.
    pub fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create state root: {}", self.root.display()))?;

        for subdir in &SUBDIRS {
            let path = self.root.join(subdir);
            if !path.exists() {
                fs::create_dir(&path)
                    .with_context(|| format!("Failed to create {subdir} directory"))?;
            }
        }

        Ok(())
    }

    /// Missing subdirectories that `initialize` would create.
    pub fn missing_subdirs(&self) -> Vec<&'static str> {
        SUBDIRS
            .iter()
            .filter(|d| !self.root.join(d).exists())
            .copied()
            .collect()
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn chain_dir(&self) -> PathBuf {
        self.root.join("chain")
    }

    pub fn failures_dir(&self) -> PathBuf {
        self.root.join("failures")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("capabilities.yaml")
    }

    /// Read a JSON record, treating a missing file as absent and an
    /// unparsable file as corrupt.
    ///
    /// # Returns
    /// * `Ok(Some(T))` - Record read and parsed
    /// * `Ok(None)` - File doesn't exist, or was corrupt and got quarantined
    /// * `Err(_)` - IO failure other than not-found
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "quarantining unparsable record");
                self.quarantine(path)?;
                Ok(None)
            }
        }
    }

    /// Write a JSON record atomically (temp file + rename in the same dir).
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let content =
            serde_json::to_string_pretty(value).context("Failed to serialize record")?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move record into place: {}", path.display()))?;

        Ok(())
    }

    /// Move a corrupt record into `quarantine/`, never deleting it.
    ///
    /// The quarantined name carries a timestamp so repeated corruption of the
    /// same record never overwrites earlier evidence.
    pub fn quarantine(&self, path: &Path) -> Result<PathBuf> {
        let quarantine_dir = self.quarantine_dir();
        fs::create_dir_all(&quarantine_dir).context("Failed to create quarantine directory")?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "record".to_string());
        let dest = quarantine_dir.join(format!("{}-{name}", Utc::now().format("%Y%m%d%H%M%S%f")));

        fs::rename(path, &dest)
            .with_context(|| format!("Failed to quarantine {}", path.display()))?;

        Ok(dest)
    }
}
