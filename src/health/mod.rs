//! Health gate: sequenced prerequisite checks with bounded auto-repair.
//!
//! The gate runs ahead of every stateful stage and is the only stage allowed
//! to halt the pipeline, which it does on prompt submission alone; the
//! bookkeeping hooks skip their stages on a failed gate instead. Each check
//! may attempt one repair before reporting; the gate passes iff no critical
//! or high failure remains afterwards. Info-level failures never block.

use crate::capability::CapabilityRegistry;
use crate::lock::LockCoordinator;
use crate::session::identity;
use crate::state::StateDir;
use colored::Colorize;
use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    High,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthFailure {
    pub check: String,
    pub severity: Severity,
    pub detail: String,
    pub remediation: String,
    /// Whether the bounded auto-repair resolved it.
    pub repaired: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub failures: Vec<HealthFailure>,
}

impl HealthReport {
    /// Pass iff no critical/high failure remains after repair.
    pub fn passed(&self) -> bool {
        !self.failures.iter().any(|f| {
            !f.repaired && matches!(f.severity, Severity::Critical | Severity::High)
        })
    }

    /// Remaining failures that actually gate the pipeline.
    pub fn blocking_failures(&self) -> Vec<&HealthFailure> {
        self.failures
            .iter()
            .filter(|f| !f.repaired && matches!(f.severity, Severity::Critical | Severity::High))
            .collect()
    }

    pub fn remediation_text(&self) -> String {
        let mut lines = vec![format!("{}", "Health gate failed:".red().bold())];
        for failure in self.blocking_failures() {
            lines.push(format!(
                "  {} [{}] {}: {}",
                "✗".red(),
                failure.severity,
                failure.check,
                failure.detail
            ));
            lines.push(format!("    → {}", failure.remediation));
        }
        lines.join("\n")
    }

    fn push(
        &mut self,
        check: &str,
        severity: Severity,
        detail: String,
        remediation: &str,
        repaired: bool,
    ) {
        self.failures.push(HealthFailure {
            check: check.to_string(),
            severity,
            detail,
            remediation: remediation.to_string(),
            repaired,
        });
    }
}

/// Run the ordered check list, attempting bounded repairs along the way.
pub fn check_and_repair(state: &StateDir, locks: &LockCoordinator) -> HealthReport {
    let mut report = HealthReport::default();

    check_state_root(state, &mut report);
    if !report.passed() {
        // Nothing below can run without a state root
        return report;
    }

    check_subdirs(state, &mut report);
    check_current_pointer(state, &mut report);
    check_dead_locks(locks, &mut report);
    check_registry(state, &mut report);

    report
}

fn check_state_root(state: &StateDir, report: &mut HealthReport) {
    if state.exists() && !state.root().is_dir() {
        report.push(
            "state_root",
            Severity::Critical,
            format!("{} exists but is not a directory", state.root().display()),
            "Move the file aside so the state directory can be created",
            false,
        );
        return;
    }

    if !state.exists() {
        match state.initialize() {
            Ok(()) => report.push(
                "state_root",
                Severity::Critical,
                "state directory was missing".to_string(),
                "Created automatically",
                true,
            ),
            Err(e) => report.push(
                "state_root",
                Severity::Critical,
                format!("cannot create state directory: {e}"),
                "Check permissions on the project root",
                false,
            ),
        }
    }
}

fn check_subdirs(state: &StateDir, report: &mut HealthReport) {
    let missing = state.missing_subdirs();
    if missing.is_empty() {
        return;
    }

    match state.initialize() {
        Ok(()) => report.push(
            "state_layout",
            Severity::High,
            format!("missing subdirectories: {}", missing.join(", ")),
            "Created automatically",
            true,
        ),
        Err(e) => report.push(
            "state_layout",
            Severity::High,
            format!("cannot create subdirectories: {e}"),
            "Check permissions on the state directory",
            false,
        ),
    }
}

fn check_current_pointer(state: &StateDir, report: &mut HealthReport) {
    let pointer = match identity::current_session_id(state) {
        Ok(pointer) => pointer,
        Err(e) => {
            report.push(
                "current_pointer",
                Severity::High,
                format!("cannot read current-session pointer: {e}"),
                "Remove .warden/sessions/current",
                false,
            );
            return;
        }
    };

    let Some(id) = pointer else {
        return;
    };

    match identity::load_session(state, &id) {
        // The walk is visited-set bounded, so a cyclic lineage is reported
        // rather than looping; the pipeline itself tolerates it
        Ok(Some(_)) => {
            if crate::chain::is_ancestor(state, &id, &id).unwrap_or(false) {
                report.push(
                    "session_lineage",
                    Severity::Info,
                    format!("session {id} appears in its own ancestor chain"),
                    "Inspect parent links under .warden/sessions/",
                    false,
                );
            }
        }
        // Target missing or quarantined: drop the pointer, the next run
        // starts a fresh session
        Ok(None) => {
            let repaired = fs::remove_file(state.sessions_dir().join("current")).is_ok();
            report.push(
                "current_pointer",
                Severity::High,
                format!("pointer names missing session {id}"),
                "Stale pointer removed; a new session will start",
                repaired,
            );
        }
        Err(e) => {
            report.push(
                "current_pointer",
                Severity::High,
                format!("cannot load session {id}: {e}"),
                "Inspect .warden/sessions/",
                false,
            );
        }
    }
}

fn check_dead_locks(locks: &LockCoordinator, report: &mut HealthReport) {
    match locks.sweep_dead() {
        Ok(reclaimed) if !reclaimed.is_empty() => report.push(
            "locks",
            Severity::Info,
            format!("reclaimed dead-holder locks: {}", reclaimed.join(", ")),
            "No action needed",
            true,
        ),
        Ok(_) => {}
        Err(e) => report.push(
            "locks",
            Severity::Info,
            format!("cannot sweep lock directory: {e}"),
            "Inspect .warden/locks/",
            false,
        ),
    }
}

fn check_registry(state: &StateDir, report: &mut HealthReport) {
    if let Err(e) = CapabilityRegistry::load(&state.registry_path()) {
        report.push(
            "registry",
            Severity::Info,
            format!("capabilities.yaml unreadable: {e}"),
            "Falling back to the built-in catalogue",
            false,
        );
    }
}
