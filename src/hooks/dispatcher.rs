//! Pipeline dispatcher: runs the stages for each hook event in fixed order.
//!
//! Only prompt submission can be blocked, and only by the health gate. The
//! tool hooks and the stop hook are bookkeeping: a failed gate there skips
//! their stages and still allows. Every non-gate stage degrades on internal
//! error: log, substitute a neutral default, continue. A broken bookkeeping
//! stage must never cost the user their prompt.

use super::{
    tool_detail, HookDecision, PostToolUseEvent, PreToolUseEvent, PromptSubmitEvent,
    SessionStopEvent,
};
use crate::capability::{enrich, CapabilityMatcher, CapabilityRegistry, MatchReport};
use crate::chain::ChainStore;
use crate::config::WardenConfig;
use crate::context::{self, BudgetReport, BudgetTier};
use crate::decision::{Decision, DecisionContext, DecisionEngine, ExecutionMode};
use crate::failures::{signature, FailureKb, Operation, Outcome, Precheck};
use crate::health;
use crate::lock::{LockCoordinator, LockError, CHAIN_RESOURCE};
use crate::session::identity;
use crate::session::{RequestRecord, Session};
use crate::state::StateDir;
use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct Pipeline {
    state: StateDir,
    locks: LockCoordinator,
    config: WardenConfig,
    registry: CapabilityRegistry,
}

impl Pipeline {
    /// Build a pipeline rooted at a project directory. Config and registry
    /// load errors degrade to defaults; the health gate reports them.
    pub fn new<P: AsRef<Path>>(project_root: P) -> Self {
        let state = StateDir::new(project_root);

        let config = match WardenConfig::load_or_default(&state.config_path()) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config unreadable, using defaults");
                WardenConfig::default()
            }
        };

        let registry = match CapabilityRegistry::load_or_builtin(&state.registry_path()) {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "registry unreadable, using built-in catalogue");
                CapabilityRegistry::builtin()
            }
        };

        let locks = LockCoordinator::new(state.locks_dir(), config.lock.clone());

        Self {
            state,
            locks,
            config,
            registry,
        }
    }

    pub fn state(&self) -> &StateDir {
        &self.state
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Run the health gate. `Some` carries the remediation text.
    fn gate(&self) -> Option<String> {
        let started = Instant::now();
        let report = health::check_and_repair(&self.state, &self.locks);
        self.check_elapsed("health_gate", started, self.config.pipeline.health_timeout_secs);

        if report.passed() {
            None
        } else {
            Some(report.remediation_text())
        }
    }

    /// Run one degradable stage: on error, log and substitute the fallback.
    fn stage<T>(&self, name: &'static str, fallback: T, f: impl FnOnce() -> Result<T>) -> T {
        let started = Instant::now();
        let result = f();
        self.check_elapsed(name, started, self.config.pipeline.stage_timeout_secs);

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(stage = name, error = %e, "stage degraded to fallback");
                fallback
            }
        }
    }

    fn check_elapsed(&self, name: &str, started: Instant, budget_secs: u64) {
        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(budget_secs) {
            warn!(stage = name, ?elapsed, budget_secs, "stage exceeded its time budget");
        }
    }

    pub fn on_prompt_submit(&self, event: &PromptSubmitEvent) -> HookDecision {
        if let Some(remediation) = self.gate() {
            return HookDecision::block(remediation);
        }

        let budget = self.stage("context_budget", neutral_budget(), || self.estimate_budget());

        let session = self.stage("session_identity", None, || {
            identity::ensure_active(&self.state, &self.locks).map(Some)
        });

        let decision_ctx = DecisionContext {
            recent_error_signatures: session
                .as_ref()
                .map(|s| s.recent_errors.clone())
                .unwrap_or_default(),
            file_count_hint: event.file_count,
        };
        let decision = self.stage("task_decision", Decision::fallback(&self.config.decision), || {
            Ok(DecisionEngine::new(self.config.decision.clone()).score(&event.prompt, &decision_ctx))
        });

        let matches = CapabilityMatcher::new(self.registry.clone())
            .match_prompt(&event.prompt, decision.complexity);

        let precheck = self.stage("failure_precheck", Precheck::default(), || {
            let kb = FailureKb::new(&self.state, &self.locks, self.config.failures.clone());
            kb.check_before(&Operation {
                kind: "prompt",
                detail: &event.prompt,
            })
        });

        if let Some(session) = &session {
            self.stage("chain_update", (), || {
                self.record_request(session, event, &decision, &matches)
            });
        }

        self.assemble(session.as_ref(), &budget, &decision, &matches, &precheck)
    }

    /// Tool-usage hints plus knowledge-base consultation; no gate, reads
    /// only, never blocks.
    pub fn on_pre_tool_use(&self, event: &PreToolUseEvent) -> HookDecision {
        let detail = tool_detail(&event.tool_input);
        let mut decision = HookDecision::allow();

        let precheck = self.stage("failure_precheck", Precheck::default(), || {
            let kb = FailureKb::new(&self.state, &self.locks, self.config.failures.clone());
            kb.check_before(&Operation {
                kind: &event.tool_name,
                detail: &detail,
            })
        });

        if let Some(corrected) = &precheck.corrected_detail {
            decision.annotate("corrected_detail", serde_json::json!(corrected));
            decision.annotate("auto_corrected", serde_json::json!(true));
            decision
                .hints
                .push(format!("known failure pattern, corrected to: {corrected}"));
        } else if let Some(warning) = &precheck.warning {
            decision.hints.push(warning.clone());
        }

        decision.hints.extend(tool_hints(&event.tool_name, &detail));
        decision
    }

    /// Progress bookkeeping only. A failed gate skips the learning stages;
    /// the tool already ran, so this hook never blocks.
    pub fn on_post_tool_use(&self, event: &PostToolUseEvent) -> HookDecision {
        if let Some(remediation) = self.gate() {
            warn!(%remediation, "health gate failed, skipping post-tool bookkeeping");
            return HookDecision::allow();
        }

        let detail = tool_detail(&event.tool_input);
        let op = Operation {
            kind: &event.tool_name,
            detail: &detail,
        };

        self.stage("failure_learn", (), || {
            let kb = FailureKb::new(&self.state, &self.locks, self.config.failures.clone());
            kb.learn(
                &op,
                &Outcome {
                    success: event.success,
                    error: event.error.clone(),
                    correction_was_applied: event.correction_applied,
                },
            )
        });

        let mut decision = HookDecision::allow();
        if !event.success {
            let sig = signature(&op);
            self.stage("session_error_log", (), || self.record_error_signature(&sig));
            decision.annotate("failure_signature", serde_json::json!(sig));
        }
        decision
    }

    /// Finalization bookkeeping; like the post-tool hook, never blocks.
    pub fn on_session_stop(&self, event: &SessionStopEvent) -> HookDecision {
        if let Some(remediation) = self.gate() {
            warn!(%remediation, "health gate failed, skipping session finalization");
            return HookDecision::allow();
        }
        debug!(reason = ?event.reason, "session stop");

        let mut decision = HookDecision::allow();

        let summary = self.stage("chain_finalize", None, || {
            let Some(id) = identity::current_session_id(&self.state)? else {
                return Ok(None);
            };
            let chain = ChainStore::new(&self.state, &self.locks, self.config.chain.clone());
            chain.finalize(&id).map(Some)
        });
        if let Some(summary) = summary {
            decision.annotate("session_summary", serde_json::json!(summary));
        }

        let decayed = self.stage("failure_decay", 0, || {
            let kb = FailureKb::new(&self.state, &self.locks, self.config.failures.clone());
            kb.decay_stale(Utc::now())
        });
        if decayed > 0 {
            decision.annotate("stale_patterns_decayed", serde_json::json!(decayed));
        }

        decision
    }

    /// Estimate the context budget from the current session's footprint.
    /// With no session on record the budget reads as empty.
    fn estimate_budget(&self) -> Result<BudgetReport> {
        let Some(id) = identity::current_session_id(&self.state)? else {
            return Ok(neutral_budget());
        };
        let Some(session) = identity::load_session(&self.state, &id)? else {
            return Ok(neutral_budget());
        };

        let bytes = serde_json::to_vec(&session).map(|v| v.len() as u64).unwrap_or(0);
        Ok(context::estimate(
            session.requests.len() as u32,
            bytes,
            &self.config.context,
        ))
    }

    fn record_request(
        &self,
        session: &Session,
        event: &PromptSubmitEvent,
        decision: &Decision,
        matches: &MatchReport,
    ) -> Result<()> {
        let record = RequestRecord {
            timestamp: Utc::now(),
            prompt: event.prompt.clone(),
            task_type: decision.task_type,
            tags: enrich(&event.prompt).keywords,
            complexity: decision.complexity,
            tier: decision.tier,
            capability: matches.best().map(String::from),
            working_dir: event.cwd.clone(),
        };

        let chain = ChainStore::new(&self.state, &self.locks, self.config.chain.clone());
        chain.accumulate(&session.id, record)?;
        chain.auto_tag(&session.id)?;
        let related = chain.auto_relate(&session.id)?;
        if !related.is_empty() {
            debug!(session_id = %session.id, ?related, "linked related sessions");
        }
        Ok(())
    }

    /// Append a failure signature to the active session's rolling window.
    fn record_error_signature(&self, sig: &str) -> Result<()> {
        let Some(id) = identity::current_session_id(&self.state)? else {
            return Ok(());
        };

        let handle = match self.locks.acquire(CHAIN_RESOURCE) {
            Ok(handle) => Some(handle),
            Err(LockError::Exhausted { holder, .. }) => {
                warn!(holder, "chain lock exhausted, recording error unsynchronized");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let Some(mut session) = identity::load_session(&self.state, &id)? else {
            return Ok(());
        };
        session.push_error_signature(sig.to_string(), self.config.decision.loop_window);
        session.reconcile |= handle.is_none();
        identity::save_session(&self.state, &session)
    }

    fn assemble(
        &self,
        session: Option<&Session>,
        budget: &BudgetReport,
        decision: &Decision,
        matches: &MatchReport,
        precheck: &Precheck,
    ) -> HookDecision {
        let mut out = HookDecision::allow();

        if let Some(session) = session {
            out.annotate("session_id", serde_json::json!(session.id));
            if session.reconcile {
                out.annotate("reconcile", serde_json::json!(true));
            }
        }

        out.annotate("context_tier", serde_json::json!(budget.tier));
        out.annotate(
            "context_usage",
            serde_json::json!((budget.usage_fraction * 100.0).round() / 100.0),
        );
        if budget.wants_reduced_detail() {
            out.hints
                .push(format!("context budget at {} tier, prefer reduced detail", budget.tier));
        }
        if budget.tier == BudgetTier::Critical {
            out.annotate("save_and_compact", serde_json::json!(true));
        }

        out.annotate("complexity", serde_json::json!(decision.complexity));
        out.annotate("mode", serde_json::json!(decision.mode));
        out.annotate("tier", serde_json::json!(decision.tier));
        out.annotate("task_type", serde_json::json!(decision.task_type));
        if !decision.factors.is_empty() {
            out.annotate("factors", serde_json::json!(decision.factors));
        }
        if decision.mode == ExecutionMode::PlanMandatory {
            out.hints.push("planning is mandatory before execution".to_string());
        }

        if let Some(best) = matches.best() {
            out.annotate("capability", serde_json::json!(best));
        }
        if !matches.skills.is_empty() {
            let names: Vec<&str> = matches.skills.iter().map(|m| m.name.as_str()).collect();
            out.annotate("skills", serde_json::json!(names));
        }
        if !matches.agents.is_empty() {
            let names: Vec<&str> = matches.agents.iter().map(|m| m.name.as_str()).collect();
            out.annotate("agents", serde_json::json!(names));
        }

        if let Some(warning) = &precheck.warning {
            out.hints.push(warning.clone());
        }

        out
    }
}

fn neutral_budget() -> BudgetReport {
    BudgetReport {
        usage_fraction: 0.0,
        tier: BudgetTier::Normal,
    }
}

/// Tool-specific usage hints, independent of the knowledge base.
fn tool_hints(tool_name: &str, detail: &str) -> Vec<String> {
    let mut hints = Vec::new();
    if tool_name == "Bash" {
        if detail.starts_with("grep ") || detail.contains(" grep ") {
            hints.push("prefer rg over grep for speed and .gitignore awareness".to_string());
        }
        if detail.starts_with("find ") || detail.contains(" find ") {
            hints.push("prefer fd over find for speed and .gitignore awareness".to_string());
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn prompt_event(prompt: &str) -> PromptSubmitEvent {
        PromptSubmitEvent {
            prompt: prompt.to_string(),
            cwd: None,
            file_count: None,
        }
    }

    #[test]
    fn test_prompt_submit_creates_session_and_annotates() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(temp.path());

        let decision = pipeline.on_prompt_submit(&prompt_event("fix the css styling on the page"));
        assert!(!decision.block);
        assert!(decision.annotations.contains_key("session_id"));
        assert!(decision.annotations.contains_key("complexity"));
        assert_eq!(decision.annotations["context_tier"], serde_json::json!("normal"));

        let id = identity::current_session_id(pipeline.state()).unwrap().unwrap();
        let session = identity::load_session(pipeline.state(), &id).unwrap().unwrap();
        assert_eq!(session.requests.len(), 1);
        assert!(session.is_active());
    }

    #[test]
    fn test_unrepairable_health_failure_blocks_before_any_state_change() {
        let temp = TempDir::new().unwrap();
        // A file squatting on the state root cannot be auto-repaired
        fs::write(temp.path().join(".warden"), "squatter").unwrap();

        let pipeline = Pipeline::new(temp.path());
        let decision = pipeline.on_prompt_submit(&prompt_event("deploy the docker image"));

        assert!(decision.block);
        assert_eq!(decision.exit_code(), 2);
        assert!(decision.annotations.is_empty());
        assert!(decision.message.unwrap().contains("state_root"));
    }

    #[test]
    fn test_post_tool_use_allows_despite_health_failure() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".warden"), "squatter").unwrap();

        let pipeline = Pipeline::new(temp.path());
        let event = PostToolUseEvent {
            tool_name: "Bash".to_string(),
            tool_input: serde_json::json!({"command": "cargo test"}),
            success: false,
            error: Some("exit status 1".to_string()),
            correction_applied: false,
        };
        let decision = pipeline.on_post_tool_use(&event);
        assert!(!decision.block);
        assert_eq!(decision.exit_code(), 0);
    }

    #[test]
    fn test_session_stop_allows_despite_health_failure() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".warden"), "squatter").unwrap();

        let pipeline = Pipeline::new(temp.path());
        let decision = pipeline.on_session_stop(&SessionStopEvent { reason: None });
        assert!(!decision.block);
        assert_eq!(decision.exit_code(), 0);
    }

    #[test]
    fn test_post_tool_failure_feeds_loop_detection() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(temp.path());
        pipeline.on_prompt_submit(&prompt_event("fix the test"));

        let event = PostToolUseEvent {
            tool_name: "Bash".to_string(),
            tool_input: serde_json::json!({"command": "cargo test"}),
            success: false,
            error: Some("assertion failed".to_string()),
            correction_applied: false,
        };
        let decision = pipeline.on_post_tool_use(&event);
        assert!(!decision.block);
        assert!(decision.annotations.contains_key("failure_signature"));

        let id = identity::current_session_id(pipeline.state()).unwrap().unwrap();
        let session = identity::load_session(pipeline.state(), &id).unwrap().unwrap();
        assert_eq!(session.recent_errors.len(), 1);
    }

    #[test]
    fn test_pre_tool_use_suggests_modern_tools() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(temp.path());

        let event = PreToolUseEvent {
            tool_name: "Bash".to_string(),
            tool_input: serde_json::json!({"command": "grep -r TODO src/"}),
        };
        let decision = pipeline.on_pre_tool_use(&event);
        assert!(!decision.block);
        assert!(decision.hints.iter().any(|h| h.contains("rg")));
    }

    #[test]
    fn test_session_stop_finalizes_and_next_prompt_starts_successor() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(temp.path());

        pipeline.on_prompt_submit(&prompt_event("implement pagination for the list"));
        let first_id = identity::current_session_id(pipeline.state()).unwrap().unwrap();

        let stop = pipeline.on_session_stop(&SessionStopEvent { reason: None });
        assert!(!stop.block);
        assert!(stop.annotations.contains_key("session_summary"));

        let closed = identity::load_session(pipeline.state(), &first_id).unwrap().unwrap();
        assert!(!closed.is_active());

        pipeline.on_prompt_submit(&prompt_event("now add tests for it"));
        let second_id = identity::current_session_id(pipeline.state()).unwrap().unwrap();
        assert_ne!(second_id, first_id);

        let successor = identity::load_session(pipeline.state(), &second_id).unwrap().unwrap();
        assert_eq!(successor.parent_id.as_deref(), Some(first_id.as_str()));
    }

    #[test]
    fn test_stage_degrades_to_fallback_on_error() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::new(temp.path());
        let value = pipeline.stage("broken", 42, || anyhow::bail!("boom"));
        assert_eq!(value, 42);
    }
}
