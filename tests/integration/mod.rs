//! End-to-end tests for the hook pipeline.
//!
//! Each test drives the pipeline the way the host tool would: events in,
//! decisions out, with all state under a throwaway project directory.

use serial_test::serial;
use std::fs;
use tempfile::TempDir;
use warden::failures::{CorrectionRule, FailureKb, Operation};
use warden::hooks::{Pipeline, PostToolUseEvent, PreToolUseEvent, PromptSubmitEvent, SessionStopEvent};
use warden::lock::{LockCoordinator, CHAIN_RESOURCE};
use warden::session::identity;
use warden::state::StateDir;

fn prompt(text: &str) -> PromptSubmitEvent {
    PromptSubmitEvent {
        prompt: text.to_string(),
        cwd: None,
        file_count: None,
    }
}

fn failed_tool(command: &str) -> PostToolUseEvent {
    PostToolUseEvent {
        tool_name: "Bash".to_string(),
        tool_input: serde_json::json!({ "command": command }),
        success: false,
        error: Some("exit status 1".to_string()),
        correction_applied: false,
    }
}

fn current_session(pipeline: &Pipeline) -> warden::session::Session {
    let id = identity::current_session_id(pipeline.state())
        .unwrap()
        .expect("a current session pointer");
    identity::load_session(pipeline.state(), &id)
        .unwrap()
        .expect("the pointed-at session record")
}

#[test]
fn test_cold_start_creates_state_and_session() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(temp.path());

    let decision = pipeline.on_prompt_submit(&prompt("rename the helper function"));
    assert!(!decision.block);
    assert_eq!(decision.exit_code(), 0);

    // The state tree was repaired into existence by the health gate
    let state = StateDir::new(temp.path());
    assert!(state.exists());
    assert!(state.missing_subdirs().is_empty());

    let session = current_session(&pipeline);
    assert!(session.is_active());
    assert_eq!(session.requests.len(), 1);
    assert!(session.parent_id.is_none());

    // A second prompt lands in the same session
    pipeline.on_prompt_submit(&prompt("now rename its test too"));
    let session = current_session(&pipeline);
    assert_eq!(session.requests.len(), 2);
}

#[test]
fn test_sessions_sharing_tags_become_related() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(temp.path());

    pipeline.on_prompt_submit(&prompt("deploy the docker image to production"));
    let first = current_session(&pipeline);
    pipeline.on_session_stop(&SessionStopEvent { reason: None });

    pipeline.on_prompt_submit(&prompt("the docker deployment is failing again"));
    let second = current_session(&pipeline);

    assert_ne!(first.id, second.id);
    assert_eq!(second.parent_id.as_deref(), Some(first.id.as_str()));

    // Related edges are symmetric or absent, never one-sided
    let first_reloaded = identity::load_session(pipeline.state(), &first.id)
        .unwrap()
        .unwrap();
    assert!(second.related_ids.contains(&first.id));
    assert!(first_reloaded.related_ids.contains(&second.id));
}

#[test]
fn test_colloquial_ui_prompt_gets_a_ui_capability() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(temp.path());

    let decision = pipeline.on_prompt_submit(&prompt("admin panel not showing, layout broken"));
    assert!(!decision.block);

    let capability = decision
        .annotations
        .get("capability")
        .and_then(|v| v.as_str())
        .expect("a capability annotation");
    assert!(
        capability == "css-styling" || capability == "ui-specialist",
        "expected a UI capability, got {capability}"
    );
}

#[test]
fn test_alternating_failures_force_mandatory_planning() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(temp.path());

    pipeline.on_prompt_submit(&prompt("fix the failing build"));

    // X, Y, X: the same two errors ping-ponging
    pipeline.on_post_tool_use(&failed_tool("cargo build --release"));
    pipeline.on_post_tool_use(&failed_tool("npm run lint"));
    pipeline.on_post_tool_use(&failed_tool("cargo build --release"));

    let session = current_session(&pipeline);
    assert_eq!(session.recent_errors.len(), 3);

    let decision = pipeline.on_prompt_submit(&prompt("try the build fix once more"));
    assert_eq!(
        decision.annotations["mode"],
        serde_json::json!("plan_mandatory")
    );
    assert!(decision
        .hints
        .iter()
        .any(|h| h.contains("planning is mandatory")));
}

#[test]
fn test_repeated_failures_do_not_loop_when_identical() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(temp.path());

    pipeline.on_prompt_submit(&prompt("fix the failing build"));
    for _ in 0..3 {
        pipeline.on_post_tool_use(&failed_tool("cargo build --release"));
    }

    let decision = pipeline.on_prompt_submit(&prompt("retry the build with verbose output"));
    assert_ne!(
        decision.annotations["mode"],
        serde_json::json!("plan_mandatory")
    );
}

#[test]
fn test_unrepairable_health_failure_blocks_only_prompt_submission() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(".warden"), "not a directory").unwrap();

    let pipeline = Pipeline::new(temp.path());
    let decision = pipeline.on_prompt_submit(&prompt("deploy the docker image"));

    assert!(decision.block);
    assert_eq!(decision.exit_code(), 2);
    // Blocked before any later stage produced output
    assert!(decision.annotations.is_empty());

    // The bookkeeping hooks skip their stages but still allow
    let pre = pipeline.on_pre_tool_use(&PreToolUseEvent {
        tool_name: "Bash".to_string(),
        tool_input: serde_json::json!({ "command": "ls" }),
    });
    assert!(!pre.block);

    let post = pipeline.on_post_tool_use(&failed_tool("ls"));
    assert!(!post.block);

    let stop = pipeline.on_session_stop(&SessionStopEvent { reason: None });
    assert!(!stop.block);
    assert_eq!(stop.exit_code(), 0);
}

#[test]
fn test_failure_pattern_reaches_auto_correction() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(temp.path());
    pipeline.on_prompt_submit(&prompt("fix the test runner"));

    // The numeric attempt counter normalizes away, so every run maps to
    // the same pattern
    for attempt in 1..=5 {
        pipeline.on_post_tool_use(&failed_tool(&format!("pytest tests/ -x --attempt {attempt}")));
    }

    let state = StateDir::new(temp.path());
    let locks = LockCoordinator::new(state.locks_dir(), pipeline.config().lock.clone());
    let kb = FailureKb::new(&state, &locks, pipeline.config().failures.clone());

    let op = Operation {
        kind: "Bash",
        detail: "pytest tests/ -x --attempt 5",
    };
    let sig = warden::failures::signature(&op);

    let patterns = kb.load_patterns().unwrap();
    let pattern = patterns.get(&sig).expect("a learned pattern");
    assert_eq!(pattern.occurrences, 5);
    assert!(pattern.confidence >= 0.75);

    kb.attach_correction(
        &sig,
        CorrectionRule {
            find: "pytest".to_string(),
            replace_with: "python -m pytest".to_string(),
        },
    )
    .unwrap();

    let decision = pipeline.on_pre_tool_use(&PreToolUseEvent {
        tool_name: "Bash".to_string(),
        tool_input: serde_json::json!({ "command": "pytest tests/ -x --attempt 5" }),
    });
    assert_eq!(
        decision.annotations["corrected_detail"],
        serde_json::json!("python -m pytest tests/ -x --attempt 5")
    );
    assert_eq!(decision.annotations["auto_corrected"], serde_json::json!(true));
}

#[test]
fn test_low_confidence_pattern_only_warns() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(temp.path());
    pipeline.on_prompt_submit(&prompt("investigate the flaky deploy"));

    pipeline.on_post_tool_use(&failed_tool("kubectl apply -f deploy.yml"));

    let decision = pipeline.on_pre_tool_use(&PreToolUseEvent {
        tool_name: "Bash".to_string(),
        tool_input: serde_json::json!({ "command": "kubectl apply -f deploy.yml" }),
    });
    assert!(!decision.block);
    assert!(!decision.annotations.contains_key("corrected_detail"));
    assert!(decision.hints.iter().any(|h| h.contains("failed 1 time")));
}

#[test]
fn test_session_stop_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(temp.path());

    pipeline.on_prompt_submit(&prompt("document the config format"));
    let first = pipeline.on_session_stop(&SessionStopEvent { reason: None });
    let second = pipeline.on_session_stop(&SessionStopEvent { reason: None });

    assert_eq!(
        first.annotations.get("session_summary"),
        second.annotations.get("session_summary")
    );
}

#[test]
#[serial]
fn test_contended_chain_lock_degrades_to_reconcile_flag() {
    let temp = TempDir::new().unwrap();
    let state = StateDir::new(temp.path());
    state.initialize().unwrap();
    fs::write(
        state.config_path(),
        "[lock]\nretry_attempts = 1\nretry_initial_ms = 1\nheartbeat_timeout_secs = 30\n",
    )
    .unwrap();

    let pipeline = Pipeline::new(temp.path());
    let locks = LockCoordinator::new(state.locks_dir(), pipeline.config().lock.clone());
    let holder = locks.acquire(CHAIN_RESOURCE).unwrap();

    let decision = pipeline.on_prompt_submit(&prompt("update the readme"));
    assert!(!decision.block);
    assert_eq!(decision.annotations.get("reconcile"), Some(&serde_json::json!(true)));

    let session = current_session(&pipeline);
    assert!(session.reconcile);

    holder.release().unwrap();
}

#[test]
fn test_corrupt_session_record_is_quarantined_not_fatal() {
    let temp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(temp.path());

    pipeline.on_prompt_submit(&prompt("add pagination to the list view"));
    let id = identity::current_session_id(pipeline.state()).unwrap().unwrap();

    // Corrupt the record on disk
    let record_path = pipeline.state().sessions_dir().join(format!("{id}.json"));
    fs::write(&record_path, "{ not json").unwrap();

    // The next prompt still goes through, on a fresh session
    let decision = pipeline.on_prompt_submit(&prompt("add sorting as well"));
    assert!(!decision.block);

    let new_id = identity::current_session_id(pipeline.state()).unwrap().unwrap();
    assert_ne!(new_id, id);

    // The corrupt record was moved aside, not deleted
    let quarantined = fs::read_dir(pipeline.state().quarantine_dir())
        .unwrap()
        .count();
    assert!(quarantined >= 1);
}
