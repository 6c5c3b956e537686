//! Hook contract: the boundary between the host tool and the pipeline.
//!
//! The host invokes `warden hook <event>` with the event payload as JSON on
//! stdin and reads the decision as JSON on stdout. Exit code zero allows the
//! action, non-zero blocks it.

pub mod dispatcher;

pub use dispatcher::Pipeline;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptSubmitEvent {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// File count hint from the host, when it knows the edit scope.
    #[serde(default)]
    pub file_count: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreToolUseEvent {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostToolUseEvent {
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Whether the host executed a KB-corrected form of the operation.
    #[serde(default)]
    pub correction_applied: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionStopEvent {
    #[serde(default)]
    pub reason: Option<String>,
}

/// What the host does with the action: zero exit = allow, non-zero = block.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HookDecision {
    pub block: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub annotations: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub hints: Vec<String>,
}

impl HookDecision {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn block(message: String) -> Self {
        Self {
            block: true,
            message: Some(message),
            ..Self::default()
        }
    }

    pub fn annotate(&mut self, key: &str, value: serde_json::Value) {
        self.annotations.insert(key.to_string(), value);
    }

    /// The process exit code the host contract expects.
    pub fn exit_code(&self) -> i32 {
        if self.block {
            2
        } else {
            0
        }
    }
}

/// Extract the human-meaningful payload out of a tool input value.
pub fn tool_detail(tool_input: &serde_json::Value) -> String {
    for key in ["command", "file_path", "path", "url"] {
        if let Some(value) = tool_input.get(key).and_then(|v| v.as_str()) {
            return value.to_string();
        }
    }
    tool_input.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_the_contract() {
        assert_eq!(HookDecision::allow().exit_code(), 0);
        assert_eq!(HookDecision::block("no".to_string()).exit_code(), 2);
    }

    #[test]
    fn test_tool_detail_prefers_command() {
        let input = serde_json::json!({"command": "ls -la", "timeout": 5});
        assert_eq!(tool_detail(&input), "ls -la");
    }

    #[test]
    fn test_tool_detail_falls_back_to_raw_json() {
        let input = serde_json::json!({"pattern": "TODO"});
        assert_eq!(tool_detail(&input), r#"{"pattern":"TODO"}"#);
    }

    #[test]
    fn test_post_tool_event_defaults_to_success() {
        let event: PostToolUseEvent = serde_json::from_str(r#"{"tool_name":"Bash"}"#).unwrap();
        assert!(event.success);
        assert!(!event.correction_applied);
    }

    #[test]
    fn test_decision_serializes_compactly() {
        let decision = HookDecision::allow();
        let json = serde_json::to_string(&decision).unwrap();
        assert_eq!(json, r#"{"block":false}"#);
    }
}
