//! Per-task execution results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Success => f.write_str("success"),
            TaskStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Text substituted for a failed task's output
pub fn unavailable_placeholder(task_id: &str) -> String {
    format!("[error: {} data unavailable]", task_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    /// String for generation tasks, tool-defined JSON for tool tasks
    pub output: Value,
    /// Model that produced a generation output
    pub model: Option<String>,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Generation prompt after reference substitution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, output: Value, model: Option<String>, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Success,
            output,
            model,
            duration_ms,
            error: None,
            prompt: None,
        }
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            output: Value::Null,
            model: None,
            duration_ms,
            error: Some(error.into()),
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Output as text for downstream prompts
    pub fn rendered(&self) -> String {
        if !self.is_success() {
            return unavailable_placeholder(&self.task_id);
        }
        match &self.output {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rendered_output() {
        assert_eq!(TaskResult::success("t1", json!("text"), None, 1).rendered(), "text");
        assert_eq!(
            TaskResult::success("t1", json!({"status": "queued"}), None, 1).rendered(),
            r#"{"status":"queued"}"#
        );
        assert_eq!(
            TaskResult::failure("t7", "boom", 1).rendered(),
            "[error: t7 data unavailable]"
        );
    }
}
