//! Orchestration plan types.
//!
//! A plan is a DAG of tasks referencing each other by id. Plans are built
//! per request, consumed once by the executor and never persisted.

use crate::governance::ModelRole;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Intent tag of a plain conversational turn
pub const GENERAL_INTENT: &str = "general";

/// Instruction carried by the deterministic fallback task
pub const FALLBACK_INSTRUCTION: &str = "respond helpfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Generation,
    Tool,
}

/// One node of the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique within the plan
    pub id: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Role for generation tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialist: Option<ModelRole>,

    /// Registered tool name for tool tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Tool parameters; string values may carry `{taskId.output}` references
    #[serde(default)]
    pub params: Value,

    /// Prompt for generation tasks; may carry `{taskId.output}` references
    #[serde(default)]
    pub prompt: String,

    /// System-side instruction for generation tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,

    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Task {
    pub fn generation(id: impl Into<String>, role: ModelRole, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: TaskType::Generation,
            specialist: Some(role),
            tool_name: None,
            params: Value::Object(Default::default()),
            prompt: prompt.into(),
            instruction: None,
            dependencies: Vec::new(),
        }
    }

    pub fn tool(id: impl Into<String>, tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            task_type: TaskType::Tool,
            specialist: None,
            tool_name: Some(tool_name.into()),
            params,
            prompt: String::new(),
            instruction: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_generation(&self) -> bool {
        self.task_type == TaskType::Generation
    }

    /// Role used to run a generation task
    pub fn role(&self) -> ModelRole {
        self.specialist.unwrap_or(ModelRole::Logic)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Model that produced the plan
    pub orchestrator_model: Option<String>,
    pub reasoning: Option<String>,
    /// True when this is the deterministic fallback plan
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationPlan {
    pub intent: String,

    /// `None` means "use the original message"
    pub rewritten_query: Option<String>,

    pub is_follow_up: bool,

    /// The builder refused this intent; the caller should use its legacy path
    pub legacy_fallback: bool,

    pub tasks: Vec<Task>,

    pub metadata: PlanMetadata,
}

impl OrchestrationPlan {
    /// Single `logic` generation task answering the message directly
    pub fn fallback(message: &str) -> Self {
        Self {
            intent: GENERAL_INTENT.to_string(),
            rewritten_query: None,
            is_follow_up: false,
            legacy_fallback: false,
            tasks: vec![Task::generation("t1", ModelRole::Logic, message).with_instruction(FALLBACK_INSTRUCTION)],
            metadata: PlanMetadata {
                fallback: true,
                ..Default::default()
            },
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.metadata.fallback
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Query the rest of the pipeline should use
    pub fn effective_query<'a>(&'a self, message: &'a str) -> &'a str {
        match self.rewritten_query.as_deref() {
            Some(q) if !q.trim().is_empty() => q,
            _ => message,
        }
    }

    /// The generation task whose output becomes the reply
    ///
    /// The last generation task in plan order that nothing depends on, else
    /// the last generation task.
    pub fn terminal_task_id(&self) -> Option<&str> {
        let is_depended_on = |id: &str| self.tasks.iter().any(|t| t.dependencies.iter().any(|d| d == id));
        let generation = || self.tasks.iter().rev().filter(|t| t.is_generation());

        generation()
            .find(|t| !is_depended_on(&t.id))
            .or_else(|| generation().next())
            .map(|t| t.id.as_str())
    }
}
