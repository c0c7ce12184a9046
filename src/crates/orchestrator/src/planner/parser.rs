//! Strict parsing and normalization of planner output.
//!
//! Model output is never partially trusted: anything that cannot be turned
//! into a valid DAG is rejected with a [`PlanError`] and the builder falls
//! back to the deterministic plan.

use super::plan::{OrchestrationPlan, PlanMetadata, Task, TaskType, GENERAL_INTENT};
use crate::executor::template::referenced_ids;
use crate::governance::ModelRole;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::debug;

/// Why a planner response was rejected
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("no JSON object in planner output")]
    NoJson,

    #[error("invalid plan JSON: {0}")]
    InvalidJson(String),

    #[error("plan has no tasks")]
    Empty,

    #[error("task '{0}' is a tool task without tool_name")]
    MissingToolName(String),

    #[error("task '{id}' has unknown type '{kind}'")]
    UnknownTaskType { id: String, kind: String },

    #[error("dependency cycle among tasks {0:?}")]
    Cycle(Vec<String>),
}

/// Locate a JSON object in model output
///
/// Tolerates fenced code blocks and prose around the object.
pub fn extract_json(text: &str) -> Option<&str> {
    for fence in ["```json", "```JSON"] {
        if let Some(start) = text.find(fence) {
            let content = &text[start + fence.len()..];
            if let Some(end) = content.find("```") {
                return Some(content[..end].trim());
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].trim())
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    rewritten_query: Option<String>,
    #[serde(default)]
    is_follow_up: Option<bool>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, alias = "role")]
    specialist: Option<String>,
    #[serde(default, alias = "tool")]
    tool_name: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default, alias = "depends_on")]
    dependencies: Vec<Value>,
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse planner output into a normalized plan
///
/// `message` fills empty generation prompts.
pub fn parse_plan(text: &str, message: &str) -> Result<OrchestrationPlan, PlanError> {
    let json = extract_json(text).ok_or(PlanError::NoJson)?;
    let raw: RawPlan = serde_json::from_str(json).map_err(|e| PlanError::InvalidJson(e.to_string()))?;

    if raw.tasks.is_empty() {
        return Err(PlanError::Empty);
    }

    let tasks = assign_ids(raw.tasks)
        .into_iter()
        .map(|(id, raw)| build_task(id, raw, message))
        .collect::<Result<Vec<_>, _>>()?;

    let mut plan = OrchestrationPlan {
        intent: raw
            .intent
            .map(|i| i.trim().to_lowercase())
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| GENERAL_INTENT.to_string()),
        rewritten_query: raw.rewritten_query.filter(|q| !q.trim().is_empty()),
        is_follow_up: raw.is_follow_up.unwrap_or(false),
        legacy_fallback: false,
        tasks,
        metadata: PlanMetadata {
            orchestrator_model: None,
            reasoning: raw.reasoning,
            fallback: false,
        },
    };

    normalize(&mut plan, message)?;
    Ok(plan)
}

/// Fill missing ids and make duplicates unique
fn assign_ids(raw_tasks: Vec<RawTask>) -> Vec<(String, RawTask)> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(raw_tasks.len());

    for (index, raw) in raw_tasks.into_iter().enumerate() {
        let base = raw
            .id
            .as_ref()
            .and_then(value_to_id)
            .unwrap_or_else(|| format!("t{}", index + 1));

        let mut id = base.clone();
        let mut suffix = 2;
        while seen.contains(&id) {
            id = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        if id != base {
            debug!(original = %base, renamed = %id, "Renamed duplicate task id");
        }
        seen.insert(id.clone());
        out.push((id, raw));
    }
    out
}

fn build_task(id: String, raw: RawTask, message: &str) -> Result<Task, PlanError> {
    let tool_name = raw.tool_name.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());

    let task_type = match raw.kind.as_deref().map(|k| k.trim().to_lowercase()) {
        Some(ref k) if k == "generation" => TaskType::Generation,
        Some(ref k) if k == "tool" => TaskType::Tool,
        Some(k) if !k.is_empty() => return Err(PlanError::UnknownTaskType { id, kind: k }),
        _ if tool_name.is_some() => TaskType::Tool,
        _ => TaskType::Generation,
    };

    let dependencies = raw.dependencies.iter().filter_map(value_to_id).collect();

    match task_type {
        TaskType::Tool => {
            let tool_name = tool_name.ok_or_else(|| PlanError::MissingToolName(id.clone()))?;
            let params = match raw.params {
                Some(Value::Object(map)) => Value::Object(map),
                _ => Value::Object(Default::default()),
            };
            Ok(Task {
                dependencies,
                ..Task::tool(id, tool_name, params)
            })
        }
        TaskType::Generation => {
            let role = match raw.specialist.as_deref() {
                Some(name) => name.parse::<ModelRole>().unwrap_or_else(|_| {
                    debug!(task = %id, specialist = name, "Unknown specialist, using logic");
                    ModelRole::Logic
                }),
                None => ModelRole::Logic,
            };
            let prompt = raw
                .prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| message.to_string());
            let mut task = Task::generation(id, role, prompt);
            task.instruction = raw.instruction.filter(|i| !i.trim().is_empty());
            task.dependencies = dependencies;
            Ok(task)
        }
    }
}

/// Enforce the DAG invariants on a parsed plan
///
/// References in prompts and params become dependencies; dependencies on
/// unknown ids and on the task itself are dropped. A plan without any
/// generation task gets a synthesizer task over all tool outputs.
pub fn normalize(plan: &mut OrchestrationPlan, message: &str) -> Result<(), PlanError> {
    if plan.tasks.is_empty() {
        return Err(PlanError::Empty);
    }

    if !plan.tasks.iter().any(Task::is_generation) {
        let tool_ids: Vec<String> = plan.tasks.iter().map(|t| t.id.clone()).collect();
        let mut prompt = format!("User request: {}\n\nTool results:", message);
        for id in &tool_ids {
            prompt.push_str(&format!("\n- {}: {{{}.output}}", id, id));
        }
        let mut id = "final".to_string();
        while plan.task(&id).is_some() {
            id.push('_');
        }
        plan.tasks.push(
            Task::generation(id, ModelRole::Synthesizer, prompt)
                .with_instruction("Answer the user's request using the tool results.")
                .with_dependencies(tool_ids),
        );
    }

    let ids: HashSet<String> = plan.tasks.iter().map(|t| t.id.clone()).collect();

    for task in &mut plan.tasks {
        let mut refs = referenced_ids(&task.prompt);
        collect_param_refs(&task.params, &mut refs);

        let mut deps: Vec<String> = Vec::new();
        for dep in task.dependencies.drain(..).chain(refs) {
            if dep == task.id || !ids.contains(&dep) {
                debug!(task = %task.id, dependency = %dep, "Dropped dependency");
                continue;
            }
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        task.dependencies = deps;
    }

    let stuck = unresolved_tasks(&plan.tasks);
    if !stuck.is_empty() {
        return Err(PlanError::Cycle(stuck));
    }
    Ok(())
}

fn collect_param_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(referenced_ids(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_param_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_param_refs(v, out)),
        _ => {}
    }
}

/// Tasks that can never become ready (Kahn's algorithm leftovers)
pub fn unresolved_tasks(tasks: &[Task]) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        for dep in &task.dependencies {
            if let Some(degree) = in_degree.get_mut(task.id.as_str()) {
                *degree += 1;
            }
            dependents.entry(dep.as_str()).or_default().push(task.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = tasks
        .iter()
        .map(|t| t.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut resolved: HashSet<&str> = HashSet::new();

    while let Some(id) = queue.pop_front() {
        resolved.insert(id);
        for next in dependents.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    tasks
        .iter()
        .filter(|t| !resolved.contains(t.id.as_str()))
        .map(|t| t.id.clone())
        .collect()
}
