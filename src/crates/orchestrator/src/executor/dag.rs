//! Layered DAG execution.
//!
//! Every task whose dependencies are complete forms the next layer; a layer
//! runs concurrently and is drained before the ready set is recomputed. A
//! failed task never aborts the plan: dependents still run and see the
//! unavailable placeholder in place of its output.

use super::result::TaskResult;
use super::retry::{retry_with_backoff, RetryConfig};
use super::streaming::EventSender;
use super::template::{render_params, render_template};
use crate::invoker::{Generator, InvokeOptions};
use crate::planner::{OrchestrationPlan, Task, TaskType};
use crate::tools::ToolRegistry;
use futures::stream::{FuturesUnordered, StreamExt};
use llm::ChatMessage;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tooling::logging::elapsed_ms;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("execution cancelled")]
    Cancelled,
}

/// Per-request inputs to the executor
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Plan intent, forwarded to the invoker for logging and routing
    pub intent: String,
    /// Conversation history placed between instruction and prompt
    pub history: Vec<ChatMessage>,
    pub cancel: CancellationToken,
    pub events: Option<EventSender>,
}

impl ExecutionContext {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }
}

pub struct DagExecutor {
    generator: Arc<dyn Generator>,
    tools: Arc<ToolRegistry>,
    retry: RetryConfig,
}

impl DagExecutor {
    pub fn new(generator: Arc<dyn Generator>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            generator,
            tools,
            retry: RetryConfig::default(),
        }
    }

    /// Retry policy for tool tasks
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run the plan; results come back in completion order and cover every
    /// task
    pub async fn execute(
        &self,
        plan: &OrchestrationPlan,
        ctx: &ExecutionContext,
    ) -> Result<Vec<TaskResult>, ExecutionError> {
        let mut remaining: Vec<&Task> = plan.tasks.iter().collect();
        let mut completed: HashMap<String, TaskResult> = HashMap::with_capacity(remaining.len());
        let mut results: Vec<TaskResult> = Vec::with_capacity(remaining.len());
        let mut layer_index = 0;

        loop {
            let (ready, rest): (Vec<&Task>, Vec<&Task>) = remaining
                .into_iter()
                .partition(|t| t.dependencies.iter().all(|d| completed.contains_key(d)));
            remaining = rest;
            if ready.is_empty() {
                break;
            }
            if ctx.cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }

            layer_index += 1;
            info!(
                layer = layer_index,
                tasks = ?ready.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
                "Running layer"
            );

            let mut finished: Vec<TaskResult> = Vec::with_capacity(ready.len());
            {
                let mut layer: FuturesUnordered<_> = ready
                    .into_iter()
                    .map(|task| self.run_task(task, &completed, ctx))
                    .collect();

                loop {
                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => {
                            warn!(layer = layer_index, "Execution cancelled");
                            return Err(ExecutionError::Cancelled);
                        }
                        next = layer.next() => match next {
                            Some(result) => {
                                if let Some(events) = &ctx.events {
                                    events.task_finished(&result.task_id, result.status).await;
                                }
                                finished.push(result);
                            }
                            None => break,
                        }
                    }
                }
            }

            for result in finished {
                completed.insert(result.task_id.clone(), result.clone());
                results.push(result);
            }
        }

        for task in remaining {
            let missing: Vec<&str> = task
                .dependencies
                .iter()
                .filter(|d| !completed.contains_key(*d))
                .map(String::as_str)
                .collect();
            warn!(task = %task.id, missing = ?missing, "Task can never run");
            results.push(TaskResult::failure(
                task.id.clone(),
                format!("unresolved dependencies: {}", missing.join(", ")),
                0,
            ));
        }

        Ok(results)
    }

    async fn run_task(
        &self,
        task: &Task,
        completed: &HashMap<String, TaskResult>,
        ctx: &ExecutionContext,
    ) -> TaskResult {
        if let Some(events) = &ctx.events {
            events.task_started(&task.id).await;
        }
        let started = Instant::now();
        let result = match task.task_type {
            TaskType::Tool => self.run_tool(task, completed, started).await,
            TaskType::Generation => self.run_generation(task, completed, ctx, started).await,
        };
        debug!(
            task = %task.id,
            status = %result.status,
            duration_ms = result.duration_ms,
            "Task finished"
        );
        result
    }

    async fn run_tool(
        &self,
        task: &Task,
        completed: &HashMap<String, TaskResult>,
        started: Instant,
    ) -> TaskResult {
        let Some(name) = task.tool_name.as_deref() else {
            return TaskResult::failure(task.id.clone(), "tool task without tool_name", 0);
        };
        let Some(tool) = self.tools.get(name) else {
            return TaskResult::failure(task.id.clone(), format!("Tool not found: {}", name), 0);
        };

        let params = render_params(&task.params, completed);
        let outcome = retry_with_backoff(&self.retry, name, || {
            let tool = tool.clone();
            let params = params.clone();
            async move { tool.execute(params).await }
        })
        .await;

        match outcome {
            Ok(output) => TaskResult::success(task.id.clone(), output, None, elapsed_ms(started)),
            Err(e) => {
                warn!(task = %task.id, tool = name, error = %e, "Tool task failed");
                TaskResult::failure(task.id.clone(), e.to_string(), elapsed_ms(started))
            }
        }
    }

    async fn run_generation(
        &self,
        task: &Task,
        completed: &HashMap<String, TaskResult>,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> TaskResult {
        let prompt = render_template(&task.prompt, completed);

        let mut messages = Vec::with_capacity(ctx.history.len() + 2);
        if let Some(instruction) = &task.instruction {
            messages.push(ChatMessage::system(instruction.clone()));
        }
        messages.extend(ctx.history.iter().cloned());
        messages.push(ChatMessage::user(prompt.clone()));

        let outcome = self
            .generator
            .generate(task.role(), messages, &ctx.intent, InvokeOptions::default())
            .await;

        let result = if outcome.ok {
            TaskResult::success(
                task.id.clone(),
                Value::String(outcome.text),
                outcome.model_used,
                elapsed_ms(started),
            )
        } else {
            let error = format!(
                "{}: {}",
                outcome.error_code,
                outcome.error.unwrap_or_else(|| "generation failed".to_string())
            );
            warn!(task = %task.id, role = %task.role(), error = %error, "Generation task failed");
            let mut failed = TaskResult::failure(task.id.clone(), error, elapsed_ms(started));
            failed.model = outcome.model_used;
            failed
        };
        result.with_prompt(prompt)
    }
}

impl std::fmt::Debug for DagExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagExecutor")
            .field("tools", &self.tools)
            .field("retry", &self.retry)
            .finish()
    }
}
