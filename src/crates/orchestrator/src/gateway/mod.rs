//! Per-request assembly
//!
//! [`Gateway::handle`] runs one request end to end:
//!
//! 1. load history and compose context
//! 2. build the plan
//! 3. run the retrieval gate and attach its block to the terminal task
//! 4. execute the plan
//! 5. stream the terminal output as the reply
//! 6. append one assistant message to the conversation store
//!
//! Nothing is persisted when the request is cancelled or the terminal task
//! fails.

pub mod store;

pub use crate::executor::{EventSender, EventStream, StreamBuilder, StreamEvent};
pub use store::{ConversationStore, InMemoryConversationStore, StoredMessage};

use crate::context::ContextComposer;
use crate::executor::{DagExecutor, ExecutionContext, ExecutionError, TaskResult, TaskStatus};
use crate::intent::RequestMode;
use crate::planner::{OrchestrationPlan, PlanBuilder, PlanInput, IMAGE_INTENT};
use crate::rag::{GateRequest, GatingResult, RagGate, SearchMode};
use crate::{OrchestratorError, Result};
use llm::{ChatMessage, ChatRole};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tooling::logging::elapsed_ms;
use tracing::{info, warn};

const REPLY_WORDS_PER_CHUNK: usize = 8;
const DEFAULT_SCOPE: &str = "default";

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub conversation_id: String,
    /// Document owner for retrieval
    pub owner: String,
    pub scope: String,
    pub message: String,
    pub memory: Vec<String>,
    pub preferences: BTreeMap<String, String>,
    pub vision_context: Option<String>,
    pub mode: Option<RequestMode>,
    pub search_mode: SearchMode,
    /// Continue reading the pinned document after the last shown page
    pub continue_mode: bool,
}

impl GatewayRequest {
    pub fn new(conversation_id: impl Into<String>, owner: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            owner: owner.into(),
            scope: DEFAULT_SCOPE.to_string(),
            message: message.into(),
            memory: Vec::new(),
            preferences: BTreeMap::new(),
            vision_context: None,
            mode: None,
            search_mode: SearchMode::Standard,
            continue_mode: false,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_memory(mut self, memory: Vec<String>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_preferences(mut self, preferences: BTreeMap<String, String>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_vision_context(mut self, vision_context: impl Into<String>) -> Self {
        self.vision_context = Some(vision_context.into());
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_search_mode(mut self, search_mode: SearchMode) -> Self {
        self.search_mode = search_mode;
        self
    }

    pub fn with_continue_mode(mut self, continue_mode: bool) -> Self {
        self.continue_mode = continue_mode;
        self
    }
}

/// Task summary carried in the reply and in the stored message metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub status: TaskStatus,
    pub model: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayReply {
    /// Id of the stored assistant message
    pub message_id: String,
    pub text: String,
    pub model: Option<String>,
    pub intent: String,
    pub fallback_plan: bool,
    pub gating_result: Option<GatingResult>,
    /// Task results in plan order
    pub results: Vec<TaskResult>,
    pub duration_ms: u64,
}

impl GatewayReply {
    pub fn summaries(&self) -> Vec<TaskSummary> {
        self.results.iter().map(summarize).collect()
    }
}

pub struct Gateway {
    planner: Arc<PlanBuilder>,
    executor: Arc<DagExecutor>,
    store: Arc<dyn ConversationStore>,
    gate: Option<Arc<RagGate>>,
    composer: ContextComposer,
    streaming: bool,
}

impl Gateway {
    pub fn new(planner: Arc<PlanBuilder>, executor: Arc<DagExecutor>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            planner,
            executor,
            store,
            gate: None,
            composer: ContextComposer::default(),
            streaming: true,
        }
    }

    pub fn with_rag_gate(mut self, gate: Arc<RagGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_composer(mut self, composer: ContextComposer) -> Self {
        self.composer = composer;
        self
    }

    /// When off, event senders passed to [`Gateway::handle`] are ignored
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub async fn handle(
        &self,
        request: GatewayRequest,
        events: Option<EventSender>,
        cancel: CancellationToken,
    ) -> Result<GatewayReply> {
        let started = Instant::now();
        let events = events.filter(|_| self.streaming);

        let stored = self.store.load_messages(&request.conversation_id).await?;
        let history: Vec<ChatMessage> = stored.iter().map(StoredMessage::to_chat).collect();
        let context = self.composer.compose(&history, &request.memory, &request.preferences);

        let mut input = PlanInput::new(request.message.clone())
            .with_history(context.history.clone())
            .with_memory(request.memory.clone())
            .with_preferences(request.preferences.clone())
            .with_conversation(request.conversation_id.clone());
        if let Some(vision) = &request.vision_context {
            input = input.with_vision_context(vision.clone());
        }
        if let Some(mode) = request.mode {
            input = input.with_mode(mode);
        }

        let mut plan = self.planner.build(&input).await;
        if plan.legacy_fallback {
            return Err(OrchestratorError::LegacyFallbackRequired(plan.intent));
        }
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if let Some(events) = &events {
            events.plan_ready(&plan.intent, plan.tasks.len()).await;
        }

        let gating_result = self.attach_evidence(&request, &mut plan).await;

        let mut exec_history = Vec::with_capacity(context.history.len() + 1);
        if let Some(preamble) = context.preamble {
            exec_history.push(ChatMessage::system(preamble));
        }
        exec_history.extend(context.history);
        let mut ctx = ExecutionContext::new(plan.intent.clone())
            .with_history(exec_history)
            .with_cancel(cancel.clone());
        if let Some(events) = &events {
            ctx = ctx.with_events(events.clone());
        }

        let results = match self.executor.execute(&plan, &ctx).await {
            Ok(results) => results,
            Err(ExecutionError::Cancelled) => {
                info!(conversation = %request.conversation_id, "Request cancelled, nothing persisted");
                return Err(OrchestratorError::Cancelled);
            }
        };
        let results = in_plan_order(&plan, results);

        let terminal = plan
            .terminal_task_id()
            .and_then(|id| results.iter().find(|r| r.task_id == id))
            .ok_or_else(|| OrchestratorError::GenerationFailed("plan has no terminal task".to_string()))?;
        if !terminal.is_success() {
            let error = terminal.error.clone().unwrap_or_else(|| "terminal task failed".to_string());
            warn!(task = %terminal.task_id, error = %error, "Terminal task failed");
            return Err(OrchestratorError::GenerationFailed(error));
        }
        let text = terminal.rendered();
        let model = terminal.model.clone();

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if let Some(events) = &events {
            events.reply(&text, REPLY_WORDS_PER_CHUNK).await;
        }

        let metadata = json!({
            "intent": plan.intent,
            "model": model,
            "fallback_plan": plan.is_fallback(),
            "orchestrator_model": plan.metadata.orchestrator_model,
            "gating_result": gating_result,
            "tasks": results.iter().map(summarize).collect::<Vec<_>>(),
        });
        let message = self
            .store
            .append_message(&request.conversation_id, ChatRole::Assistant, &text, metadata)
            .await?;

        if let Some(events) = &events {
            events.done(model.clone()).await;
        }

        let duration_ms = elapsed_ms(started);
        info!(
            conversation = %request.conversation_id,
            intent = %plan.intent,
            model = ?model,
            tasks = results.len(),
            gating_result = ?gating_result,
            duration_ms,
            "Request completed"
        );

        Ok(GatewayReply {
            message_id: message.id,
            text,
            model,
            intent: plan.intent,
            fallback_plan: plan.metadata.fallback,
            gating_result,
            results,
            duration_ms,
        })
    }

    /// Run the gate and append its block to the terminal task's prompt
    async fn attach_evidence(&self, request: &GatewayRequest, plan: &mut OrchestrationPlan) -> Option<GatingResult> {
        let gate = self.gate.as_ref()?;
        if plan.intent == IMAGE_INTENT {
            return None;
        }

        let gate_request = GateRequest::new(
            plan.effective_query(&request.message),
            request.owner.clone(),
            request.scope.clone(),
        )
        .with_conversation(request.conversation_id.clone())
        .with_continue_mode(request.continue_mode)
        .with_mode(request.search_mode);
        let decision = gate.evaluate(&gate_request).await;

        if let Some(block) = decision.prompt_block() {
            let terminal = plan.terminal_task_id().map(str::to_string);
            if let Some(task) = terminal.and_then(|id| plan.task_mut(&id)) {
                task.prompt = format!("{}\n\n{}", task.prompt, block);
            }
        }
        Some(decision.gating_result)
    }
}

fn summarize(result: &TaskResult) -> TaskSummary {
    TaskSummary {
        task_id: result.task_id.clone(),
        status: result.status,
        model: result.model.clone(),
        duration_ms: result.duration_ms,
    }
}

fn in_plan_order(plan: &OrchestrationPlan, mut results: Vec<TaskResult>) -> Vec<TaskResult> {
    let position = |id: &str| plan.tasks.iter().position(|t| t.id == id).unwrap_or(usize::MAX);
    results.sort_by_key(|r| position(&r.task_id));
    results
}
