//! Plan construction
//!
//! [`PlanBuilder::build`] always returns a plan. The `orchestrator` role is
//! asked for a strict-JSON plan; any failure along the way (provider error,
//! unparseable output, empty plan, cycle) yields the deterministic
//! single-task fallback plan instead.

pub mod parser;
pub mod plan;
pub mod session;

pub use parser::{extract_json, parse_plan, PlanError};
pub use plan::{OrchestrationPlan, PlanMetadata, Task, TaskType, FALLBACK_INSTRUCTION, GENERAL_INTENT};
pub use session::{SessionState, DEFAULT_SESSION_TTL};

use crate::clock::SystemClock;
use crate::governance::ModelRole;
use crate::intent::{IntentAnalyzer, IntentSignal, RequestMode};
use crate::invoker::{Generator, InvokeOptions};
use crate::tools::ToolRegistry;
use llm::{ChatMessage, ChatRole};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

pub const IMAGE_INTENT: &str = "image_generation";
const IMAGE_TOOL: &str = "flux_tool";

const PLANNER_PROMPT: &str = r#"You are the planning component of an assistant. Break the user's request into a small plan of tasks.

Available tools:
{tools}

Available specialists for generation tasks: orchestrator, synthesizer, coder, logic, tr_creative, safety.

Reply with strict JSON only, in exactly this shape:
{"intent": "<short domain tag, 'general' for small talk>",
 "rewritten_query": "<standalone version of the request, or null>",
 "is_follow_up": <true if the message continues the previous topic>,
 "reasoning": "<one sentence>",
 "tasks": [
   {"id": "t1", "type": "tool", "tool_name": "<tool>", "params": {...}, "dependencies": []},
   {"id": "t2", "type": "generation", "specialist": "<specialist>", "instruction": "<how to answer>",
    "prompt": "<prompt; use {t1.output} to insert another task's result>", "dependencies": ["t1"]}
 ]}

Rules: task ids are unique; a task may only reference tasks listed in its dependencies; the last generation task produces the final answer; use as few tasks as possible."#;

/// Everything the builder sees about one request
#[derive(Debug, Clone, Default)]
pub struct PlanInput {
    pub message: String,
    /// Recent history, oldest first
    pub history: Vec<ChatMessage>,
    pub memory: Vec<String>,
    pub preferences: BTreeMap<String, String>,
    /// Description of attached images, if any
    pub vision_context: Option<String>,
    pub mode: Option<RequestMode>,
    pub conversation_id: Option<String>,
}

impl PlanInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
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

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

pub struct PlanBuilder {
    generator: Arc<dyn Generator>,
    analyzer: IntentAnalyzer,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionState>,
    refused_intents: HashSet<String>,
    history_window: usize,
}

impl PlanBuilder {
    pub fn new(generator: Arc<dyn Generator>, analyzer: IntentAnalyzer, tools: Arc<ToolRegistry>) -> Self {
        Self {
            generator,
            analyzer,
            tools,
            sessions: Arc::new(SessionState::new(Arc::new(SystemClock))),
            refused_intents: HashSet::new(),
            history_window: 10,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionState>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Intents this builder will not plan; they come back with
    /// `legacy_fallback` set
    pub fn with_refused_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refused_intents = intents.into_iter().map(|i| i.into().to_lowercase()).collect();
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionState> {
        &self.sessions
    }

    pub async fn build(&self, input: &PlanInput) -> OrchestrationPlan {
        let signal = self.analyzer.analyze(&input.message, input.mode).await;

        let mut plan = if signal.is_image && self.tools.contains(IMAGE_TOOL) {
            image_plan(&signal)
        } else {
            self.plan_with_model(input, &signal).await
        };

        if signal.is_image && plan.intent == GENERAL_INTENT {
            plan.intent = IMAGE_INTENT.to_string();
        }
        if let Some(conversation_id) = &input.conversation_id {
            self.sessions.apply(conversation_id, &mut plan);
        }
        if self.refused_intents.contains(&plan.intent) {
            info!(intent = %plan.intent, "Intent refused, legacy fallback required");
            plan.legacy_fallback = true;
        }

        info!(
            intent = %plan.intent,
            tasks = plan.tasks.len(),
            fallback = plan.is_fallback(),
            image_signal = ?signal.source,
            "Plan built"
        );
        plan
    }

    async fn plan_with_model(&self, input: &PlanInput, signal: &IntentSignal) -> OrchestrationPlan {
        let system = PLANNER_PROMPT.replace("{tools}", &self.tools.describe());
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(self.planner_context(input, signal)),
        ];
        let options = InvokeOptions::json().with_temperature(0.1);

        let outcome = self
            .generator
            .generate(ModelRole::Orchestrator, messages, "planning", options)
            .await;
        if !outcome.ok {
            warn!(error_code = %outcome.error_code, "Planner call failed, using fallback plan");
            return OrchestrationPlan::fallback(&input.message);
        }

        match parse_plan(&outcome.text, &input.message) {
            Ok(mut plan) => {
                plan.metadata.orchestrator_model = outcome.model_used;
                plan
            }
            Err(e) => {
                warn!(error = %e, "Planner output rejected, using fallback plan");
                OrchestrationPlan::fallback(&input.message)
            }
        }
    }

    fn planner_context(&self, input: &PlanInput, signal: &IntentSignal) -> String {
        let mut out = String::new();

        let start = input.history.len().saturating_sub(self.history_window);
        let recent = &input.history[start..];
        if !recent.is_empty() {
            out.push_str("Conversation so far:\n");
            for message in recent {
                let speaker = match message.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::System => continue,
                };
                out.push_str(&format!("{}: {}\n", speaker, message.content));
            }
            out.push('\n');
        }
        if !input.memory.is_empty() {
            out.push_str("Known about the user:\n");
            for item in &input.memory {
                out.push_str(&format!("- {}\n", item));
            }
            out.push('\n');
        }
        if !input.preferences.is_empty() {
            out.push_str("User preferences:\n");
            for (key, value) in &input.preferences {
                out.push_str(&format!("- {}: {}\n", key, value));
            }
            out.push('\n');
        }
        if let Some(vision) = &input.vision_context {
            out.push_str(&format!("Attached image description: {}\n\n", vision));
        }
        if signal.score > 0.0 {
            out.push_str(&format!("Image-request signal: {:.2}\n\n", signal.score));
        }
        out.push_str(&format!("Message: {}", input.message));
        out
    }
}

/// Deterministic plan for a settled image request
fn image_plan(signal: &IntentSignal) -> OrchestrationPlan {
    let mut plan = OrchestrationPlan::fallback(&signal.message);
    plan.intent = IMAGE_INTENT.to_string();
    plan.metadata.fallback = false;
    plan.metadata.reasoning = Some("image request".to_string());
    plan.tasks = vec![
        Task::tool("t1", IMAGE_TOOL, json!({"prompt": signal.message})),
        Task::generation(
            "t2",
            ModelRole::Synthesizer,
            format!(
                "The user asked for an image: \"{}\". Generation job status: {{t1.output}}",
                signal.message
            ),
        )
        .with_instruction(
            "Tell the user briefly that their image is being generated. If the status is an error, apologize instead.",
        )
        .with_dependencies(["t1"]),
    ];
    plan
}

impl std::fmt::Debug for PlanBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanBuilder")
            .field("analyzer", &self.analyzer)
            .field("refused_intents", &self.refused_intents)
            .field("history_window", &self.history_window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::invoker::{ErrorCode, GenerationOutcome};
    use crate::tools::{FluxTool, InMemoryImageQueue, MockWeatherTool};
    use async_trait::async_trait;
    use chrono::{Local, TimeZone};
    use parking_lot::Mutex;

    /// Replies to the orchestrator role with a canned plan
    struct CannedPlanner {
        reply: Option<String>,
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl CannedPlanner {
        fn new(reply: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Generator for CannedPlanner {
        async fn generate(
            &self,
            role: ModelRole,
            messages: Vec<ChatMessage>,
            _intent: &str,
            _options: InvokeOptions,
        ) -> GenerationOutcome {
            if role == ModelRole::Classifier {
                return GenerationOutcome::success("{\"image\": false}", "fast", 1);
            }
            self.prompts.lock().push(messages);
            match &self.reply {
                Some(reply) => GenerationOutcome::success(reply.clone(), "planner-model", 10),
                None => GenerationOutcome::failure(ErrorCode::Capacity, true, "busy"),
            }
        }
    }

    fn builder(generator: Arc<CannedPlanner>) -> PlanBuilder {
        let clock = Arc::new(ManualClock::new(Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()));
        let tools = Arc::new(
            ToolRegistry::new()
                .with_tool(Arc::new(MockWeatherTool))
                .with_tool(Arc::new(FluxTool::new(Arc::new(InMemoryImageQueue::new())))),
        );
        let analyzer = IntentAnalyzer::new(generator.clone(), clock);
        PlanBuilder::new(generator, analyzer, tools)
    }

    const WEATHER_PLAN: &str = r#"{"intent": "weather", "is_follow_up": false, "tasks": [
        {"id": "t1", "type": "tool", "tool_name": "mock_weather", "params": {"location": "Ankara"}},
        {"id": "t2", "type": "generation", "specialist": "logic", "prompt": "Given {t1.output}, what to wear?", "dependencies": ["t1"]}
    ]}"#;

    #[tokio::test]
    async fn test_model_plan_is_used() {
        let generator = CannedPlanner::new(Some(WEATHER_PLAN));
        let plan = builder(generator.clone()).build(&PlanInput::new("What should I wear in Ankara?")).await;

        assert_eq!(plan.intent, "weather");
        assert_eq!(plan.tasks.len(), 2);
        assert!(!plan.is_fallback());
        assert_eq!(plan.metadata.orchestrator_model.as_deref(), Some("planner-model"));

        let prompts = generator.prompts.lock();
        assert!(prompts[0][0].content.contains("mock_weather"));
        assert!(prompts[0][1].content.ends_with("Message: What should I wear in Ankara?"));
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back() {
        let plan = builder(CannedPlanner::new(None)).build(&PlanInput::new("hello")).await;
        assert!(plan.is_fallback());
        assert_eq!(plan.tasks[0].instruction.as_deref(), Some(FALLBACK_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_garbage_output_falls_back() {
        let plan = builder(CannedPlanner::new(Some("I cannot plan that")))
            .build(&PlanInput::new("hello"))
            .await;
        assert!(plan.is_fallback());
        assert_eq!(plan.tasks[0].specialist, Some(ModelRole::Logic));
    }

    #[tokio::test]
    async fn test_image_prefix_builds_image_plan() {
        let generator = CannedPlanner::new(Some(WEATHER_PLAN));
        let plan = builder(generator.clone()).build(&PlanInput::new("/image a lighthouse at dusk")).await;

        assert_eq!(plan.intent, IMAGE_INTENT);
        assert_eq!(plan.tasks[0].tool_name.as_deref(), Some("flux_tool"));
        assert_eq!(plan.tasks[0].params["prompt"], "a lighthouse at dusk");
        assert!(generator.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refused_intent_sets_legacy_fallback() {
        let plan = builder(CannedPlanner::new(Some(WEATHER_PLAN)))
            .with_refused_intents(["Weather"])
            .build(&PlanInput::new("weather?"))
            .await;
        assert!(plan.legacy_fallback);
    }

    #[tokio::test]
    async fn test_follow_up_inherits_previous_domain() {
        let follow_up = r#"{"intent": "general", "is_follow_up": true, "tasks": [{"id": "t1", "prompt": "and tomorrow?"}]}"#;
        let first = builder(CannedPlanner::new(Some(WEATHER_PLAN)));
        let sessions = first.sessions().clone();
        first
            .build(&PlanInput::new("weather in Ankara?").with_conversation("c1"))
            .await;

        let second = builder(CannedPlanner::new(Some(follow_up))).with_sessions(sessions);
        let plan = second
            .build(&PlanInput::new("and tomorrow?").with_conversation("c1"))
            .await;
        assert_eq!(plan.intent, "weather");
    }

    #[tokio::test]
    async fn test_context_includes_history_memory_and_preferences() {
        let generator = CannedPlanner::new(Some(WEATHER_PLAN));
        let mut prefs = BTreeMap::new();
        prefs.insert("units".to_string(), "metric".to_string());
        let input = PlanInput::new("and now?")
            .with_history(vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")])
            .with_memory(vec!["lives in Ankara".to_string()])
            .with_preferences(prefs);

        builder(generator.clone()).build(&input).await;

        let prompts = generator.prompts.lock();
        let context = &prompts[0][1].content;
        assert!(context.contains("user: hi\nassistant: hello"));
        assert!(context.contains("- lives in Ankara"));
        assert!(context.contains("- units: metric"));
    }
}
