//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use llm::{GenerateRequest, GenerateResponse, Provider};
use orchestrator::invoker::{GenerationOutcome, Generator, InvokeOptions};
use orchestrator::rag::{DocumentIndex, RagCandidate, SearchQuery};
use orchestrator::tools::{Tool, ToolInput, ToolOutput};
use orchestrator::{ManualClock, ModelRole, OrchestratorSettings, Result, Runtime};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub fn start_time() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

type Script = dyn Fn(&str, &GenerateRequest) -> llm::Result<GenerateResponse> + Send + Sync;

/// Provider that answers through a closure over `(api_key, request)` and
/// records every call
pub struct ScriptedProvider {
    name: String,
    calls: Mutex<Vec<(String, String)>>,
    script: Box<Script>,
}

impl ScriptedProvider {
    pub fn new<F>(name: &str, script: F) -> Arc<Self>
    where
        F: Fn(&str, &GenerateRequest) -> llm::Result<GenerateResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
        })
    }

    /// Replies with the last user message, prefixed by the model id
    pub fn echo(name: &str) -> Arc<Self> {
        Self::new(name, |_, request| {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(GenerateResponse::new(format!("{}: {}", request.model, last)))
        })
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn calls_for_model(&self, model: &str) -> usize {
        self.calls.lock().iter().filter(|(_, m)| m == model).count()
    }

    pub fn calls_with_key(&self, key: &str) -> usize {
        self.calls.lock().iter().filter(|(k, _)| k == key).count()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, api_key: &str, request: GenerateRequest) -> llm::Result<GenerateResponse> {
        self.calls
            .lock()
            .push((api_key.to_string(), request.model.clone()));
        (self.script)(api_key, &request)
    }
}

/// Build a runtime over one scripted provider named `primary`
pub fn runtime(yaml: &str, provider: Arc<ScriptedProvider>, clock: Arc<ManualClock>) -> Runtime {
    let settings = OrchestratorSettings::from_yaml_str(yaml).unwrap();
    let provider: Arc<dyn Provider> = provider;
    Runtime::with_providers(settings, vec![provider], clock).unwrap()
}

/// Start and finish order of tasks, shared between the fixtures below
#[derive(Debug, Default)]
pub struct Timeline {
    events: Mutex<Vec<(String, &'static str)>>,
}

impl Timeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start(&self, id: &str) {
        self.events.lock().push((id.to_string(), "start"));
    }

    pub fn finish(&self, id: &str) {
        self.events.lock().push((id.to_string(), "finish"));
    }

    pub fn position(&self, id: &str, kind: &str) -> Option<usize> {
        self.events
            .lock()
            .iter()
            .position(|(i, k)| i == id && *k == kind)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

/// Tool that records when it runs; the task id travels in `params.task`
pub struct RecordingTool {
    timeline: Arc<Timeline>,
}

impl RecordingTool {
    pub fn new(timeline: Arc<Timeline>) -> Arc<Self> {
        Arc::new(Self { timeline })
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        "recorder"
    }

    fn description(&self) -> &str {
        "Records execution order."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"task": {"type": "string"}}})
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput> {
        let id = input.get("task").and_then(Value::as_str).unwrap_or_default().to_string();
        self.timeline.start(&id);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.timeline.finish(&id);
        Ok(json!({ "task": id }))
    }
}

/// Generator that records when it runs; the prompt is the task id
pub struct RecordingGenerator {
    timeline: Arc<Timeline>,
}

impl RecordingGenerator {
    pub fn new(timeline: Arc<Timeline>) -> Arc<Self> {
        Arc::new(Self { timeline })
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(
        &self,
        _role: ModelRole,
        messages: Vec<llm::ChatMessage>,
        _intent: &str,
        _options: InvokeOptions,
    ) -> GenerationOutcome {
        let id = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.timeline.start(&id);
        tokio::task::yield_now().await;
        self.timeline.finish(&id);
        GenerationOutcome::success(format!("done {}", id), "recorder-model", 1)
    }
}

/// Index returning a fixed candidate list
#[derive(Default)]
pub struct FixedIndex {
    pub candidates: Vec<RagCandidate>,
    pub queries: Mutex<Vec<SearchQuery>>,
}

impl FixedIndex {
    pub fn new(candidates: Vec<RagCandidate>) -> Arc<Self> {
        Arc::new(Self {
            candidates,
            queries: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DocumentIndex for FixedIndex {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<RagCandidate>> {
        self.queries.lock().push(query.clone());
        Ok(self.candidates.clone())
    }

    async fn expand_neighbors(
        &self,
        _owner: &str,
        _scope: &str,
        _filename: &str,
        _page_number: u32,
        _chunk_index: u32,
        _radius: u32,
    ) -> Result<Vec<RagCandidate>> {
        Ok(Vec::new())
    }
}
