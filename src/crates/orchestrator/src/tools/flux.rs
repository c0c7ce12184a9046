//! `flux_tool`: text-to-image generation, queued out of band.
//!
//! The tool never waits for the image. It enqueues a job on an external
//! worker and returns `{status: "queued", job_id}`.

use super::{required_str, Tool, ToolInput, ToolOutput};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Queue consumed by the image worker
#[async_trait]
pub trait ImageQueue: Send + Sync {
    /// Enqueue a job and return its id
    async fn enqueue(&self, prompt: &str, params: &Value) -> Result<String>;
}

/// A job sitting in an [`InMemoryImageQueue`]
#[derive(Debug, Clone, Serialize)]
pub struct QueuedImageJob {
    pub job_id: String,
    pub prompt: String,
    pub params: Value,
    pub queued_at: DateTime<Utc>,
}

/// In-process queue, for local runs and tests
#[derive(Debug, Default)]
pub struct InMemoryImageQueue {
    jobs: Mutex<Vec<QueuedImageJob>>,
}

impl InMemoryImageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<QueuedImageJob> {
        self.jobs.lock().clone()
    }
}

#[async_trait]
impl ImageQueue for InMemoryImageQueue {
    async fn enqueue(&self, prompt: &str, params: &Value) -> Result<String> {
        let job_id = Uuid::new_v4().to_string();
        self.jobs.lock().push(QueuedImageJob {
            job_id: job_id.clone(),
            prompt: prompt.to_string(),
            params: params.clone(),
            queued_at: Utc::now(),
        });
        Ok(job_id)
    }
}

/// Image generation tool
pub struct FluxTool {
    queue: Arc<dyn ImageQueue>,
}

impl FluxTool {
    pub fn new(queue: Arc<dyn ImageQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Tool for FluxTool {
    fn name(&self) -> &str {
        "flux_tool"
    }

    fn description(&self) -> &str {
        "Generates an image from a text prompt. The image is delivered later; the result is a queued job id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string"},
                "aspect_ratio": {"type": "string", "enum": ["1:1", "16:9", "9:16", "4:3", "3:4"]}
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput> {
        let prompt = required_str(&input, "prompt")?;
        let job_id = self.queue.enqueue(prompt, &input).await?;
        info!(job_id = %job_id, "Image job queued");
        Ok(json!({"status": "queued", "job_id": job_id}))
    }
}
