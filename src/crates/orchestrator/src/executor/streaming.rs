//! Progress events streamed to the caller while a request runs.
//!
//! Events are best-effort: a dropped receiver never fails the request.

use super::result::TaskStatus;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    PlanReady { intent: String, task_count: usize },
    TaskStarted { task_id: String },
    TaskFinished { task_id: String, status: TaskStatus },
    /// A chunk of the final reply
    Token { text: String },
    Done { model: Option<String> },
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Builder for an event channel
pub struct StreamBuilder {
    buffer_size: usize,
    include_tokens: bool,
}

impl Default for StreamBuilder {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            include_tokens: true,
        }
    }
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Whether reply chunks are sent as `Token` events
    pub fn include_tokens(mut self, include: bool) -> Self {
        self.include_tokens = include;
        self
    }

    pub fn build(self) -> (EventSender, EventStream) {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let sender = EventSender {
            tx,
            include_tokens: self.include_tokens,
        };
        let stream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx));
        (sender, stream)
    }
}

/// Sending half of an event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<StreamEvent>,
    include_tokens: bool,
}

impl EventSender {
    pub fn from_sender(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            include_tokens: true,
        }
    }

    pub async fn send(&self, event: StreamEvent) {
        if matches!(event, StreamEvent::Token { .. }) && !self.include_tokens {
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }

    pub async fn plan_ready(&self, intent: &str, task_count: usize) {
        self.send(StreamEvent::PlanReady {
            intent: intent.to_string(),
            task_count,
        })
        .await
    }

    pub async fn task_started(&self, task_id: &str) {
        self.send(StreamEvent::TaskStarted {
            task_id: task_id.to_string(),
        })
        .await
    }

    pub async fn task_finished(&self, task_id: &str, status: TaskStatus) {
        self.send(StreamEvent::TaskFinished {
            task_id: task_id.to_string(),
            status,
        })
        .await
    }

    /// Stream the reply in word-boundary chunks, stopping early once the
    /// receiver is gone
    pub async fn reply(&self, text: &str, words_per_chunk: usize) {
        for chunk in chunk_words(text, words_per_chunk) {
            if !self.is_active() {
                debug!("Receiver gone, reply streaming stopped");
                return;
            }
            self.send(StreamEvent::Token { text: chunk }).await;
        }
    }

    pub async fn done(&self, model: Option<String>) {
        self.send(StreamEvent::Done { model }).await
    }

    pub fn is_active(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Split text into chunks of whole words; concatenating the chunks yields
/// the original text
pub fn chunk_words(text: &str, words_per_chunk: usize) -> Vec<String> {
    let per_chunk = words_per_chunk.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut words = 0;

    for piece in text.split_inclusive(char::is_whitespace) {
        current.push_str(piece);
        if !piece.trim().is_empty() {
            words += 1;
        }
        if words >= per_chunk && piece.ends_with(char::is_whitespace) {
            chunks.push(std::mem::take(&mut current));
            words = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
