//! Plan execution
//!
//! - [`dag`] - layered concurrent execution of an [`OrchestrationPlan`](crate::planner::OrchestrationPlan)
//! - [`template`] - `{taskId.output}` substitution
//! - [`retry`] - backoff policy for tool tasks
//! - [`streaming`] - progress events for the caller

pub mod dag;
pub mod result;
pub mod retry;
pub mod streaming;
pub mod template;

pub use dag::{DagExecutor, ExecutionContext, ExecutionError};
pub use result::{unavailable_placeholder, TaskResult, TaskStatus};
pub use retry::{classify_error, retry_with_backoff, ErrorClass, RetryConfig};
pub use streaming::{chunk_words, EventSender, EventStream, StreamBuilder, StreamEvent};
