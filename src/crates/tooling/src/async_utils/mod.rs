//! Async utilities
//!
//! Every outbound call made by the orchestration core (provider generations,
//! document retrieval, classifier probes) is bounded by a deadline. This
//! module provides the wrapper that turns an elapsed deadline into a typed
//! error the caller can classify as retryable.

pub mod timeout;
