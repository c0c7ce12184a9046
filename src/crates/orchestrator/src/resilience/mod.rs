//! Resilience layer: circuit breakers per external service and daily
//! budgets per model.

pub mod budget;
pub mod circuit;

pub use budget::{
    AlertLevel, AlertSink, BudgetAlert, BudgetCheck, BudgetLimits, BudgetMetric, BudgetTracker,
    MemoryAlertSink, ModelUsage, TracingAlertSink, FALLBACK_LIMITS,
};
pub use circuit::{CircuitBreaker, CircuitConfig, CircuitPermit, CircuitRegistry, CircuitState, CircuitStatus};
