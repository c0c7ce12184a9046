//! Per-service circuit breakers.
//!
//! closed -> open after `failure_threshold` consecutive failures; open ->
//! half-open once `reset_timeout` has elapsed, admitting a single probe;
//! the probe's outcome closes or re-opens the circuit.

use crate::clock::{to_chrono, SharedClock};
use chrono::{DateTime, Local};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_state_change: DateTime<Local>,
    probe_in_flight: bool,
}

/// Breaker for one external service
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    clock: SharedClock,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_state_change: now,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a request may go through. May move open -> half-open and
    /// claim the single probe slot; a caller that gets `true` must settle
    /// with one of the `record_*` methods. [`CircuitBreaker::admit`] does
    /// that on drop.
    pub fn can_execute(&self) -> bool {
        self.claim().is_some()
    }

    /// Admit one attempt. The permit releases a claimed probe slot if it
    /// is dropped without an outcome.
    pub fn admit(self: &Arc<Self>) -> Option<CircuitPermit> {
        self.claim().map(|probe| CircuitPermit {
            breaker: self.clone(),
            probe,
            settled: false,
        })
    }

    /// `Some(true)` when the admission took the half-open probe slot
    fn claim(&self) -> Option<bool> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                if now - inner.last_state_change >= to_chrono(self.config.reset_timeout) {
                    inner.state = CircuitState::HalfOpen;
                    inner.last_state_change = now;
                    inner.probe_in_flight = true;
                    info!(service = %self.name, "Circuit half-open, admitting probe");
                    Some(true)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(service = %self.name, "Circuit closed");
            inner.state = CircuitState::Closed;
            inner.last_state_change = now;
        }
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.probe_in_flight = false;

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.last_state_change = now;
            warn!(
                service = %self.name,
                failures = inner.consecutive_failures,
                "Circuit opened"
            );
        }
    }

    /// An attempt that says nothing about service health (a timeout, a
    /// client error) neither trips nor heals the circuit. It only frees the
    /// half-open probe slot.
    pub fn record_neutral(&self) {
        self.inner.lock().probe_in_flight = false;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock();
        CircuitStatus {
            service: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_state_change: inner.last_state_change,
        }
    }
}

/// One admitted attempt through a [`CircuitBreaker`]
#[derive(Debug)]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl CircuitPermit {
    /// Whether this attempt is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }

    pub fn neutral(mut self) {
        self.settled = true;
        self.breaker.record_neutral();
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            debug!(service = %self.breaker.name, "Probe abandoned, releasing slot");
            self.breaker.record_neutral();
        }
    }
}

/// Operator view of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub service: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_state_change: DateTime<Local>,
}

/// One breaker per service name
#[derive(Debug)]
pub struct CircuitRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitConfig,
    clock: SharedClock,
}

impl CircuitRegistry {
    pub fn new(config: CircuitConfig, clock: SharedClock) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
        }
    }

    /// Create the breaker for a service at startup
    pub fn register(&self, service: &str) -> Arc<CircuitBreaker> {
        self.get(service)
    }

    /// Breaker for a service, created on first use if it was not registered
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    service,
                    self.config.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    pub fn snapshot(&self) -> Vec<CircuitStatus> {
        let mut rows: Vec<CircuitStatus> = self.breakers.iter().map(|b| b.status()).collect();
        rows.sort_by(|a, b| a.service.cmp(&b.service));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn breaker() -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        ));
        let breaker = CircuitBreaker::new("primary", CircuitConfig::default(), clock.clone());
        (clock, breaker)
    }

    #[test]
    fn test_opens_after_threshold() {
        let (_clock, cb) = breaker();
        for _ in 0..4 {
            cb.record_failure();
            assert!(cb.can_execute());
        }
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (_clock, cb) = breaker();
        for _ in 0..4 {
            cb.record_failure();
        }
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.status().consecutive_failures, 1);
    }

    #[test]
    fn test_half_open_single_probe() {
        let (clock, cb) = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(59));
        assert!(!cb.can_execute());

        clock.advance(Duration::from_secs(1));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Second caller is refused while the probe is out
        assert!(!cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_half_open_failure_restarts_timer() {
        let (clock, cb) = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(60));
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(30));
        assert!(!cb.can_execute());
        clock.advance(Duration::from_secs(30));
        assert!(cb.can_execute());
    }

    #[test]
    fn test_timeout_frees_probe() {
        let (clock, cb) = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(60));
        assert!(cb.can_execute());
        cb.record_neutral();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());
    }

    fn tripped() -> (Arc<ManualClock>, Arc<CircuitBreaker>) {
        let (clock, cb) = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(60));
        (clock, Arc::new(cb))
    }

    #[test]
    fn test_dropped_half_open_permit_frees_slot() {
        let (_clock, cb) = tripped();
        let permit = cb.admit().unwrap();
        assert!(permit.is_probe());
        assert!(cb.admit().is_none());

        drop(permit);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let retry = cb.admit().unwrap();
        retry.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_settled_permit_keeps_outcome() {
        let (_clock, cb) = tripped();
        cb.admit().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.admit().is_none());
    }

    #[test]
    fn test_closed_permit_drop_leaves_half_open_slot_alone() {
        let (clock, cb) = breaker();
        let cb = Arc::new(cb);
        let stale = cb.admit().unwrap();
        assert!(!stale.is_probe());

        for _ in 0..5 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(60));
        let probe = cb.admit().unwrap();
        drop(stale);
        assert!(cb.admit().is_none());
        probe.neutral();
    }

    #[test]
    fn test_registry_reuses_breakers() {
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        ));
        let registry = CircuitRegistry::new(CircuitConfig::default(), clock);
        let a = registry.register("primary");
        let b = registry.get("primary");
        assert!(Arc::ptr_eq(&a, &b));
        registry.get("secondary");
        let names: Vec<String> = registry.snapshot().into_iter().map(|s| s.service).collect();
        assert_eq!(names, vec!["primary".to_string(), "secondary".to_string()]);
    }
}
